//! Audio Graph - DAG-based routing with topological sort

use super::edge::{Edge, EdgeId};
use super::node::{AudioNode, NodeHandle, NodeType, PortId};
use crate::error::GraphError;
use std::collections::{HashMap, HashSet, VecDeque};

/// オーディオグラフ
///
/// ノードとエッジを管理し、トポロジカルソートで処理順序を決定
pub struct AudioGraph {
    /// ノード格納
    nodes: HashMap<NodeHandle, Box<dyn AudioNode>>,
    /// エッジ
    edges: Vec<Edge>,
    /// 処理順序（トポロジカルソート済み）
    processing_order: Vec<NodeHandle>,
    /// 次のノードハンドル
    next_handle: u32,
    /// 次のエッジID
    next_edge_id: u32,
    /// ノード数の上限
    max_nodes: usize,
    /// グラフが変更されたかどうか (rebuild needed)
    dirty: bool,
}

impl AudioGraph {
    /// Create a new empty graph
    pub fn new(max_nodes: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            processing_order: Vec::new(),
            next_handle: 1, // Start from 1 (0 is reserved)
            next_edge_id: 1,
            max_nodes,
            dirty: false,
        }
    }

    /// ノードを追加
    pub fn add_node(&mut self, node: Box<dyn AudioNode>) -> Result<NodeHandle, GraphError> {
        if self.nodes.len() >= self.max_nodes {
            return Err(GraphError::NodeLimitReached(self.max_nodes));
        }
        let handle = NodeHandle::new(self.next_handle);
        self.next_handle += 1;
        self.nodes.insert(handle, node);
        self.dirty = true;
        Ok(handle)
    }

    /// ノードを削除（関連エッジも自動削除）
    pub fn remove_node(&mut self, handle: NodeHandle) -> bool {
        if self.nodes.remove(&handle).is_some() {
            self.edges.retain(|e| e.source != handle && e.target != handle);
            self.dirty = true;
            true
        } else {
            false
        }
    }

    /// ノードを取得
    pub fn get_node(&self, handle: NodeHandle) -> Option<&dyn AudioNode> {
        self.nodes.get(&handle).map(|n| n.as_ref())
    }

    /// ノードを取得（可変）
    pub fn get_node_mut(&mut self, handle: NodeHandle) -> Option<&mut (dyn AudioNode + '_)> {
        match self.nodes.get_mut(&handle) {
            Some(boxed) => Some(&mut **boxed),
            None => None,
        }
    }

    /// Downcast a node to its concrete type
    pub fn node_as<T: 'static>(&self, handle: NodeHandle) -> Option<&T> {
        self.nodes.get(&handle)?.as_any().downcast_ref::<T>()
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    /// すべてのノードハンドルを取得（ハンドル順）
    pub fn node_handles(&self) -> Vec<NodeHandle> {
        let mut handles: Vec<_> = self.nodes.keys().copied().collect();
        handles.sort();
        handles
    }

    /// ノード数を取得
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 2ノード間を全チャンネル接続する
    ///
    /// モノラル出力をステレオ入力に繋ぐ場合はポート0を全入力へ分配する。
    pub fn connect(&mut self, source: NodeHandle, target: NodeHandle) -> Result<(), GraphError> {
        let outputs = self
            .get_node(source)
            .ok_or(GraphError::UnknownNode(source))?
            .output_port_count();
        let inputs = self
            .get_node(target)
            .ok_or(GraphError::UnknownNode(target))?
            .input_port_count();

        if outputs == 0 || inputs == 0 {
            return Err(GraphError::InvalidConnection(source, target));
        }
        if self.is_connected(source, target) {
            return Err(GraphError::DuplicateEdge(source, target));
        }
        if source == target || self.reaches(target, source) {
            return Err(GraphError::CycleDetected(source, target));
        }

        for port in 0..inputs {
            let source_port = port.min(outputs - 1);
            let id = EdgeId::new(self.next_edge_id);
            self.next_edge_id += 1;
            self.edges.push(Edge::new(
                id,
                source,
                PortId::new(source_port as u8),
                target,
                PortId::new(port as u8),
            ));
        }
        self.dirty = true;
        Ok(())
    }

    /// 2ノード間のエッジをすべて削除
    pub fn disconnect(&mut self, source: NodeHandle, target: NodeHandle) -> bool {
        let len_before = self.edges.len();
        self.edges.retain(|e| !e.connects(source, target));
        let removed = self.edges.len() < len_before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn is_connected(&self, source: NodeHandle, target: NodeHandle) -> bool {
        self.edges.iter().any(|e| e.connects(source, target))
    }

    /// `from` から `to` へ到達可能か (cycle check)
    fn reaches(&self, from: NodeHandle, to: NodeHandle) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(handle) = stack.pop() {
            if handle == to {
                return true;
            }
            if seen.insert(handle) {
                stack.extend(self.edges_from(handle).map(|e| e.target));
            }
        }
        false
    }

    /// すべてのエッジを取得
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// エッジ数を取得
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// ターゲットノードへのエッジを取得
    pub fn edges_to(&self, target: NodeHandle) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target == target)
    }

    /// ソースノードからのエッジを取得
    pub fn edges_from(&self, source: NodeHandle) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source == source)
    }

    /// 処理順序を取得
    pub fn processing_order(&self) -> &[NodeHandle] {
        &self.processing_order
    }

    /// 処理順序を再計算（必要な場合のみ）
    pub fn rebuild_order_if_needed(&mut self) {
        if self.dirty {
            self.rebuild_order();
        }
    }

    /// 処理順序を再計算
    pub fn rebuild_order(&mut self) {
        self.processing_order = self.topological_sort();
        self.dirty = false;
    }

    /// トポロジカルソート (Kahn's algorithm)
    fn topological_sort(&self) -> Vec<NodeHandle> {
        let mut in_degree: HashMap<NodeHandle, usize> = HashMap::new();
        let mut adjacency: HashMap<NodeHandle, Vec<NodeHandle>> = HashMap::new();

        for &handle in self.nodes.keys() {
            in_degree.insert(handle, 0);
            adjacency.insert(handle, Vec::new());
        }

        // Count unique source->target pairs (multi-port edges count once)
        let pairs: HashSet<(NodeHandle, NodeHandle)> =
            self.edges.iter().map(|e| (e.source, e.target)).collect();
        for &(source, target) in &pairs {
            if let Some(adj) = adjacency.get_mut(&source) {
                adj.push(target);
            }
            if let Some(deg) = in_degree.get_mut(&target) {
                *deg += 1;
            }
        }

        // Start with nodes that have no incoming edges, Source first
        let mut roots: Vec<NodeHandle> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&handle, _)| handle)
            .collect();
        roots.sort_by_key(|h| {
            let rank = match self.nodes.get(h).map(|n| n.node_type()) {
                Some(NodeType::Source) => 0,
                Some(NodeType::Processor) => 1,
                Some(NodeType::Destination) => 2,
                None => 3,
            };
            (rank, *h)
        });
        let mut queue: VecDeque<_> = roots.into_iter().collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(handle) = queue.pop_front() {
            result.push(handle);

            if let Some(neighbors) = adjacency.get_mut(&handle) {
                neighbors.sort();
                for &neighbor in neighbors.iter() {
                    if let Some(deg) = in_degree.get_mut(&neighbor) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            log::warn!(
                "[AudioGraph] Cycle detected! Processed {} of {} nodes",
                result.len(),
                self.nodes.len()
            );
        }

        result
    }

    /// Temporarily take a node out for processing
    pub(crate) fn take_node(&mut self, handle: NodeHandle) -> Option<Box<dyn AudioNode>> {
        self.nodes.remove(&handle)
    }

    /// Put back a node taken with [`take_node`](Self::take_node)
    pub(crate) fn restore_node(&mut self, handle: NodeHandle, node: Box<dyn AudioNode>) {
        self.nodes.insert(handle, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::gain::GainNode;
    use crate::audio::sink::DestinationNode;

    fn gain(label: &str) -> Box<dyn AudioNode> {
        Box::new(GainNode::new(label, 2, 1.0, 0.0, 2.0).0)
    }

    #[test]
    fn test_add_remove_node() {
        let mut graph = AudioGraph::new(8);

        let handle = graph.add_node(gain("Test")).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(handle).is_some());

        graph.remove_node(handle);
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_node_limit() {
        let mut graph = AudioGraph::new(1);
        graph.add_node(gain("a")).unwrap();
        assert_eq!(
            graph.add_node(gain("b")).unwrap_err(),
            GraphError::NodeLimitReached(1)
        );
    }

    #[test]
    fn test_topological_sort() {
        let mut graph = AudioGraph::new(8);

        // Gain -> Gain -> Destination, added out of order
        let out = graph
            .add_node(Box::new(DestinationNode::new(2, "Out")))
            .unwrap();
        let b = graph.add_node(gain("b")).unwrap();
        let a = graph.add_node(gain("a")).unwrap();

        graph.connect(a, b).unwrap();
        graph.connect(b, out).unwrap();
        graph.rebuild_order();

        assert_eq!(graph.processing_order(), &[a, b, out]);
    }

    #[test]
    fn test_connect_creates_one_edge_per_channel() {
        let mut graph = AudioGraph::new(8);
        let a = graph.add_node(gain("a")).unwrap();
        let b = graph.add_node(gain("b")).unwrap();

        graph.connect(a, b).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.connect(a, b), Err(GraphError::DuplicateEdge(a, b)));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = AudioGraph::new(8);
        let a = graph.add_node(gain("a")).unwrap();
        let b = graph.add_node(gain("b")).unwrap();

        graph.connect(a, b).unwrap();
        assert_eq!(graph.connect(b, a), Err(GraphError::CycleDetected(b, a)));
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph = AudioGraph::new(8);
        let a = graph.add_node(gain("a")).unwrap();
        let b = graph.add_node(gain("b")).unwrap();
        graph.connect(a, b).unwrap();

        graph.remove_node(b);
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.is_connected(a, b));
    }
}
