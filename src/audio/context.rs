//! Audio Context - owns the graph and renders it
//!
//! The context is the capability the preview core drives: it creates nodes, wires
//! them, and renders the graph when the host pulls frames for the output device.
//! It is explicitly constructed and explicitly closed; there is no global instance.

use super::analyser::{AnalyserNode, AnalyserTap};
use super::biquad::{BiquadFilterNode, BiquadParams};
use super::gain::GainNode;
use super::graph::AudioGraph;
use super::meters::{GraphMeters, NodeMeter, PortMeter};
use super::node::{AudioNode, NodeHandle};
use super::param::AudioParam;
use super::pitch::{PitchParams, PitchShifterNode};
use super::sink::DestinationNode;
use super::source::MediaSourceNode;
use super::MAX_FRAMES;
use crate::error::GraphError;
use crate::media::{ElementId, MediaElement};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// コンテキストの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// 作成直後。resume() するまで無音
    Suspended,
    Running,
    /// close() 後。再利用不可
    Closed,
}

/// Construction options
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub sample_rate: f64,
    /// Destination channel count
    pub channels: usize,
    pub max_nodes: usize,
    pub analyser_fft_size: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            sample_rate: super::SAMPLE_RATE,
            channels: 2,
            max_nodes: 64,
            analyser_fft_size: 2048,
        }
    }
}

/// Snapshot of the wiring, for inspection and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// (handle, label), handle order
    pub nodes: Vec<(NodeHandle, String)>,
    /// Distinct (source, target) pairs, sorted
    pub edges: Vec<(NodeHandle, NodeHandle)>,
}

impl Topology {
    pub fn is_connected(&self, source: NodeHandle, target: NodeHandle) -> bool {
        self.edges.contains(&(source, target))
    }

    /// Follow single-successor links from `start`
    pub fn chain_from(&self, start: NodeHandle) -> Vec<NodeHandle> {
        let mut chain = vec![start];
        let mut current = start;
        while let Some(&(_, next)) = self.edges.iter().find(|(s, _)| *s == current) {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }
}

enum WiringOp {
    Connected(NodeHandle, NodeHandle),
    Disconnected(NodeHandle, NodeHandle),
}

/// 配線変更のトランザクション
///
/// グラフの書き込みロックを保持したまま実行されるので、レンダーは
/// 途中の状態を見ない。エラー時は適用済みの変更を逆順に戻す。
pub struct GraphTransaction<'a> {
    graph: &'a mut AudioGraph,
    log: Vec<WiringOp>,
}

impl GraphTransaction<'_> {
    pub fn connect(&mut self, source: NodeHandle, target: NodeHandle) -> Result<(), GraphError> {
        self.graph.connect(source, target)?;
        self.log.push(WiringOp::Connected(source, target));
        Ok(())
    }

    pub fn disconnect(&mut self, source: NodeHandle, target: NodeHandle) -> bool {
        let removed = self.graph.disconnect(source, target);
        if removed {
            self.log.push(WiringOp::Disconnected(source, target));
        }
        removed
    }

    /// Wire `nodes` in series
    pub fn connect_chain(&mut self, nodes: &[NodeHandle]) -> Result<(), GraphError> {
        for pair in nodes.windows(2) {
            self.connect(pair[0], pair[1])?;
        }
        Ok(())
    }

    pub fn is_connected(&self, source: NodeHandle, target: NodeHandle) -> bool {
        self.graph.is_connected(source, target)
    }

    fn rollback(self) {
        for op in self.log.into_iter().rev() {
            match op {
                WiringOp::Connected(s, t) => {
                    self.graph.disconnect(s, t);
                }
                WiringOp::Disconnected(s, t) => {
                    if let Err(e) = self.graph.connect(s, t) {
                        log::warn!("[AudioContext] Rollback could not restore {:?} -> {:?}: {}", s, t, e);
                    }
                }
            }
        }
    }
}

/// オーディオコンテキスト
///
/// ホストの出力コールバックから render() が呼ばれ、グラフ全体を処理する。
pub struct AudioContext {
    id: Uuid,
    options: ContextOptions,
    /// The audio graph (write lock while rendering or rewiring)
    graph: RwLock<AudioGraph>,
    /// Meters (ArcSwap for lock-free reads from UI thread)
    meters: ArcSwap<GraphMeters>,
    /// Processing timestamp
    timestamp: AtomicU64,
    state: RwLock<ContextState>,
    destination: NodeHandle,
    /// 要素は1コンテキストにつき1つのソースノードにしか束縛できない
    bound_elements: Mutex<HashSet<ElementId>>,
}

impl AudioContext {
    /// Create a suspended context with its destination node
    pub fn new(options: ContextOptions) -> Result<Self, GraphError> {
        let mut graph = AudioGraph::new(options.max_nodes);
        let destination =
            graph.add_node(Box::new(DestinationNode::new(options.channels, "destination")))?;

        let id = Uuid::new_v4();
        log::debug!("[AudioContext] Created {} @ {} Hz", id, options.sample_rate);

        Ok(Self {
            id,
            options,
            graph: RwLock::new(graph),
            meters: ArcSwap::from_pointee(GraphMeters::new()),
            timestamp: AtomicU64::new(0),
            state: RwLock::new(ContextState::Suspended),
            destination,
            bound_elements: Mutex::new(HashSet::new()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sample_rate(&self) -> f64 {
        self.options.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.options.channels
    }

    pub fn state(&self) -> ContextState {
        *self.state.read()
    }

    pub fn destination(&self) -> NodeHandle {
        self.destination
    }

    /// Start rendering. Must complete before the graph counts as connected.
    pub fn resume(&self) -> Result<(), GraphError> {
        let mut state = self.state.write();
        match *state {
            ContextState::Closed => Err(GraphError::ContextClosed),
            _ => {
                *state = ContextState::Running;
                Ok(())
            }
        }
    }

    pub fn suspend(&self) {
        let mut state = self.state.write();
        if *state == ContextState::Running {
            *state = ContextState::Suspended;
        }
    }

    /// Drop every node and edge. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == ContextState::Closed {
                return;
            }
            *state = ContextState::Closed;
        }
        let mut graph = self.graph.write();
        for handle in graph.node_handles() {
            graph.remove_node(handle);
        }
        graph.rebuild_order();
        self.bound_elements.lock().clear();
        self.meters.store(Arc::new(GraphMeters::new()));
        log::debug!("[AudioContext] Closed {}", self.id);
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.state() == ContextState::Closed {
            Err(GraphError::ContextClosed)
        } else {
            Ok(())
        }
    }

    /// Add a node to the graph
    pub fn add_node(&self, node: Box<dyn AudioNode>) -> Result<NodeHandle, GraphError> {
        self.ensure_open()?;
        let mut graph = self.graph.write();
        let handle = graph.add_node(node)?;
        graph.rebuild_order_if_needed();
        Ok(handle)
    }

    /// Remove a node from the graph (its edges go with it)
    pub fn remove_node(&self, handle: NodeHandle) -> bool {
        if handle == self.destination {
            return false;
        }
        let mut graph = self.graph.write();
        if let Some(source) = graph.node_as::<MediaSourceNode>(handle) {
            self.bound_elements.lock().remove(&source.element_id());
        }
        let removed = graph.remove_node(handle);
        graph.rebuild_order_if_needed();
        removed
    }

    /// Wrap a media element. Fails if the element has no source or is already wrapped.
    pub fn create_media_source(
        &self,
        element: Arc<dyn MediaElement>,
    ) -> Result<NodeHandle, GraphError> {
        self.ensure_open()?;
        if !element.has_source() {
            return Err(GraphError::NoSource);
        }
        let element_id = element.id();
        if self.bound_elements.lock().contains(&element_id) {
            return Err(GraphError::ElementAlreadyBound);
        }
        let handle = self.add_node(Box::new(MediaSourceNode::new(element, self.sample_rate())))?;
        self.bound_elements.lock().insert(element_id);
        Ok(handle)
    }

    pub fn create_gain(
        &self,
        label: &str,
        initial: f32,
        min: f32,
        max: f32,
    ) -> Result<(NodeHandle, AudioParam), GraphError> {
        let (node, gain) = GainNode::new(label, self.channels(), initial, min, max);
        Ok((self.add_node(Box::new(node))?, gain))
    }

    pub fn create_peaking_filter(
        &self,
        label: &str,
        frequency: f32,
        q: f32,
        gain_range: (f32, f32),
    ) -> Result<(NodeHandle, BiquadParams), GraphError> {
        let (node, params) = BiquadFilterNode::peaking(
            label,
            self.channels(),
            self.sample_rate(),
            frequency,
            q,
            gain_range,
        );
        Ok((self.add_node(Box::new(node))?, params))
    }

    pub fn create_analyser(&self, label: &str) -> Result<(NodeHandle, AnalyserTap), GraphError> {
        let (node, tap) = AnalyserNode::new(label, self.channels(), self.options.analyser_fft_size);
        Ok((self.add_node(Box::new(node))?, tap))
    }

    pub fn create_pitch_shifter(&self, label: &str) -> Result<(NodeHandle, PitchParams), GraphError> {
        let (node, params) = PitchShifterNode::new(label, self.channels(), self.sample_rate());
        Ok((self.add_node(Box::new(node))?, params))
    }

    /// Connect two nodes on every channel
    pub fn connect(&self, source: NodeHandle, target: NodeHandle) -> Result<(), GraphError> {
        self.transaction(|tx| tx.connect(source, target))
    }

    pub fn disconnect(&self, source: NodeHandle, target: NodeHandle) -> bool {
        let mut graph = self.graph.write();
        let removed = graph.disconnect(source, target);
        graph.rebuild_order_if_needed();
        removed
    }

    pub fn is_connected(&self, source: NodeHandle, target: NodeHandle) -> bool {
        self.graph.read().is_connected(source, target)
    }

    /// Apply several wiring changes atomically with respect to rendering
    pub fn transaction<F, R>(&self, f: F) -> Result<R, GraphError>
    where
        F: FnOnce(&mut GraphTransaction<'_>) -> Result<R, GraphError>,
    {
        self.ensure_open()?;
        let mut graph = self.graph.write();
        let mut tx = GraphTransaction {
            graph: &mut *graph,
            log: Vec::new(),
        };
        let result = f(&mut tx);
        if result.is_err() {
            tx.rollback();
        }
        graph.rebuild_order_if_needed();
        result
    }

    /// Execute with read access to the graph.
    ///
    /// Rendering needs the write lock, so parameter writes done inside `f` land in
    /// the same render quantum.
    pub fn with_graph<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AudioGraph) -> R,
    {
        let graph = self.graph.read();
        f(&graph)
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.read().edge_count()
    }

    pub fn topology(&self) -> Topology {
        let graph = self.graph.read();
        let nodes = graph
            .node_handles()
            .into_iter()
            .filter_map(|h| graph.get_node(h).map(|n| (h, n.label().to_string())))
            .collect();
        let mut edges: Vec<(NodeHandle, NodeHandle)> =
            graph.edges().iter().map(|e| (e.source, e.target)).collect();
        edges.sort();
        edges.dedup();
        Topology { nodes, edges }
    }

    /// Get current meters (lock-free read)
    pub fn meters(&self) -> Arc<GraphMeters> {
        self.meters.load_full()
    }

    /// オーディオ処理を実行
    ///
    /// `output` receives one buffer per destination channel, `frames` long.
    /// Returns false (and silence) unless the context is running.
    pub fn render(&self, frames: usize, output: &mut [Vec<f32>]) -> bool {
        let frames = frames.min(MAX_FRAMES);
        for channel in output.iter_mut() {
            channel.clear();
            channel.resize(frames, 0.0);
        }
        if self.state() != ContextState::Running {
            return false;
        }

        let mut graph = self.graph.write();
        graph.rebuild_order_if_needed();
        let order = graph.processing_order().to_vec();

        // 1. すべてのノードのバッファをクリア
        for &handle in &order {
            if let Some(node) = graph.get_node_mut(handle) {
                node.clear_buffers(frames);
            }
        }

        // 2. トポロジカル順でノードを処理
        for &handle in &order {
            let Some(mut node) = graph.take_node(handle) else {
                continue;
            };

            // 2a. このノードへの入力を集約（エッジからミックス）
            for edge in graph.edges_to(handle) {
                let Some(source) = graph.get_node(edge.source) else {
                    continue;
                };
                let Some(source_buf) = source.output_buffer(edge.source_port) else {
                    continue;
                };
                if let Some(target_buf) = node.input_buffer_mut(edge.target_port) {
                    target_buf.mix_from(source_buf, 1.0);
                }
            }

            // 2b. ノードの処理を実行
            node.process(frames);
            graph.restore_node(handle, node);
        }

        // 3. 出力をコピー
        if let Some(dest) = graph.node_as::<DestinationNode>(self.destination) {
            for (ch, out) in output.iter_mut().enumerate() {
                if let Some(samples) = dest.output_samples(ch) {
                    let len = out.len().min(samples.len());
                    out[..len].copy_from_slice(&samples[..len]);
                }
            }
        }

        // 4. メーターを更新
        self.update_meters(&graph);
        true
    }

    fn update_meters(&self, graph: &AudioGraph) {
        let mut meters = GraphMeters::new();
        meters.timestamp = self.timestamp.fetch_add(1, Ordering::Relaxed);

        for &handle in graph.processing_order() {
            if let Some(node) = graph.get_node(handle) {
                let mut node_meter = NodeMeter::new(handle, node.label());
                node_meter.inputs = node.input_peak_levels().into_iter().map(PortMeter::new).collect();
                node_meter.outputs = node.output_peak_levels().into_iter().map(PortMeter::new).collect();
                meters.nodes.push(node_meter);
            }
        }

        self.meters.store(Arc::new(meters));
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.close();
    }
}
