//! Edge - connection between two node ports

use super::node::{NodeHandle, PortId};

/// Edge の一意識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u32);

impl EdgeId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// エッジ（接続）
///
/// ソースノードの出力ポートからターゲットノードの入力ポートへの接続。
/// レベル制御は GainNode が担うため、エッジは常にユニティゲイン。
#[derive(Debug, Clone)]
pub struct Edge {
    /// 一意な識別子
    pub id: EdgeId,
    /// ソースノード
    pub source: NodeHandle,
    /// ソースポート（チャンネル）
    pub source_port: PortId,
    /// ターゲットノード
    pub target: NodeHandle,
    /// ターゲットポート（チャンネル）
    pub target_port: PortId,
}

impl Edge {
    /// Create a new edge
    pub fn new(
        id: EdgeId,
        source: NodeHandle,
        source_port: PortId,
        target: NodeHandle,
        target_port: PortId,
    ) -> Self {
        Self {
            id,
            source,
            source_port,
            target,
            target_port,
        }
    }

    /// Whether this edge runs from `source` to `target` (any port)
    pub fn connects(&self, source: NodeHandle, target: NodeHandle) -> bool {
        self.source == source && self.target == target
    }
}
