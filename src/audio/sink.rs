//! Destination Node - end of the chain

use super::node::{AudioNode, NodeType, Ports};
use std::any::Any;

/// 出力先ノード
///
/// コンテキストごとに1つ。ホストは render() の後にここから読み出して
/// 出力デバイスへ渡す。
pub struct DestinationNode {
    /// 表示ラベル
    label: String,
    /// 入力バッファ（チャンネル数分）
    ports: Ports,
}

impl DestinationNode {
    pub fn new(channels: usize, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::new(channels.max(1), 0),
        }
    }

    /// Get input buffer samples for output
    pub fn output_samples(&self, port: usize) -> Option<&[f32]> {
        self.ports.inputs.get(port).map(|b| b.samples())
    }
}

impl AudioNode for DestinationNode {
    fn node_type(&self) -> NodeType {
        NodeType::Destination
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut Ports {
        &mut self.ports
    }

    fn process(&mut self, frames: usize) {
        // 入力バッファのピークを更新するのみ
        for buf in &mut self.ports.inputs {
            buf.set_valid_frames(frames);
            buf.update_meters();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
