//! Source Node - wraps a playable media element

use super::node::{AudioNode, NodeType, Ports};
use crate::media::{ElementId, MediaElement};
use std::any::Any;
use std::sync::Arc;

/// メディア要素ソースノード
///
/// 要素ごとに1つだけ作成できる。レンダーのたびに要素から PCM を引き出し、
/// 要素側の再生位置が進む。
pub struct MediaSourceNode {
    /// 再生元の要素
    element: Arc<dyn MediaElement>,
    /// 表示ラベル
    label: String,
    /// 出力バッファ（要素のチャンネル数分）
    ports: Ports,
    /// コンテキストのサンプルレート
    sample_rate: f64,
}

impl MediaSourceNode {
    pub fn new(element: Arc<dyn MediaElement>, sample_rate: f64) -> Self {
        let channels = element.channel_count().max(1);
        Self {
            label: format!("media:{}", element.id()),
            element,
            ports: Ports::new(0, channels),
            sample_rate,
        }
    }

    pub fn element_id(&self) -> ElementId {
        self.element.id()
    }
}

impl AudioNode for MediaSourceNode {
    fn node_type(&self) -> NodeType {
        NodeType::Source
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
        for buf in &mut self.ports.outputs {
            buf.set_valid_frames(frames);
        }
        self.element
            .render(&mut self.ports.outputs, frames, self.sample_rate);
        for buf in &mut self.ports.outputs {
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
