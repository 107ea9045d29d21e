//! Gain Node - scalar multiplier stage

use super::node::{AudioNode, NodeType, Ports};
use super::param::AudioParam;
use std::any::Any;

/// ゲインノード
///
/// 全チャンネルに同じ倍率を掛ける。マスター音量とフェードの両方で使う。
pub struct GainNode {
    /// 表示ラベル
    label: String,
    /// 入出力バッファ
    ports: Ports,
    /// 倍率
    gain: AudioParam,
}

impl GainNode {
    /// Create a gain node and the handle used to automate it
    pub fn new(
        label: impl Into<String>,
        channels: usize,
        initial: f32,
        min: f32,
        max: f32,
    ) -> (Self, AudioParam) {
        let gain = AudioParam::new(initial, min, max);
        let node = Self {
            label: label.into(),
            ports: Ports::symmetric(channels.max(1)),
            gain: gain.clone(),
        };
        (node, gain)
    }

    pub fn gain(&self) -> &AudioParam {
        &self.gain
    }
}

impl AudioNode for GainNode {
    fn node_type(&self) -> NodeType {
        NodeType::Processor
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
        let gain = self.gain.value();
        self.ports.copy_through(frames);
        for buf in &mut self.ports.outputs {
            buf.apply_gain(gain);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_applied() {
        let (mut node, gain) = GainNode::new("g", 1, 1.0, 0.0, 2.0);
        node.clear_buffers(4);
        node.ports_mut().inputs[0].write_samples(&[0.5; 4]);
        gain.set_value(2.0);

        node.process(4);
        assert_eq!(node.ports().outputs[0].samples(), &[1.0; 4]);
    }
}
