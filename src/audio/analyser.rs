//! Analyser Node - read-only tap before the destination

use super::node::{AudioNode, NodeType, Ports};
use crate::dsp::Dsp;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use std::any::Any;
use std::sync::Arc;

/// 可視化用のタップ
///
/// 直近 `fft_size` サンプル（全チャンネル平均）を保持する。UI スレッドから読む。
#[derive(Clone)]
pub struct AnalyserTap {
    history: Arc<Mutex<HeapRb<f32>>>,
    fft_size: usize,
}

impl AnalyserTap {
    fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32);
        Self {
            history: Arc::new(Mutex::new(HeapRb::new(fft_size))),
            fft_size,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Most recent samples, oldest first (zero-padded at the front until full)
    pub fn time_domain_data(&self) -> Vec<f32> {
        let history = self.history.lock();
        let mut out = vec![0.0; self.fft_size - history.occupied_len()];
        out.extend(history.iter().copied());
        out
    }

    pub fn peak(&self) -> f32 {
        let history = self.history.lock();
        history.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Peak in dBFS (-inf for silence)
    pub fn peak_db(&self) -> f32 {
        Dsp::to_db(self.peak())
    }

    pub fn rms(&self) -> f32 {
        Dsp::rms(&self.time_domain_data())
    }

    fn record(&self, ports: &Ports) {
        let Some(first) = ports.outputs.first() else {
            return;
        };
        let channels = ports.outputs.len() as f32;
        let mut history = self.history.lock();
        for i in 0..first.valid_frames() {
            let sum: f32 = ports
                .outputs
                .iter()
                .map(|b| b.samples().get(i).copied().unwrap_or(0.0))
                .sum();
            history.push_overwrite(sum / channels);
        }
    }
}

/// アナライザノード
///
/// 信号は変更せずに通過させ、タップへ書き込むだけ。
pub struct AnalyserNode {
    label: String,
    ports: Ports,
    tap: AnalyserTap,
}

impl AnalyserNode {
    pub fn new(label: impl Into<String>, channels: usize, fft_size: usize) -> (Self, AnalyserTap) {
        let tap = AnalyserTap::new(fft_size);
        let node = Self {
            label: label.into(),
            ports: Ports::symmetric(channels.max(1)),
            tap: tap.clone(),
        };
        (node, tap)
    }
}

impl AudioNode for AnalyserNode {
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
        self.ports.copy_through(frames);
        for buf in &mut self.ports.outputs {
            buf.update_meters();
        }
        self.tap.record(&self.ports);
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
    fn test_tap_keeps_latest_samples() {
        let (mut node, tap) = AnalyserNode::new("an", 2, 32);
        node.clear_buffers(40);
        for buf in &mut node.ports_mut().inputs {
            let samples: Vec<f32> = (0..40).map(|i| i as f32 / 40.0).collect();
            buf.write_samples(&samples);
        }
        node.process(40);

        let data = tap.time_domain_data();
        assert_eq!(data.len(), 32);
        assert_eq!(data[31], 39.0 / 40.0);
        assert_eq!(data[0], 8.0 / 40.0);
        assert_eq!(tap.peak(), 39.0 / 40.0);
    }

    #[test]
    fn test_signal_passes_unchanged() {
        let (mut node, _tap) = AnalyserNode::new("an", 1, 64);
        node.clear_buffers(3);
        node.ports_mut().inputs[0].write_samples(&[0.1, -0.2, 0.3]);
        node.process(3);
        assert_eq!(node.ports().outputs[0].samples(), &[0.1, -0.2, 0.3]);
    }
}
