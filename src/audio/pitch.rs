//! Pitch Shifter Node - delay-line pitch shifting with two crossfaded taps
//!
//! A custom per-sample stage: the read position of a short delay line sweeps at
//! `1 - ratio` samples per sample, and two taps half a window apart are crossfaded
//! with a sin² window so their weights always sum to one. Pitch changes without
//! changing duration, which is what the preview needs while the native element
//! keeps ownership of playback speed.

use super::node::{AudioNode, NodeType, Ports};
use super::param::AudioParam;
use std::any::Any;
use std::f32::consts::PI;

/// Shift range (semitones)
pub const PITCH_RANGE_SEMITONES: f32 = 12.0;

/// Window length (seconds)
const WINDOW_SECONDS: f64 = 0.05;

/// Handles to the automatable pitch parameters
#[derive(Debug, Clone)]
pub struct PitchParams {
    /// Shift in semitones
    pub pitch: AudioParam,
    /// Extra resampling factor on top of `pitch`. Kept at 1.0 by the controller.
    pub rate: AudioParam,
}

impl PitchParams {
    /// Playback-speed ratio of the read taps
    pub fn ratio(&self) -> f32 {
        2.0_f32.powf(self.pitch.value() / 12.0) * self.rate.value()
    }

    pub fn is_neutral(&self) -> bool {
        (self.ratio() - 1.0).abs() < 1e-6
    }
}

struct DelayLine {
    data: Vec<f32>,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    /// Linear interpolation `delay` samples behind `write_pos`
    #[inline]
    fn read(&self, write_pos: usize, delay: f32) -> f32 {
        let len = self.data.len();
        let pos = write_pos as f32 - delay;
        let pos = if pos < 0.0 { pos + len as f32 } else { pos };
        let i0 = pos.floor() as usize % len;
        let i1 = (i0 + 1) % len;
        let frac = pos - pos.floor();
        self.data[i0] * (1.0 - frac) + self.data[i1] * frac
    }
}

/// ピッチシフトノード
///
/// 一度挿入されたら常駐する。ニュートラル（ratio = 1）のときは
/// 遅延ラインに書き込みつつ入力をそのまま出力する。
pub struct PitchShifterNode {
    label: String,
    ports: Ports,
    params: PitchParams,
    lines: Vec<DelayLine>,
    write_pos: usize,
    /// Window length in samples
    window: f32,
    /// Sweep position of the first tap in [0, 1)
    phase: f32,
}

impl PitchShifterNode {
    pub fn new(label: impl Into<String>, channels: usize, sample_rate: f64) -> (Self, PitchParams) {
        let channels = channels.max(1);
        let window = (sample_rate * WINDOW_SECONDS).max(64.0) as usize;
        let line_len = (window * 2 + 4).next_power_of_two();
        let params = PitchParams {
            pitch: AudioParam::new(0.0, -PITCH_RANGE_SEMITONES, PITCH_RANGE_SEMITONES),
            rate: AudioParam::new(1.0, 0.25, 4.0),
        };
        let node = Self {
            label: label.into(),
            ports: Ports::symmetric(channels),
            params: params.clone(),
            lines: (0..channels).map(|_| DelayLine::new(line_len)).collect(),
            write_pos: 0,
            window: window as f32,
            phase: 0.0,
        };
        (node, params)
    }

    pub fn params(&self) -> &PitchParams {
        &self.params
    }

    #[inline]
    fn tap_weight(phase: f32) -> f32 {
        let s = (PI * phase).sin();
        s * s
    }
}

impl AudioNode for PitchShifterNode {
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
        let ratio = self.params.ratio();
        let neutral = (ratio - 1.0).abs() < 1e-6;
        let step = (1.0 - ratio) / self.window;
        let line_len = self.lines.first().map(|l| l.data.len()).unwrap_or(1);

        for out in &mut self.ports.outputs {
            out.set_valid_frames(frames);
        }

        for i in 0..frames {
            let phase_a = self.phase;
            let phase_b = (self.phase + 0.5).fract();
            let delay_a = phase_a * self.window + 1.0;
            let delay_b = phase_b * self.window + 1.0;
            let (w_a, w_b) = (Self::tap_weight(phase_a), Self::tap_weight(phase_b));

            for (ch, line) in self.lines.iter_mut().enumerate() {
                let input = self.ports.inputs[ch].samples().get(i).copied().unwrap_or(0.0);
                line.data[self.write_pos] = input;

                let value = if neutral {
                    input
                } else {
                    line.read(self.write_pos, delay_a) * w_a
                        + line.read(self.write_pos, delay_b) * w_b
                };
                if let Some(s) = self.ports.outputs[ch].samples_mut().get_mut(i) {
                    *s = value;
                }
            }

            self.write_pos = (self.write_pos + 1) % line_len;
            if !neutral {
                self.phase = (self.phase + step).rem_euclid(1.0);
            }
        }

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

#[cfg(test)]
mod tests {
    use super::*;

    fn run(node: &mut PitchShifterNode, input: &[f32]) -> Vec<f32> {
        node.clear_buffers(input.len());
        node.ports_mut().inputs[0].write_samples(input);
        node.process(input.len());
        node.ports().outputs[0].samples().to_vec()
    }

    #[test]
    fn test_neutral_is_passthrough() {
        let (mut node, params) = PitchShifterNode::new("pitch", 1, 48000.0);
        assert!(params.is_neutral());

        let input: Vec<f32> = (0..128).map(|i| (i as f32 * 0.1).sin()).collect();
        assert_eq!(run(&mut node, &input), input);
    }

    #[test]
    fn test_crossfade_weights_sum_to_one() {
        for k in 0..20 {
            let p = k as f32 / 20.0;
            let sum = PitchShifterNode::tap_weight(p) + PitchShifterNode::tap_weight((p + 0.5).fract());
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_shifted_dc_keeps_level() {
        let (mut node, params) = PitchShifterNode::new("pitch", 1, 48000.0);
        params.pitch.set_value(5.0);

        // Fill the delay line, then a constant input must come out constant
        let input = vec![0.5_f32; 4096];
        run(&mut node, &input);
        let out = run(&mut node, &input);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_pitch_param_clamped() {
        let (_node, params) = PitchShifterNode::new("pitch", 2, 48000.0);
        params.pitch.set_value(40.0);
        assert_eq!(params.pitch.value(), PITCH_RANGE_SEMITONES);
    }
}
