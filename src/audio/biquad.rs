//! Biquad Filter Node - peaking EQ stage (Transposed Direct Form II)

use super::node::{AudioNode, NodeType, Ports};
use super::param::AudioParam;
use std::any::Any;
use std::f64::consts::PI;

/// Biquad coefficients (normalized by a0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Pass-through
    pub const IDENTITY: BiquadCoeffs = BiquadCoeffs {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Calculate peaking EQ filter coefficients
    /// gain_db: gain in decibels
    pub fn peaking(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        // Keep the centre below Nyquist and Q positive
        let freq = freq.clamp(1.0, sample_rate * 0.499);
        let q = q.max(1e-4);

        let a = 10.0_f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha / a;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Magnitude response at `freq` (linear)
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Per-channel filter state
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    #[inline]
    fn process_sample(&mut self, c: &BiquadCoeffs, input: f64) -> f64 {
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }
}

/// Handles to the automatable filter parameters
#[derive(Debug, Clone)]
pub struct BiquadParams {
    pub frequency: AudioParam,
    pub q: AudioParam,
    pub gain_db: AudioParam,
}

/// ピーキングフィルタノード
///
/// パラメータが変化したときだけ係数を再計算する。
pub struct BiquadFilterNode {
    label: String,
    ports: Ports,
    params: BiquadParams,
    sample_rate: f64,
    coeffs: BiquadCoeffs,
    /// (frequency, q, gain) used for the current coefficients
    last: (f32, f32, f32),
    states: Vec<BiquadState>,
}

impl BiquadFilterNode {
    pub fn peaking(
        label: impl Into<String>,
        channels: usize,
        sample_rate: f64,
        frequency: f32,
        q: f32,
        gain_range: (f32, f32),
    ) -> (Self, BiquadParams) {
        let channels = channels.max(1);
        let nyquist = (sample_rate * 0.5) as f32;
        let params = BiquadParams {
            frequency: AudioParam::new(frequency, 10.0, nyquist),
            q: AudioParam::new(q, 0.0001, 1000.0),
            gain_db: AudioParam::new(0.0, gain_range.0, gain_range.1),
        };
        let mut node = Self {
            label: label.into(),
            ports: Ports::symmetric(channels),
            params: params.clone(),
            sample_rate,
            coeffs: BiquadCoeffs::IDENTITY,
            last: (f32::NAN, f32::NAN, f32::NAN),
            states: vec![BiquadState::default(); channels],
        };
        node.refresh_coeffs();
        (node, params)
    }

    pub fn params(&self) -> &BiquadParams {
        &self.params
    }

    pub fn coeffs(&self) -> BiquadCoeffs {
        self.coeffs
    }

    fn refresh_coeffs(&mut self) {
        let current = (
            self.params.frequency.value(),
            self.params.q.value(),
            self.params.gain_db.value(),
        );
        if current == self.last {
            return;
        }
        self.coeffs = BiquadCoeffs::peaking(
            current.0 as f64,
            current.1 as f64,
            current.2 as f64,
            self.sample_rate,
        );
        self.last = current;
    }
}

impl AudioNode for BiquadFilterNode {
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
        self.refresh_coeffs();
        self.ports.copy_through(frames);

        let coeffs = self.coeffs;
        for (buf, state) in self.ports.outputs.iter_mut().zip(self.states.iter_mut()) {
            for s in buf.samples_mut() {
                *s = state.process_sample(&coeffs, *s as f64) as f32;
            }
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
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_flat_gain_is_identity() {
        let c = BiquadCoeffs::peaking(1000.0, 1.0, 0.0, 48000.0);
        assert_abs_diff_eq!(c.magnitude_at(1000.0, 48000.0), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.magnitude_at(100.0, 48000.0), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_peak_gain_at_centre() {
        let c = BiquadCoeffs::peaking(1000.0, 1.0, 12.0, 48000.0);
        let db = 20.0 * c.magnitude_at(1000.0, 48000.0).log10();
        assert_abs_diff_eq!(db, 12.0, epsilon = 0.01);
    }

    #[test]
    fn test_coefficients_follow_params() {
        let (mut node, params) =
            BiquadFilterNode::peaking("eq", 1, 48000.0, 1000.0, 1.0, (-12.0, 12.0));
        let flat = node.coeffs();

        params.gain_db.set_value(6.0);
        node.clear_buffers(16);
        node.process(16);
        assert_ne!(node.coeffs(), flat);
    }
}
