//! Portable buffer math used by the graph nodes

/// Buffer operations on plain `f32` slices
pub struct Dsp;

impl Dsp {
    /// Mix two buffers with a gain factor: out = out + (input * gain)
    #[inline]
    pub fn mix_add(input: &[f32], gain: f32, output: &mut [f32]) {
        for (o, &i) in output.iter_mut().zip(input) {
            *o += i * gain;
        }
    }

    /// Apply gain to a buffer in-place: buf = buf * gain
    #[inline]
    pub fn apply_gain(buf: &mut [f32], gain: f32) {
        if gain == 1.0 {
            return;
        }
        for s in buf.iter_mut() {
            *s *= gain;
        }
    }

    /// Clear a buffer (fill with zeros)
    #[inline]
    pub fn clear(buf: &mut [f32]) {
        buf.fill(0.0);
    }

    /// Calculate RMS level of a buffer
    #[inline]
    pub fn rms(buf: &[f32]) -> f32 {
        if buf.is_empty() {
            return 0.0;
        }
        let sum: f32 = buf.iter().map(|s| s * s).sum();
        (sum / buf.len() as f32).sqrt()
    }

    /// Get peak (maximum absolute value) of a buffer
    #[inline]
    pub fn peak(buf: &[f32]) -> f32 {
        buf.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Convert linear amplitude to dB (with -infinity handling)
    #[inline]
    pub fn to_db(linear: f32) -> f32 {
        if linear <= 0.0 {
            -f32::INFINITY
        } else {
            20.0 * linear.log10()
        }
    }

    /// Convert dB to linear amplitude
    #[inline]
    pub fn from_db(db: f32) -> f32 {
        10.0_f32.powf(db / 20.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_add() {
        let input = vec![1.0_f32; 256];
        let mut output = vec![0.5_f32; 256];
        Dsp::mix_add(&input, 0.5, &mut output);
        assert!((output[0] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_rms() {
        let buf = vec![1.0_f32; 256];
        let rms = Dsp::rms(&buf);
        assert!((rms - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_db_conversion() {
        assert!((Dsp::from_db(-30.0) - 0.031_622_78).abs() < 1e-6);
        assert!((Dsp::to_db(1.0)).abs() < 1e-6);
        assert_eq!(Dsp::to_db(0.0), -f32::INFINITY);
    }
}
