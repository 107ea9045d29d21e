//! Audio Buffer implementation

use super::MAX_FRAMES;
use crate::dsp::Dsp;

/// モノラルオーディオバッファ
///
/// 1ポート = 1チャンネル。レンダー中に確保は行わない。
pub struct AudioBuffer {
    data: Box<[f32; MAX_FRAMES]>,
    valid_frames: usize,
    /// Cached peak level (updated during process)
    peak: f32,
    /// Cached RMS level (updated during process)
    rms: f32,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::new([0.0; MAX_FRAMES]),
            valid_frames: 0,
            peak: 0.0,
            rms: 0.0,
        }
    }

    /// Clear the buffer (fill with zeros)
    pub fn clear(&mut self, frames: usize) {
        let frames = frames.min(MAX_FRAMES);
        Dsp::clear(&mut self.data[..frames]);
        self.valid_frames = frames;
        self.peak = 0.0;
        self.rms = 0.0;
    }

    /// Get the number of valid frames
    pub fn valid_frames(&self) -> usize {
        self.valid_frames
    }

    /// Set the number of valid frames
    pub fn set_valid_frames(&mut self, frames: usize) {
        self.valid_frames = frames.min(MAX_FRAMES);
    }

    /// Get samples as a slice
    pub fn samples(&self) -> &[f32] {
        &self.data[..self.valid_frames]
    }

    /// Get samples as a mutable slice
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.valid_frames]
    }

    /// Mix from another buffer with gain: self += source * gain
    pub fn mix_from(&mut self, source: &AudioBuffer, gain: f32) {
        let frames = self.valid_frames.min(source.valid_frames);
        if frames > 0 && gain.abs() > 0.0001 {
            Dsp::mix_add(&source.data[..frames], gain, &mut self.data[..frames]);
        }
    }

    /// Copy from another buffer
    pub fn copy_from(&mut self, source: &AudioBuffer) {
        let frames = self.valid_frames.min(source.valid_frames);
        self.data[..frames].copy_from_slice(&source.data[..frames]);
    }

    /// Apply gain in-place
    pub fn apply_gain(&mut self, gain: f32) {
        Dsp::apply_gain(&mut self.data[..self.valid_frames], gain);
    }

    /// Get cached peak level without recalculating
    pub fn cached_peak(&self) -> f32 {
        self.peak
    }

    /// Get cached RMS level without recalculating
    pub fn cached_rms(&self) -> f32 {
        self.rms
    }

    /// Update both peak and RMS caches
    pub fn update_meters(&mut self) {
        let samples = &self.data[..self.valid_frames];
        self.peak = Dsp::peak(samples);
        self.rms = Dsp::rms(samples);
    }

    /// Write raw samples directly into the buffer
    pub fn write_samples(&mut self, samples: &[f32]) {
        let frames = samples.len().min(MAX_FRAMES);
        self.data[..frames].copy_from_slice(&samples[..frames]);
        self.valid_frames = frames;
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_respects_valid_frames() {
        let mut src = AudioBuffer::new();
        src.write_samples(&[1.0; 4]);

        let mut dst = AudioBuffer::new();
        dst.clear(8);
        dst.mix_from(&src, 0.5);

        assert_eq!(&dst.samples()[..4], &[0.5; 4]);
        assert_eq!(&dst.samples()[4..], &[0.0; 4]);
    }

    #[test]
    fn test_meters() {
        let mut buf = AudioBuffer::new();
        buf.write_samples(&[0.5, -1.0, 0.25]);
        buf.update_meters();
        assert_eq!(buf.cached_peak(), 1.0);
        assert!(buf.cached_rms() > 0.0);
    }
}
