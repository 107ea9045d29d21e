//! Playable media handle
//!
//! The preview core only needs a position clock, a paused flag, a loaded-source
//! check and a way to pull PCM. Decoding lives outside this crate; the host hands
//! decoded channels to [`BufferedMediaElement`] or implements [`MediaElement`]
//! over its own player.

use crate::audio::AudioBuffer;
use parking_lot::Mutex;
use std::fmt;
use uuid::Uuid;

/// Stable identity of a media element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A playable media element
pub trait MediaElement: Send + Sync {
    fn id(&self) -> ElementId;

    /// Whether a decoded source is loaded
    fn has_source(&self) -> bool;

    /// Playback position in seconds
    fn current_time(&self) -> f64;

    fn set_current_time(&self, seconds: f64);

    /// Total length in seconds
    fn duration(&self) -> f64;

    fn is_paused(&self) -> bool;

    /// Native element volume (0..=1)
    fn volume(&self) -> f32;

    fn set_volume(&self, volume: f32);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&self, rate: f64);

    fn channel_count(&self) -> usize;

    /// Fill `outputs` with the next `frames` frames at `output_sample_rate` and
    /// advance the clock. Paused or ended elements write silence.
    fn render(&self, outputs: &mut [AudioBuffer], frames: usize, output_sample_rate: f64);
}

#[derive(Debug)]
struct PlaybackState {
    /// Position in source frames (fractional while resampling)
    position: f64,
    paused: bool,
    volume: f32,
    playback_rate: f64,
}

/// Decoded PCM held in memory, with a transport
pub struct BufferedMediaElement {
    id: ElementId,
    channels: Vec<Vec<f32>>,
    sample_rate: f64,
    state: Mutex<PlaybackState>,
}

impl BufferedMediaElement {
    /// Planar channels, all the same length
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: f64) -> Self {
        Self {
            id: ElementId::new(),
            channels,
            sample_rate,
            state: Mutex::new(PlaybackState {
                position: 0.0,
                paused: true,
                volume: 1.0,
                playback_rate: 1.0,
            }),
        }
    }

    pub fn from_mono(samples: Vec<f32>, sample_rate: f64) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// Element with nothing loaded
    pub fn empty() -> Self {
        Self::new(Vec::new(), 48000.0)
    }

    fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn play(&self) {
        if self.has_source() {
            self.state.lock().paused = false;
        }
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    #[inline]
    fn sample_at(&self, channel: usize, position: f64) -> f32 {
        let data = &self.channels[channel.min(self.channels.len() - 1)];
        let i0 = position.floor() as usize;
        let frac = (position - position.floor()) as f32;
        let a = data.get(i0).copied().unwrap_or(0.0);
        let b = data.get(i0 + 1).copied().unwrap_or(a);
        a + (b - a) * frac
    }
}

impl MediaElement for BufferedMediaElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn has_source(&self) -> bool {
        self.frame_count() > 0 && self.sample_rate > 0.0
    }

    fn current_time(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.state.lock().position / self.sample_rate
    }

    fn set_current_time(&self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        let frames = seconds.clamp(0.0, self.duration()) * self.sample_rate;
        self.state.lock().position = frames;
    }

    fn duration(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    fn set_volume(&self, volume: f32) {
        if volume.is_finite() {
            self.state.lock().volume = volume.clamp(0.0, 1.0);
        }
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().playback_rate
    }

    fn set_playback_rate(&self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.state.lock().playback_rate = rate;
        }
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn render(&self, outputs: &mut [AudioBuffer], frames: usize, output_sample_rate: f64) {
        for buf in outputs.iter_mut() {
            buf.samples_mut().fill(0.0);
        }

        let mut state = self.state.lock();
        if state.paused || !self.has_source() || output_sample_rate <= 0.0 {
            return;
        }

        let total = self.frame_count() as f64;
        let step = state.playback_rate * self.sample_rate / output_sample_rate;
        let volume = state.volume;

        for i in 0..frames {
            if state.position >= total {
                // 終端に到達したら停止
                state.position = total;
                state.paused = true;
                break;
            }
            for (ch, buf) in outputs.iter_mut().enumerate() {
                if let Some(s) = buf.samples_mut().get_mut(i) {
                    *s = self.sample_at(ch, state.position) * volume;
                }
            }
            state.position += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(element: &BufferedMediaElement, frames: usize) -> Vec<f32> {
        let mut bufs = vec![AudioBuffer::new()];
        bufs[0].clear(frames);
        element.render(&mut bufs, frames, element.sample_rate);
        bufs[0].samples().to_vec()
    }

    #[test]
    fn test_paused_renders_silence() {
        let element = BufferedMediaElement::from_mono(vec![1.0; 100], 100.0);
        assert_eq!(render(&element, 10), vec![0.0; 10]);
        assert_eq!(element.current_time(), 0.0);
    }

    #[test]
    fn test_playback_advances_clock() {
        let element = BufferedMediaElement::from_mono(vec![1.0; 100], 100.0);
        element.play();
        render(&element, 50);
        assert!((element.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_end_pauses() {
        let element = BufferedMediaElement::from_mono(vec![1.0; 10], 100.0);
        element.play();
        let out = render(&element, 20);
        assert_eq!(&out[..10], &[1.0; 10]);
        assert_eq!(&out[10..], &[0.0; 10]);
        assert!(element.is_paused());
    }

    #[test]
    fn test_volume_and_rate() {
        let element = BufferedMediaElement::from_mono(vec![1.0; 100], 100.0);
        element.set_volume(0.5);
        element.set_playback_rate(2.0);
        element.play();
        let out = render(&element, 10);
        assert_eq!(out, vec![0.5; 10]);
        assert!((element.current_time() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_has_no_source() {
        let element = BufferedMediaElement::empty();
        assert!(!element.has_source());
        element.play();
        assert!(element.is_paused());
    }
}
