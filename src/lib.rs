//! Snipwave - real-time audio preview core
//!
//! The signal chain the editor plays through while the user drags fades, pitch,
//! volume and equalizer sliders, plus silence detection over the waveform envelope.
//!
//! ```text
//! MediaElement → source → [pitch] → [eq × 10] → master → fade → analyser → destination
//! ```
//!
//! The host owns the transport and the output device: it hands a [`MediaElement`]
//! to a [`PreviewSession`], drives a [`FrameScheduler`] (or uses the threaded one),
//! and pulls rendered blocks with [`PreviewSession::render`].

pub mod audio;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod dsp;
pub mod equalizer;
pub mod error;
pub mod fade;
pub mod media;
pub mod scheduler;
pub mod session;
pub mod silence;

pub use config::PreviewConfig;
pub use controller::AudioGraphController;
pub use equalizer::{EqualizerBank, BAND_COUNT, EQ_FREQUENCIES};
pub use error::{ConfigError, FadeConfigError, GraphError};
pub use fade::{compute_multiplier, FadeConfig, FadeEnvelopeEngine, FadeParams, FadeState};
pub use media::{BufferedMediaElement, ElementId, MediaElement};
pub use scheduler::{FrameScheduler, ManualFrameScheduler, ThreadedFrameScheduler};
pub use session::PreviewSession;
pub use silence::{SilenceQuery, SilenceRegion, SilenceRegionDetector};
