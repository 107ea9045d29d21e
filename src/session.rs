//! Preview Session - the interface the host UI talks to
//!
//! Composes the graph controller, the fade engine, the silence detector and the
//! sweep debouncer. One session per open file.

use crate::audio::{AnalyserTap, AudioParam};
use crate::config::PreviewConfig;
use crate::controller::AudioGraphController;
use crate::debounce::Debouncer;
use crate::equalizer::BAND_COUNT;
use crate::error::FadeConfigError;
use crate::fade::{FadeConfig, FadeEnvelopeEngine, FadeParams, FadeState};
use crate::media::MediaElement;
use crate::scheduler::{FrameScheduler, ThreadedFrameScheduler};
use crate::silence::{SilenceQuery, SilenceRegion, SilenceRegionDetector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct PreviewSession {
    config: PreviewConfig,
    controller: AudioGraphController,
    fade: FadeEnvelopeEngine,
    /// Context the fade engine is attached to
    fade_context: Option<Uuid>,
    silence: SilenceRegionDetector,
    sweep: Debouncer<Arc<[SilenceRegion]>>,
}

impl PreviewSession {
    pub fn new(config: PreviewConfig, scheduler: Arc<dyn FrameScheduler>) -> Self {
        let controller = AudioGraphController::new(&config);
        let silence = SilenceRegionDetector::new(&config.silence);
        let sweep = Debouncer::new(Duration::from_millis(config.silence.debounce_ms));
        Self {
            config,
            controller,
            fade: FadeEnvelopeEngine::new(scheduler),
            fade_context: None,
            silence,
            sweep,
        }
    }

    /// Session whose fade loop runs on its own ~`frame_interval_ms` ticker thread
    pub fn with_threaded_scheduler(config: PreviewConfig) -> Self {
        let interval = Duration::from_millis(config.frame_interval_ms.max(1));
        Self::new(config, Arc::new(ThreadedFrameScheduler::spawn(interval)))
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn controller(&self) -> &AudioGraphController {
        &self.controller
    }

    // ------------------------------------------------------------------
    // Graph
    // ------------------------------------------------------------------

    /// Connect the element to the preview chain (idempotent)
    pub fn connect_audio_element(&mut self, element: Arc<dyn MediaElement>) -> bool {
        if !self.controller.connect(element) {
            return false;
        }
        self.sync_fade_target();
        true
    }

    fn sync_fade_target(&mut self) {
        let context_id = self.controller.context().map(|ctx| ctx.id());
        if context_id == self.fade_context {
            return;
        }
        self.fade.detach();
        if let Some(param) = self.controller.fade_gain_param() {
            self.fade.attach(param);
        }
        self.fade_context = context_id;
    }

    /// Cancel the fade loop, then tear the graph down. Safe to repeat.
    pub fn disconnect(&mut self) {
        self.fade.detach();
        self.fade_context = None;
        self.sweep.cancel();
        self.controller.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    /// Pull one block of rendered audio for the output device
    pub fn render(&self, output: &mut [Vec<f32>]) -> bool {
        match self.controller.context() {
            Some(ctx) => ctx.render(self.config.render_quantum, output),
            None => {
                for channel in output.iter_mut() {
                    channel.clear();
                    channel.resize(self.config.render_quantum, 0.0);
                }
                false
            }
        }
    }

    pub fn analyser(&self) -> Option<AnalyserTap> {
        self.controller.analyser()
    }

    // ------------------------------------------------------------------
    // Fade
    // ------------------------------------------------------------------

    /// Validate and install a new fade configuration.
    ///
    /// If the element is playing the loop is (re)started so the change is heard
    /// on the next frame.
    pub fn update_fade_config(&mut self, params: FadeParams) -> Result<(), FadeConfigError> {
        let config = FadeConfig::new(params)?;
        self.fade.update_config(config);
        self.refresh_fade();
        Ok(())
    }

    /// Drop the selection; fades stop applying
    pub fn clear_fade_selection(&mut self, total_duration: f64) {
        self.fade.update_config(FadeConfig::no_selection(total_duration));
        self.refresh_fade();
    }

    fn refresh_fade(&self) {
        if let Some(element) = self.controller.element() {
            if !element.is_paused() {
                self.fade.set_active(true, element);
            }
        }
    }

    /// Host transport changed play state
    pub fn set_fade_active(&self, is_playing: bool) {
        match self.controller.element() {
            Some(element) => self.fade.set_active(is_playing, element),
            None => self.fade.stop(),
        }
    }

    pub fn fade_config(&self) -> FadeConfig {
        self.fade.config()
    }

    pub fn fade_state(&self) -> FadeState {
        self.fade.state()
    }

    pub fn fade_gain(&self) -> Option<AudioParam> {
        self.controller.fade_gain_param()
    }

    // ------------------------------------------------------------------
    // Volume, pitch, rate
    // ------------------------------------------------------------------

    pub fn set_master_volume(&mut self, multiplier: f32) {
        self.controller.set_master_volume(multiplier);
    }

    pub fn master_volume(&self) -> f32 {
        self.controller.master_volume()
    }

    /// Pitch in semitones. The pitch node is inserted on the first non-zero value.
    pub fn set_pitch_value(&mut self, semitones: f32) -> bool {
        if semitones != 0.0 {
            self.controller.insert_pitch_node();
        }
        self.controller.set_pitch(semitones)
    }

    /// Native playback rate. The first non-1.0 rate also inserts the pitch node.
    pub fn set_playback_rate(&mut self, rate: f64) -> bool {
        if rate != 1.0 {
            self.controller.insert_pitch_node();
        }
        self.controller.set_playback_rate(rate)
    }

    // ------------------------------------------------------------------
    // Equalizer
    // ------------------------------------------------------------------

    pub fn update_equalizer_band(&mut self, index: usize, gain_db: f32) {
        self.controller.equalizer_mut().update_band(index, gain_db);
    }

    pub fn update_equalizer_values(&mut self, gains_db: &[f32]) {
        self.controller.equalizer_mut().update_all_bands(gains_db);
    }

    pub fn reset_equalizer(&mut self) {
        self.controller.equalizer_mut().reset();
    }

    pub fn equalizer_gains(&self) -> [f32; BAND_COUNT] {
        self.controller.equalizer().gains()
    }

    // ------------------------------------------------------------------
    // Silence
    // ------------------------------------------------------------------

    pub fn detect_silence_regions(
        &self,
        envelope: &[f32],
        total_duration: f64,
        threshold_db: f32,
        min_duration: f64,
        region_start: Option<f64>,
        region_end: Option<f64>,
    ) -> Arc<[SilenceRegion]> {
        let query = SilenceQuery {
            threshold_db,
            min_duration,
            region_start,
            region_end,
        };
        self.silence.detect(envelope, total_duration, &query)
    }

    /// Detect for an in-progress slider sweep.
    ///
    /// The result is returned at once for cheap consumers and queued for
    /// [`poll_silence_sweep`](Self::poll_silence_sweep).
    pub fn sweep_silence_threshold(
        &mut self,
        envelope: &[f32],
        total_duration: f64,
        query: &SilenceQuery,
        now: Instant,
    ) -> Arc<[SilenceRegion]> {
        let regions = self.silence.detect(envelope, total_duration, query);
        self.sweep.push(Arc::clone(&regions), now);
        regions
    }

    /// Latest sweep result once the slider has been still for the debounce delay
    pub fn poll_silence_sweep(&mut self, now: Instant) -> Option<Arc<[SilenceRegion]>> {
        self.sweep.poll(now)
    }

    /// New file loaded
    pub fn clear_silence_cache(&mut self) {
        self.silence.clear_cache();
        self.sweep.cancel();
    }

    /// Seek the element to the start of `region`
    pub fn preview_silence_region(&self, region: &SilenceRegion) -> bool {
        match self.controller.element() {
            Some(element) => {
                element.set_current_time(region.start);
                true
            }
            None => false,
        }
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
