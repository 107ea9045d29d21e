//! Fade envelope - gain multiplier from playback position
//!
//! [`compute_multiplier`] is pure. [`FadeEnvelopeEngine`] drives it once per display
//! frame while the element plays and writes the result into the fade gain node.

use crate::audio::AudioParam;
use crate::error::FadeConfigError;
use crate::media::MediaElement;
use crate::scheduler::{FrameRequestId, FrameScheduler};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// Constants
// =============================================================================

/// Lowest multiplier inside a kept region (never exact silence)
pub const REGION_FLOOR: f32 = 0.0001;

/// Start value of the fade-in curve inside a region
pub const FADE_IN_START: f64 = 0.001;

/// Lowest multiplier on the kept side of an inverted selection
pub const INVERTED_FLOOR: f32 = 0.05;

const CURVE_EXPONENT: f64 = 1.5;

// =============================================================================
// Configuration
// =============================================================================

/// Raw fade settings as they come from the UI
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FadeParams {
    pub fade_in_seconds: f64,
    pub fade_out_seconds: f64,
    pub region_start: f64,
    pub region_end: f64,
    pub is_inverted: bool,
    pub total_duration: f64,
}

/// Validated fade configuration. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeConfig {
    params: FadeParams,
    active: bool,
}

impl FadeConfig {
    pub fn new(params: FadeParams) -> Result<Self, FadeConfigError> {
        let fields = [
            ("fade_in_seconds", params.fade_in_seconds),
            ("fade_out_seconds", params.fade_out_seconds),
            ("region_start", params.region_start),
            ("region_end", params.region_end),
            ("total_duration", params.total_duration),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(FadeConfigError::InvalidValue { field, value });
            }
        }
        if params.region_end <= params.region_start {
            return Err(FadeConfigError::EmptyRegion {
                start: params.region_start,
                end: params.region_end,
            });
        }

        let active = (params.fade_in_seconds > 0.0
            || params.fade_out_seconds > 0.0
            || params.is_inverted)
            && params.region_start < params.region_end;

        Ok(Self { params, active })
    }

    /// Nothing selected: never fades
    pub fn no_selection(total_duration: f64) -> Self {
        let total_duration = if total_duration.is_finite() {
            total_duration.max(0.0)
        } else {
            0.0
        };
        Self {
            params: FadeParams {
                total_duration,
                ..FadeParams::default()
            },
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn params(&self) -> &FadeParams {
        &self.params
    }

    pub fn fade_in_seconds(&self) -> f64 {
        self.params.fade_in_seconds
    }

    pub fn fade_out_seconds(&self) -> f64 {
        self.params.fade_out_seconds
    }

    pub fn region(&self) -> (f64, f64) {
        (self.params.region_start, self.params.region_end)
    }

    pub fn is_inverted(&self) -> bool {
        self.params.is_inverted
    }

    pub fn total_duration(&self) -> f64 {
        self.params.total_duration
    }
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self::no_selection(0.0)
    }
}

// =============================================================================
// Curve
// =============================================================================

/// 0 → 1 ease-in curve
#[inline]
fn ease_in(x: f64) -> f64 {
    1.0 - (1.0 - x.clamp(0.0, 1.0)).powf(CURVE_EXPONENT)
}

/// 1 → 0 as the remaining fraction goes to 0
#[inline]
fn ease_out(remaining_fraction: f64) -> f64 {
    remaining_fraction.clamp(0.0, 1.0).powf(CURVE_EXPONENT)
}

/// Gain multiplier at `current_time` seconds.
///
/// Region mode: in `[0.0001, 1]`. Inverted mode: `0.0` inside the selection,
/// otherwise in `[0.05, 1]`.
pub fn compute_multiplier(current_time: f64, config: &FadeConfig) -> f32 {
    if !config.is_active() || !current_time.is_finite() {
        return 1.0;
    }
    if config.is_inverted() {
        inverted_multiplier(current_time, config)
    } else {
        region_multiplier(current_time, config)
    }
}

fn region_multiplier(t: f64, config: &FadeConfig) -> f32 {
    let (start, end) = config.region();
    if t < start || t > end {
        return 1.0;
    }

    let fade_in = config.fade_in_seconds();
    let fade_out = config.fade_out_seconds();
    let mut multiplier = 1.0_f64;

    let elapsed = t - start;
    if fade_in > 0.0 && elapsed < fade_in {
        let curve = ease_in(elapsed / fade_in);
        multiplier = multiplier.min(FADE_IN_START + (1.0 - FADE_IN_START) * curve);
    }

    let remaining = end - t;
    if fade_out > 0.0 && remaining < fade_out {
        multiplier = multiplier.min(ease_out(remaining / fade_out));
    }

    (multiplier as f32).clamp(REGION_FLOOR, 1.0)
}

fn inverted_multiplier(t: f64, config: &FadeConfig) -> f32 {
    let (start, end) = config.region();
    if t > start && t < end {
        return 0.0;
    }

    let fade_in = config.fade_in_seconds();
    let fade_out = config.fade_out_seconds();
    let floor = INVERTED_FLOOR as f64;
    let mut multiplier = 1.0_f64;

    if fade_in > 0.0 && t < fade_in {
        multiplier = multiplier.min(ease_in(t / fade_in).max(floor));
    }

    let remaining = config.total_duration() - t;
    if fade_out > 0.0 && remaining < fade_out {
        multiplier = multiplier.min(ease_out(remaining / fade_out).max(floor));
    }

    (multiplier as f32).clamp(INVERTED_FLOOR, 1.0)
}

// =============================================================================
// Engine
// =============================================================================

/// Observable loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeState {
    /// Not animating, fade gain pinned to 1.0
    Idle,
    /// A frame callback is scheduled
    Animating,
}

/// 世代トークン。ループを開始するたびに新しい値になる
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AnimationToken(u64);

enum LoopState {
    Idle,
    Animating {
        token: AnimationToken,
        element: Arc<dyn MediaElement>,
        pending: Option<FrameRequestId>,
    },
}

struct FadeShared {
    config: ArcSwap<FadeConfig>,
    fade_gain: RwLock<Option<AudioParam>>,
    state: Mutex<LoopState>,
    next_token: AtomicU64,
    scheduler: Arc<dyn FrameScheduler>,
    frames: AtomicU64,
}

impl FadeShared {
    fn write_gain(&self, value: f32) {
        if let Some(param) = self.fade_gain.read().as_ref() {
            param.set_value(value);
        }
    }

    /// Evaluate the curve for `current_time` and write it; a bad value degrades to 1.0
    fn apply(&self, current_time: f64) -> f32 {
        let config = self.config.load();
        let multiplier = compute_multiplier(current_time, &config);
        let multiplier = if multiplier.is_finite() { multiplier } else { 1.0 };
        self.write_gain(multiplier);
        self.frames.fetch_add(1, Ordering::Relaxed);
        multiplier
    }

    fn schedule(shared: &Arc<FadeShared>, token: AnimationToken) -> FrameRequestId {
        let weak: Weak<FadeShared> = Arc::downgrade(shared);
        shared.scheduler.request_frame(Box::new(move |_timestamp| {
            if let Some(shared) = weak.upgrade() {
                FadeShared::on_frame(&shared, token);
            }
        }))
    }

    fn on_frame(shared: &Arc<FadeShared>, token: AnimationToken) {
        let mut state = shared.state.lock();
        let element = match &*state {
            LoopState::Animating { token: current, element, .. } if *current == token => {
                Arc::clone(element)
            }
            // 古いコールバック: もう要素を所有していないので書き込まない
            _ => return,
        };

        if element.is_paused() || !shared.config.load().is_active() {
            *state = LoopState::Idle;
            drop(state);
            shared.write_gain(1.0);
            log::debug!("[Fade] Loop finished");
            return;
        }

        shared.apply(element.current_time());

        let id = FadeShared::schedule(shared, token);
        if let LoopState::Animating { pending, .. } = &mut *state {
            *pending = Some(id);
        }
    }

    /// Cancel the loop and pin the gain to 1.0
    fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), LoopState::Idle);
        if let LoopState::Animating {
            pending: Some(id), ..
        } = previous
        {
            self.scheduler.cancel_frame(id);
        }
        self.write_gain(1.0);
    }
}

/// フェードエンベロープエンジン
///
/// Idle ↔ Animating の状態機械。ループは再生中かつ設定が有効な間だけ
/// 次のフレームを要求し、それ以外では自分で停止する。
pub struct FadeEnvelopeEngine {
    shared: Arc<FadeShared>,
}

impl FadeEnvelopeEngine {
    pub fn new(scheduler: Arc<dyn FrameScheduler>) -> Self {
        Self {
            shared: Arc::new(FadeShared {
                config: ArcSwap::from_pointee(FadeConfig::default()),
                fade_gain: RwLock::new(None),
                state: Mutex::new(LoopState::Idle),
                next_token: AtomicU64::new(1),
                scheduler,
                frames: AtomicU64::new(0),
            }),
        }
    }

    /// Point the engine at the fade gain of a freshly connected graph
    pub fn attach(&self, fade_gain: AudioParam) {
        fade_gain.set_value(1.0);
        *self.shared.fade_gain.write() = Some(fade_gain);
    }

    /// Stop the loop and forget the fade gain (graph teardown)
    pub fn detach(&self) {
        self.shared.stop();
        *self.shared.fade_gain.write() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.shared.fade_gain.read().is_some()
    }

    pub fn config(&self) -> FadeConfig {
        **self.shared.config.load()
    }

    /// Replace the configuration; the next frame reads it
    pub fn update_config(&self, config: FadeConfig) {
        self.shared.config.store(Arc::new(config));
    }

    /// Start the loop when playing with an active config, otherwise return to Idle
    pub fn set_active(&self, is_playing: bool, element: &Arc<dyn MediaElement>) {
        let should_run =
            is_playing && self.shared.config.load().is_active() && self.is_attached();
        if !should_run {
            self.stop();
            return;
        }

        let mut state = self.shared.state.lock();
        if let LoopState::Animating { element: current, .. } = &*state {
            if current.id() == element.id() {
                return;
            }
        }
        if let LoopState::Animating {
            pending: Some(id), ..
        } = &*state
        {
            self.shared.scheduler.cancel_frame(*id);
        }

        let token = AnimationToken(self.shared.next_token.fetch_add(1, Ordering::Relaxed));
        self.shared.apply(element.current_time());
        let pending = FadeShared::schedule(&self.shared, token);
        *state = LoopState::Animating {
            token,
            element: Arc::clone(element),
            pending: Some(pending),
        };
        log::debug!("[Fade] Loop started");
    }

    /// Cancel any scheduled frame and reset the fade gain to 1.0
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> FadeState {
        match &*self.shared.state.lock() {
            LoopState::Idle => FadeState::Idle,
            LoopState::Animating { .. } => FadeState::Animating,
        }
    }

    /// Frames evaluated since creation
    pub fn frames_evaluated(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }
}

impl Drop for FadeEnvelopeEngine {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::BufferedMediaElement;
    use crate::scheduler::ManualFrameScheduler;
    use approx::assert_abs_diff_eq;

    fn config(fade_in: f64, fade_out: f64, start: f64, end: f64, inverted: bool, total: f64) -> FadeConfig {
        FadeConfig::new(FadeParams {
            fade_in_seconds: fade_in,
            fade_out_seconds: fade_out,
            region_start: start,
            region_end: end,
            is_inverted: inverted,
            total_duration: total,
        })
        .unwrap()
    }

    #[test]
    fn test_basic_fade_in() {
        let cfg = config(2.0, 0.0, 0.0, 10.0, false, 10.0);
        assert_abs_diff_eq!(compute_multiplier(0.0, &cfg), 0.001, epsilon = 1e-6);
        assert_abs_diff_eq!(compute_multiplier(2.0, &cfg), 1.0, epsilon = 1e-6);
        assert_eq!(compute_multiplier(5.0, &cfg), 1.0);
        let mid = compute_multiplier(1.0, &cfg);
        assert!(mid > 0.001 && mid < 1.0);
    }

    #[test]
    fn test_fade_out_reaches_floor() {
        let cfg = config(0.0, 2.0, 0.0, 10.0, false, 10.0);
        assert_eq!(compute_multiplier(10.0, &cfg), REGION_FLOOR);
        assert_abs_diff_eq!(compute_multiplier(9.0, &cfg), 0.5_f32.powf(1.5), epsilon = 1e-6);
        assert_eq!(compute_multiplier(7.0, &cfg), 1.0);
    }

    #[test]
    fn test_outside_region_untouched() {
        let cfg = config(1.0, 1.0, 2.0, 6.0, false, 10.0);
        assert_eq!(compute_multiplier(1.0, &cfg), 1.0);
        assert_eq!(compute_multiplier(8.0, &cfg), 1.0);
    }

    #[test]
    fn test_fade_boundary_continuity() {
        let cfg = config(0.0, 1.0, 3.0, 10.0, false, 10.0);
        assert_eq!(compute_multiplier(3.0, &cfg), 1.0);

        let cfg = config(1.5, 0.0, 3.0, 10.0, false, 10.0);
        assert_abs_diff_eq!(compute_multiplier(4.5, &cfg), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(compute_multiplier(4.5 - 1e-9, &cfg), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_overlapping_fades_take_minimum() {
        let cfg = config(4.0, 4.0, 0.0, 4.0, false, 4.0);
        let t = 3.0;
        let fade_in = FADE_IN_START + (1.0 - FADE_IN_START) * ease_in(0.75);
        let fade_out = ease_out(0.25);
        assert_abs_diff_eq!(
            compute_multiplier(t, &cfg),
            fade_in.min(fade_out) as f32,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_inverted_region_is_silent() {
        let cfg = config(0.0, 0.0, 5.0, 8.0, true, 20.0);
        assert_eq!(compute_multiplier(6.0, &cfg), 0.0);
        assert_eq!(compute_multiplier(12.0, &cfg), 1.0);
    }

    #[test]
    fn test_inverted_edges_use_higher_floor() {
        let cfg = config(2.0, 2.0, 5.0, 8.0, true, 20.0);
        assert_eq!(compute_multiplier(0.0, &cfg), INVERTED_FLOOR);
        assert_eq!(compute_multiplier(20.0, &cfg), INVERTED_FLOOR);
        assert_eq!(compute_multiplier(10.0, &cfg), 1.0);
    }

    #[test]
    fn test_multiplier_bounds() {
        let configs = [
            config(1.0, 3.0, 1.0, 9.0, false, 10.0),
            config(0.5, 0.0, 0.0, 2.0, false, 10.0),
            config(8.0, 8.0, 2.0, 5.0, false, 10.0),
        ];
        for cfg in &configs {
            for i in 0..=2000 {
                let m = compute_multiplier(i as f64 * 0.006 - 1.0, cfg);
                assert!((REGION_FLOOR..=1.0).contains(&m), "{m}");
            }
        }

        let inverted = [
            config(1.0, 3.0, 1.0, 9.0, true, 10.0),
            config(6.0, 6.0, 4.0, 5.0, true, 10.0),
        ];
        for cfg in &inverted {
            for i in 0..=2000 {
                let m = compute_multiplier(i as f64 * 0.006 - 1.0, cfg);
                assert!(m == 0.0 || (INVERTED_FLOOR..=1.0).contains(&m), "{m}");
            }
        }
    }

    #[test]
    fn test_is_active_derivation() {
        assert!(!config(0.0, 0.0, 1.0, 2.0, false, 3.0).is_active());
        assert!(config(0.0, 0.0, 1.0, 2.0, true, 3.0).is_active());
        assert!(config(0.1, 0.0, 1.0, 2.0, false, 3.0).is_active());
        assert!(!FadeConfig::no_selection(3.0).is_active());
        assert_eq!(compute_multiplier(1.0, &FadeConfig::no_selection(3.0)), 1.0);
    }

    #[test]
    fn test_validation() {
        let base = FadeParams {
            fade_in_seconds: 1.0,
            fade_out_seconds: 1.0,
            region_start: 1.0,
            region_end: 2.0,
            is_inverted: false,
            total_duration: 3.0,
        };
        assert!(FadeConfig::new(base).is_ok());
        assert!(matches!(
            FadeConfig::new(FadeParams { fade_in_seconds: -1.0, ..base }),
            Err(FadeConfigError::InvalidValue { field: "fade_in_seconds", .. })
        ));
        assert!(matches!(
            FadeConfig::new(FadeParams { total_duration: f64::NAN, ..base }),
            Err(FadeConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            FadeConfig::new(FadeParams { region_end: 1.0, ..base }),
            Err(FadeConfigError::EmptyRegion { .. })
        ));
    }

    struct Rig {
        scheduler: Arc<ManualFrameScheduler>,
        engine: FadeEnvelopeEngine,
        gain: AudioParam,
        element: Arc<BufferedMediaElement>,
        handle: Arc<dyn MediaElement>,
    }

    fn rig() -> Rig {
        let scheduler = Arc::new(ManualFrameScheduler::new());
        let engine = FadeEnvelopeEngine::new(scheduler.clone());
        let gain = AudioParam::new(1.0, 0.0, 1.0);
        engine.attach(gain.clone());
        engine.update_config(config(2.0, 0.0, 0.0, 10.0, false, 10.0));

        let element = Arc::new(BufferedMediaElement::from_mono(vec![0.1; 1000], 100.0));
        let handle: Arc<dyn MediaElement> = element.clone();
        Rig {
            scheduler,
            engine,
            gain,
            element,
            handle,
        }
    }

    #[test]
    fn test_loop_writes_each_frame() {
        let r = rig();
        r.element.play();
        r.element.set_current_time(1.0);

        r.engine.set_active(true, &r.handle);
        assert_eq!(r.engine.state(), FadeState::Animating);
        let expected = compute_multiplier(1.0, &r.engine.config());
        assert_abs_diff_eq!(r.gain.value(), expected, epsilon = 1e-6);

        r.element.set_current_time(0.5);
        assert_eq!(r.scheduler.run_frame(16.0), 1);
        let expected = compute_multiplier(0.5, &r.engine.config());
        assert_abs_diff_eq!(r.gain.value(), expected, epsilon = 1e-6);
        assert_eq!(r.scheduler.pending(), 1);
    }

    #[test]
    fn test_loop_stops_when_paused() {
        let r = rig();
        r.element.play();
        r.engine.set_active(true, &r.handle);
        assert!(r.gain.value() < 1.0);

        r.element.pause();
        r.scheduler.run_frame(16.0);
        assert_eq!(r.engine.state(), FadeState::Idle);
        assert_eq!(r.gain.value(), 1.0);
        assert_eq!(r.scheduler.pending(), 0);
    }

    #[test]
    fn test_loop_stops_when_config_inactive() {
        let r = rig();
        r.element.play();
        r.engine.set_active(true, &r.handle);

        r.engine.update_config(FadeConfig::no_selection(10.0));
        r.scheduler.run_frame(16.0);
        assert_eq!(r.engine.state(), FadeState::Idle);
        assert_eq!(r.gain.value(), 1.0);
        assert_eq!(r.scheduler.pending(), 0);
    }

    #[test]
    fn test_set_inactive_cancels_pending_frame() {
        let r = rig();
        r.element.play();
        r.engine.set_active(true, &r.handle);
        assert_eq!(r.scheduler.pending(), 1);

        r.engine.set_active(false, &r.handle);
        assert_eq!(r.scheduler.pending(), 0);
        assert_eq!(r.engine.state(), FadeState::Idle);
        assert_eq!(r.gain.value(), 1.0);
    }

    #[test]
    fn test_restart_with_same_element_keeps_single_loop() {
        let r = rig();
        r.element.play();
        r.engine.set_active(true, &r.handle);
        r.engine.set_active(true, &r.handle);
        assert_eq!(r.scheduler.pending(), 1);
    }

    #[test]
    fn test_stale_callback_does_not_write() {
        let scheduler = Arc::new(ManualFrameScheduler::new());
        let engine = FadeEnvelopeEngine::new(scheduler.clone());
        let gain = AudioParam::new(1.0, 0.0, 1.0);
        engine.attach(gain.clone());
        engine.update_config(config(2.0, 0.0, 0.0, 10.0, false, 10.0));

        let element = Arc::new(BufferedMediaElement::from_mono(vec![0.1; 1000], 100.0));
        element.play();
        let handle: Arc<dyn MediaElement> = element.clone();
        engine.set_active(true, &handle);

        // Tear down the engine; the queued callback must find nothing to write to
        drop(engine);
        gain.set_value(0.7);
        scheduler.run_frame(16.0);
        assert_eq!(gain.value(), 0.7);
    }

    #[test]
    fn test_not_playing_pins_unity() {
        let r = rig();
        r.engine.set_active(false, &r.handle);
        assert_eq!(r.engine.state(), FadeState::Idle);
        assert_eq!(r.gain.value(), 1.0);
        assert_eq!(r.engine.frames_evaluated(), 0);
    }
}
