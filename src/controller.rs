//! Audio Graph Controller - builds and tears down the preview chain
//!
//! source → [pitch] → [equalizer] → master gain → fade gain → analyser → destination
//!
//! Core nodes (source, master, fade, analyser) are required; pitch and equalizer
//! are enhancements whose failure leaves playback running without them.

use crate::audio::{
    AnalyserTap, AudioContext, AudioParam, ContextOptions, NodeHandle, PitchParams, Topology,
};
use crate::config::PreviewConfig;
use crate::equalizer::EqualizerBank;
use crate::error::GraphError;
use crate::media::{ElementId, MediaElement};
use std::sync::Arc;

/// Native playback-rate range accepted by the element
pub const PLAYBACK_RATE_RANGE: (f64, f64) = (0.25, 4.0);

/// Node handles of the live chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHandles {
    pub source: NodeHandle,
    pub pitch: Option<NodeHandle>,
    pub master: NodeHandle,
    pub fade: NodeHandle,
    pub analyser: NodeHandle,
    pub destination: NodeHandle,
}

struct PitchStage {
    handle: NodeHandle,
    params: PitchParams,
}

/// 接続中のグラフ
struct LiveGraph {
    context: Arc<AudioContext>,
    element: Arc<dyn MediaElement>,
    source: NodeHandle,
    pitch: Option<PitchStage>,
    master: NodeHandle,
    master_gain: AudioParam,
    fade: NodeHandle,
    fade_gain: AudioParam,
    analyser: NodeHandle,
    analyser_tap: AnalyserTap,
}

impl LiveGraph {
    /// Node feeding the equalizer (or master when there is no equalizer)
    fn head(&self) -> NodeHandle {
        self.pitch.as_ref().map(|p| p.handle).unwrap_or(self.source)
    }
}

/// オーディオグラフコントローラー
///
/// 1つのメディア要素の周りに処理チェーンを構築する。マスター音量・ピッチ・
/// 再生速度はグラフが無い間も保持され、次の connect で適用される。
pub struct AudioGraphController {
    options: ContextOptions,
    master_volume_max: f32,
    master_volume: f32,
    /// Pitch node requested (stays in every later graph)
    pitch_enabled: bool,
    pitch_semitones: f32,
    playback_rate: f64,
    equalizer: EqualizerBank,
    graph: Option<LiveGraph>,
}

impl AudioGraphController {
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            options: ContextOptions {
                sample_rate: config.sample_rate,
                max_nodes: config.max_nodes,
                analyser_fft_size: config.analyser_fft_size,
                ..ContextOptions::default()
            },
            master_volume_max: config.master_volume_max,
            master_volume: 1.0,
            pitch_enabled: false,
            pitch_semitones: 0.0,
            playback_rate: 1.0,
            equalizer: EqualizerBank::new(config.equalizer.clone()),
            graph: None,
        }
    }

    /// Build the chain around `element`.
    ///
    /// Idempotent for the element already connected. A different element replaces
    /// the current graph. Returns false if the element has no source or a core node
    /// could not be created; nothing built by the failed attempt is left behind.
    pub fn connect(&mut self, element: Arc<dyn MediaElement>) -> bool {
        if !element.has_source() {
            log::warn!("[Controller] Element {} has no source", element.id());
            return false;
        }

        if let Some(graph) = &self.graph {
            if graph.element.id() == element.id() {
                element.set_volume(1.0);
                return true;
            }
            log::info!("[Controller] Switching element {} -> {}", graph.element.id(), element.id());
            self.disconnect();
        }

        let context = match AudioContext::new(self.options.clone()) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                log::warn!("[Controller] Could not create audio context: {}", e);
                return false;
            }
        };

        match self.build(&context, Arc::clone(&element)) {
            Ok(graph) => {
                element.set_volume(1.0);
                element.set_playback_rate(self.playback_rate);
                log::info!(
                    "[Controller] Connected {} ({} nodes, eq: {})",
                    element.id(),
                    context.node_count(),
                    self.equalizer.is_connected()
                );
                self.graph = Some(graph);
                true
            }
            Err(e) => {
                log::warn!("[Controller] Connect failed: {}", e);
                self.equalizer.disconnect();
                context.close();
                false
            }
        }
    }

    fn build(
        &mut self,
        context: &Arc<AudioContext>,
        element: Arc<dyn MediaElement>,
    ) -> Result<LiveGraph, GraphError> {
        context.resume()?;

        let source = context.create_media_source(Arc::clone(&element))?;
        let (master, master_gain) =
            context.create_gain("master", self.master_volume, 0.0, self.master_volume_max)?;
        let (fade, fade_gain) = context.create_gain("fade", 1.0, 0.0, 1.0)?;
        let (analyser, analyser_tap) = context.create_analyser("analyser")?;

        let pitch = if self.pitch_enabled {
            self.create_pitch(context)
        } else {
            None
        };

        let mut graph = LiveGraph {
            context: Arc::clone(context),
            element,
            source,
            pitch,
            master,
            master_gain,
            fade,
            fade_gain,
            analyser,
            analyser_tap,
        };

        let mut path = vec![graph.source];
        path.extend(graph.pitch.as_ref().map(|p| p.handle));
        path.extend([master, fade, analyser, context.destination()]);
        if let Err(e) = context.transaction(|tx| tx.connect_chain(&path)) {
            if graph.pitch.is_none() {
                return Err(e);
            }
            // Retry without the pitch stage
            log::warn!("[Controller] Pitch stage not wired: {}", e);
            if let Some(p) = graph.pitch.take() {
                context.remove_node(p.handle);
            }
            context.transaction(|tx| {
                tx.connect_chain(&[source, master, fade, analyser, context.destination()])
            })?;
        }

        if !self.equalizer.connect(context, graph.head(), master) {
            log::warn!("[Controller] Continuing without equalizer");
        }

        Ok(graph)
    }

    fn create_pitch(&self, context: &AudioContext) -> Option<PitchStage> {
        match context.create_pitch_shifter("pitch") {
            Ok((handle, params)) => {
                params.pitch.set_value(self.pitch_semitones);
                params.rate.set_value(1.0);
                Some(PitchStage { handle, params })
            }
            Err(e) => {
                log::warn!("[Controller] Could not create pitch node: {}", e);
                None
            }
        }
    }

    /// Create the persistent pitch node and splice it in after the source.
    ///
    /// Idempotent. When nothing is connected the request is remembered and the
    /// node is built by the next `connect`; `None` is returned until then.
    pub fn insert_pitch_node(&mut self) -> Option<NodeHandle> {
        self.pitch_enabled = true;
        let Some(graph) = self.graph.as_mut() else {
            log::debug!("[Controller] Pitch node deferred until connect");
            return None;
        };
        if let Some(pitch) = &graph.pitch {
            return Some(pitch.handle);
        }

        let context = Arc::clone(&graph.context);
        let source = graph.source;
        let downstream = self.equalizer.input().unwrap_or(graph.master);

        let (handle, params) = match context.create_pitch_shifter("pitch") {
            Ok(created) => created,
            Err(e) => {
                log::warn!("[Controller] Could not create pitch node: {}", e);
                return None;
            }
        };
        params.pitch.set_value(self.pitch_semitones);
        params.rate.set_value(1.0);

        let spliced = context.transaction(|tx| {
            tx.disconnect(source, downstream);
            tx.connect(source, handle)?;
            tx.connect(handle, downstream)
        });
        if let Err(e) = spliced {
            log::warn!("[Controller] Could not splice pitch node: {}", e);
            context.remove_node(handle);
            return None;
        }

        if self.equalizer.upstream() == Some(source) {
            self.equalizer.set_upstream(handle);
        }
        graph.pitch = Some(PitchStage { handle, params });
        log::info!("[Controller] Pitch node inserted");
        Some(handle)
    }

    /// Splice the pitch node out again. Returns false if there was none.
    pub fn remove_pitch_node(&mut self) -> bool {
        self.pitch_enabled = false;
        let Some(graph) = self.graph.as_mut() else {
            return false;
        };
        let Some(pitch) = graph.pitch.take() else {
            return false;
        };

        let context = Arc::clone(&graph.context);
        let source = graph.source;
        let downstream = self.equalizer.input().unwrap_or(graph.master);

        let spliced = context.transaction(|tx| {
            tx.disconnect(source, pitch.handle);
            tx.disconnect(pitch.handle, downstream);
            tx.connect(source, downstream)
        });
        if let Err(e) = spliced {
            log::warn!("[Controller] Could not remove pitch node: {}", e);
            graph.pitch = Some(pitch);
            self.pitch_enabled = true;
            return false;
        }

        context.remove_node(pitch.handle);
        if self.equalizer.upstream() == Some(pitch.handle) {
            self.equalizer.set_upstream(source);
        }
        log::info!("[Controller] Pitch node removed");
        true
    }

    /// Master gain multiplier, clamped to `[0, master_volume_max]`
    pub fn set_master_volume(&mut self, multiplier: f32) {
        if !multiplier.is_finite() {
            log::debug!("[Controller] Ignored master volume {}", multiplier);
            return;
        }
        self.master_volume = multiplier.clamp(0.0, self.master_volume_max);
        if let Some(graph) = &self.graph {
            graph.master_gain.set_value(self.master_volume);
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Shift pitch in semitones. False until a pitch node exists.
    pub fn set_pitch(&mut self, semitones: f32) -> bool {
        let Some(pitch) = self.graph.as_ref().and_then(|g| g.pitch.as_ref()) else {
            return false;
        };
        if !semitones.is_finite() {
            log::debug!("[Controller] Ignored pitch {}", semitones);
            return false;
        }
        pitch.params.pitch.set_value(semitones);
        pitch.params.rate.set_value(1.0);
        self.pitch_semitones = pitch.params.pitch.value();
        true
    }

    pub fn pitch(&self) -> f32 {
        self.pitch_semitones
    }

    /// Native element playback rate. The pitch node's own rate stays at 1.0.
    ///
    /// Returns false when no element is connected; the rate is still remembered.
    pub fn set_playback_rate(&mut self, rate: f64) -> bool {
        if !rate.is_finite() {
            log::debug!("[Controller] Ignored playback rate {}", rate);
            return false;
        }
        self.playback_rate = rate.clamp(PLAYBACK_RATE_RANGE.0, PLAYBACK_RATE_RANGE.1);
        match &self.graph {
            Some(graph) => {
                graph.element.set_playback_rate(self.playback_rate);
                true
            }
            None => false,
        }
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Tear everything down and close the context. Safe to repeat.
    pub fn disconnect(&mut self) {
        let Some(graph) = self.graph.take() else {
            return;
        };
        self.equalizer.disconnect();
        graph.context.close();
        log::info!("[Controller] Disconnected {}", graph.element.id());
    }

    pub fn is_connected(&self) -> bool {
        self.graph.is_some()
    }

    pub fn context(&self) -> Option<&Arc<AudioContext>> {
        self.graph.as_ref().map(|g| &g.context)
    }

    pub fn element(&self) -> Option<&Arc<dyn MediaElement>> {
        self.graph.as_ref().map(|g| &g.element)
    }

    pub fn element_id(&self) -> Option<ElementId> {
        self.graph.as_ref().map(|g| g.element.id())
    }

    pub fn fade_gain_param(&self) -> Option<AudioParam> {
        self.graph.as_ref().map(|g| g.fade_gain.clone())
    }

    pub fn master_gain_param(&self) -> Option<AudioParam> {
        self.graph.as_ref().map(|g| g.master_gain.clone())
    }

    pub fn pitch_params(&self) -> Option<PitchParams> {
        self.graph
            .as_ref()
            .and_then(|g| g.pitch.as_ref())
            .map(|p| p.params.clone())
    }

    pub fn analyser(&self) -> Option<AnalyserTap> {
        self.graph.as_ref().map(|g| g.analyser_tap.clone())
    }

    pub fn equalizer(&self) -> &EqualizerBank {
        &self.equalizer
    }

    pub fn equalizer_mut(&mut self) -> &mut EqualizerBank {
        &mut self.equalizer
    }

    pub fn handles(&self) -> Option<ChainHandles> {
        self.graph.as_ref().map(|g| ChainHandles {
            source: g.source,
            pitch: g.pitch.as_ref().map(|p| p.handle),
            master: g.master,
            fade: g.fade,
            analyser: g.analyser,
            destination: g.context.destination(),
        })
    }

    pub fn topology(&self) -> Option<Topology> {
        self.graph.as_ref().map(|g| g.context.topology())
    }
}

impl Drop for AudioGraphController {
    fn drop(&mut self) {
        self.disconnect();
    }
}
