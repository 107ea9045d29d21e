//! Equalizer Bank - fixed chain of peaking filters
//!
//! The chain is spliced between an upstream and a downstream node in one graph
//! transaction, replacing the direct edge, and taken out the same way.

use crate::audio::{AudioContext, BiquadParams, ContextState, NodeHandle};
use crate::config::EqualizerSettings;
use crate::error::GraphError;
use std::sync::Arc;

/// Band centre frequencies (Hz), ascending
pub const EQ_FREQUENCIES: [f32; 10] = [
    60.0, 170.0, 310.0, 600.0, 1000.0, 3000.0, 6000.0, 12000.0, 14000.0, 16000.0,
];

pub const BAND_COUNT: usize = EQ_FREQUENCIES.len();

struct Stage {
    handle: NodeHandle,
    params: BiquadParams,
}

/// 構築済みのチェーン
struct Chain {
    context: Arc<AudioContext>,
    stages: Vec<Stage>,
    upstream: NodeHandle,
    downstream: NodeHandle,
}

impl Chain {
    fn handles(&self) -> Vec<NodeHandle> {
        self.stages.iter().map(|s| s.handle).collect()
    }
}

/// イコライザーバンク
///
/// ゲインはチェーンの有無に関係なく保持され、構築時に適用される。
pub struct EqualizerBank {
    settings: EqualizerSettings,
    gains: [f32; BAND_COUNT],
    chain: Option<Chain>,
}

impl EqualizerBank {
    pub fn new(settings: EqualizerSettings) -> Self {
        Self {
            settings,
            gains: [0.0; BAND_COUNT],
            chain: None,
        }
    }

    pub fn band_count(&self) -> usize {
        BAND_COUNT
    }

    pub fn frequencies(&self) -> &'static [f32; BAND_COUNT] {
        &EQ_FREQUENCIES
    }

    /// Stored band gains (dB)
    pub fn gains(&self) -> [f32; BAND_COUNT] {
        self.gains
    }

    pub fn is_connected(&self) -> bool {
        self.chain.is_some()
    }

    /// First stage of the chain
    pub fn input(&self) -> Option<NodeHandle> {
        self.chain.as_ref().and_then(|c| c.stages.first()).map(|s| s.handle)
    }

    /// Last stage of the chain
    pub fn output(&self) -> Option<NodeHandle> {
        self.chain.as_ref().and_then(|c| c.stages.last()).map(|s| s.handle)
    }

    /// Splice the chain between `source` and `destination`.
    ///
    /// Returns true if the chain is (already) in place. On failure nothing created
    /// here is left in the graph and the direct edge is restored.
    pub fn connect(
        &mut self,
        context: &Arc<AudioContext>,
        source: NodeHandle,
        destination: NodeHandle,
    ) -> bool {
        if let Some(chain) = &self.chain {
            if Arc::ptr_eq(&chain.context, context)
                && chain.upstream == source
                && chain.downstream == destination
            {
                return true;
            }
            self.disconnect();
        }

        match self.build(context, source, destination) {
            Ok(chain) => {
                log::info!("[Equalizer] Connected {} bands", chain.stages.len());
                self.chain = Some(chain);
                true
            }
            Err(e) => {
                log::warn!("[Equalizer] Could not build chain: {}", e);
                false
            }
        }
    }

    fn build(
        &self,
        context: &Arc<AudioContext>,
        source: NodeHandle,
        destination: NodeHandle,
    ) -> Result<Chain, GraphError> {
        let range = (self.settings.gain_min_db, self.settings.gain_max_db);
        let mut stages: Vec<Stage> = Vec::with_capacity(BAND_COUNT);

        for (i, &freq) in EQ_FREQUENCIES.iter().enumerate() {
            let label = format!("eq:{}Hz", freq);
            match context.create_peaking_filter(&label, freq, self.settings.q, range) {
                Ok((handle, params)) => {
                    params.gain_db.set_value(self.gains[i]);
                    stages.push(Stage { handle, params });
                }
                Err(e) => {
                    remove_stages(context, &stages);
                    return Err(e);
                }
            }
        }

        let mut path = Vec::with_capacity(BAND_COUNT + 2);
        path.push(source);
        path.extend(stages.iter().map(|s| s.handle));
        path.push(destination);

        let wired = context.transaction(|tx| {
            tx.disconnect(source, destination);
            tx.connect_chain(&path)
        });
        if let Err(e) = wired {
            remove_stages(context, &stages);
            return Err(e);
        }

        Ok(Chain {
            context: Arc::clone(context),
            stages,
            upstream: source,
            downstream: destination,
        })
    }

    /// Set one band. Out-of-range index or non-finite gain is ignored.
    pub fn update_band(&mut self, index: usize, gain_db: f32) {
        if index >= BAND_COUNT || !gain_db.is_finite() {
            log::debug!("[Equalizer] Ignored band {} = {}", index, gain_db);
            return;
        }
        let gain = self.clamp_gain(gain_db);
        self.gains[index] = gain;
        if let Some(chain) = &self.chain {
            chain.stages[index].params.gain_db.set_value(gain);
        }
    }

    /// Set every band at once. Ignored unless `gains_db.len()` matches the band count.
    pub fn update_all_bands(&mut self, gains_db: &[f32]) {
        if gains_db.len() != BAND_COUNT {
            log::debug!(
                "[Equalizer] Ignored batch of {} gains (expected {})",
                gains_db.len(),
                BAND_COUNT
            );
            return;
        }
        for (i, &gain_db) in gains_db.iter().enumerate() {
            if gain_db.is_finite() {
                self.gains[i] = self.clamp_gain(gain_db);
            }
        }

        let Some(chain) = &self.chain else {
            return;
        };
        let gains = self.gains;
        // Render holds the write lock, so it sees all bands or none
        chain.context.with_graph(|_| {
            for (stage, gain) in chain.stages.iter().zip(gains) {
                stage.params.gain_db.set_value(gain);
            }
        });
    }

    /// Flat response
    pub fn reset(&mut self) {
        self.update_all_bands(&[0.0; BAND_COUNT]);
    }

    /// Take the chain out of the graph and forget it. Safe when never connected.
    pub fn disconnect(&mut self) {
        let Some(chain) = self.chain.take() else {
            return;
        };
        let context = &chain.context;
        if context.state() != ContextState::Closed {
            let handles = chain.handles();
            let restored = context.transaction(|tx| {
                tx.disconnect(chain.upstream, handles[0]);
                for pair in handles.windows(2) {
                    tx.disconnect(pair[0], pair[1]);
                }
                tx.disconnect(handles[handles.len() - 1], chain.downstream);
                tx.connect(chain.upstream, chain.downstream)
            });
            if let Err(e) = restored {
                log::warn!("[Equalizer] Could not restore direct edge: {}", e);
            }
        }
        remove_stages(context, &chain.stages);
        log::info!("[Equalizer] Disconnected");
    }

    /// Record that a node was spliced in front of the chain
    pub(crate) fn set_upstream(&mut self, upstream: NodeHandle) {
        if let Some(chain) = &mut self.chain {
            chain.upstream = upstream;
        }
    }

    pub(crate) fn upstream(&self) -> Option<NodeHandle> {
        self.chain.as_ref().map(|c| c.upstream)
    }

    fn clamp_gain(&self, gain_db: f32) -> f32 {
        gain_db.clamp(self.settings.gain_min_db, self.settings.gain_max_db)
    }
}

fn remove_stages(context: &AudioContext, stages: &[Stage]) {
    for stage in stages {
        context.remove_node(stage.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ContextOptions;

    fn context(max_nodes: usize) -> Arc<AudioContext> {
        let ctx = AudioContext::new(ContextOptions {
            max_nodes,
            ..ContextOptions::default()
        })
        .unwrap();
        ctx.resume().unwrap();
        Arc::new(ctx)
    }

    fn wired_pair(ctx: &AudioContext) -> (NodeHandle, NodeHandle) {
        let (a, _) = ctx.create_gain("up", 1.0, 0.0, 1.0).unwrap();
        let (b, _) = ctx.create_gain("down", 1.0, 0.0, 1.0).unwrap();
        ctx.connect(a, b).unwrap();
        (a, b)
    }

    #[test]
    fn test_connect_replaces_direct_edge() {
        let ctx = context(64);
        let (a, b) = wired_pair(&ctx);
        let mut eq = EqualizerBank::new(EqualizerSettings::default());

        assert!(eq.connect(&ctx, a, b));
        assert!(!ctx.is_connected(a, b));
        let topology = ctx.topology();
        let chain = topology.chain_from(a);
        assert_eq!(chain.len(), BAND_COUNT + 2);
        assert_eq!(chain.last(), Some(&b));

        let edges = ctx.edge_count();
        assert!(eq.connect(&ctx, a, b));
        assert_eq!(ctx.edge_count(), edges);
    }

    #[test]
    fn test_disconnect_restores_direct_edge() {
        let ctx = context(64);
        let (a, b) = wired_pair(&ctx);
        let nodes = ctx.node_count();
        let mut eq = EqualizerBank::new(EqualizerSettings::default());

        assert!(eq.connect(&ctx, a, b));
        eq.disconnect();
        eq.disconnect();
        assert!(ctx.is_connected(a, b));
        assert_eq!(ctx.node_count(), nodes);
        assert!(!eq.is_connected());
    }

    #[test]
    fn test_gain_clamped_to_range() {
        let mut eq = EqualizerBank::new(EqualizerSettings::default());
        eq.update_band(3, 999.0);
        eq.update_band(4, -999.0);
        eq.update_band(BAND_COUNT, 5.0);
        eq.update_band(0, f32::NAN);
        let gains = eq.gains();
        assert_eq!(gains[3], 12.0);
        assert_eq!(gains[4], -12.0);
        assert_eq!(gains[0], 0.0);
    }

    #[test]
    fn test_batch_length_mismatch_ignored() {
        let mut eq = EqualizerBank::new(EqualizerSettings::default());
        eq.update_all_bands(&[3.0; 4]);
        assert_eq!(eq.gains(), [0.0; BAND_COUNT]);

        eq.update_all_bands(&[3.0; BAND_COUNT]);
        assert_eq!(eq.gains(), [3.0; BAND_COUNT]);
        eq.reset();
        assert_eq!(eq.gains(), [0.0; BAND_COUNT]);
    }

    #[test]
    fn test_remembered_gains_applied_on_connect() {
        let ctx = context(64);
        let (a, b) = wired_pair(&ctx);
        let mut eq = EqualizerBank::new(EqualizerSettings::default());
        eq.update_band(0, 6.0);

        assert!(eq.connect(&ctx, a, b));
        let chain = eq.chain.as_ref().unwrap();
        assert_eq!(chain.stages[0].params.gain_db.value(), 6.0);

        eq.update_all_bands(&[-3.0; BAND_COUNT]);
        let chain = eq.chain.as_ref().unwrap();
        assert!(chain.stages.iter().all(|s| s.params.gain_db.value() == -3.0));
    }

    #[test]
    fn test_node_limit_leaves_direct_edge() {
        // destination + 2 gains + 5 filters
        let ctx = context(8);
        let (a, b) = wired_pair(&ctx);
        let nodes = ctx.node_count();
        let mut eq = EqualizerBank::new(EqualizerSettings::default());

        assert!(!eq.connect(&ctx, a, b));
        assert!(ctx.is_connected(a, b));
        assert_eq!(ctx.node_count(), nodes);
        assert!(!eq.is_connected());
    }
}
