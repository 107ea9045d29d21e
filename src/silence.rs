//! Silence Region Detector
//!
//! Scans a precomputed amplitude envelope for runs below a threshold. Results are
//! memoized so slider sweeps that revisit a setting cost a hash lookup.

use crate::config::SilenceSettings;
use crate::dsp::Dsp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A silent span `[start, end)` in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilenceRegion {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl SilenceRegion {
    fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            duration: end - start,
        }
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// One detection request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceQuery {
    pub threshold_db: f32,
    pub min_duration: f64,
    pub region_start: Option<f64>,
    pub region_end: Option<f64>,
}

impl SilenceQuery {
    /// Whole file
    pub fn new(threshold_db: f32, min_duration: f64) -> Self {
        Self {
            threshold_db,
            min_duration,
            region_start: None,
            region_end: None,
        }
    }

    pub fn within(mut self, start: f64, end: f64) -> Self {
        self.region_start = Some(start);
        self.region_end = Some(end);
        self
    }
}

// ============ Cache ============

/// Float parts are keyed by bit pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    threshold: u32,
    min_duration: u64,
    envelope_len: usize,
    total_duration: u64,
    region_start: u64,
    region_end: u64,
}

struct CacheEntry {
    regions: Arc<[SilenceRegion]>,
    last_access: u64,
}

/// 近似LRUキャッシュ。満杯になったら古いものからまとめて捨てる
struct SilenceCache {
    entries: HashMap<CacheKey, CacheEntry>,
    capacity: usize,
    evict_batch: usize,
    /// Access counter for LRU
    access_counter: u64,
}

impl SilenceCache {
    fn new(capacity: usize, evict_batch: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            evict_batch: evict_batch.max(1),
            access_counter: 0,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Arc<[SilenceRegion]>> {
        self.access_counter += 1;
        let access = self.access_counter;
        let entry = self.entries.get_mut(key)?;
        entry.last_access = access;
        Some(Arc::clone(&entry.regions))
    }

    fn insert(&mut self, key: CacheKey, regions: Arc<[SilenceRegion]>) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.access_counter += 1;
        self.entries.insert(
            key,
            CacheEntry {
                regions,
                last_access: self.access_counter,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let mut by_age: Vec<(u64, CacheKey)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access, *key))
            .collect();
        by_age.sort_unstable_by_key(|(access, _)| *access);

        for (_, key) in by_age.into_iter().take(self.evict_batch) {
            self.entries.remove(&key);
        }
        log::debug!("[Silence] Evicted, {} entries left", self.entries.len());
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============ Detector ============

/// 無音区間検出器
///
/// 計算は同期的で、走査点数は `max_scan_points` 以下に抑えられる。
pub struct SilenceRegionDetector {
    max_scan_points: usize,
    cache: Mutex<SilenceCache>,
}

impl SilenceRegionDetector {
    pub fn new(settings: &SilenceSettings) -> Self {
        Self {
            max_scan_points: settings.max_scan_points.max(1),
            cache: Mutex::new(SilenceCache::new(settings.cache_capacity, settings.evict_batch)),
        }
    }

    /// Silent regions of `envelope` (spanning `total_duration` seconds), sorted by start.
    pub fn detect(
        &self,
        envelope: &[f32],
        total_duration: f64,
        query: &SilenceQuery,
    ) -> Arc<[SilenceRegion]> {
        let empty: Arc<[SilenceRegion]> = Arc::from(Vec::new());
        if envelope.is_empty() || !total_duration.is_finite() || total_duration <= 0.0 {
            return empty;
        }
        if !query.min_duration.is_finite() {
            return empty;
        }
        let min_duration = query.min_duration.max(0.0);

        let start = query.region_start.unwrap_or(0.0).clamp(0.0, total_duration);
        let end = query.region_end.unwrap_or(total_duration).clamp(0.0, total_duration);
        // NaN bounds fail this comparison too
        if !(end > start) || min_duration > end - start {
            return empty;
        }

        let key = CacheKey {
            threshold: query.threshold_db.to_bits(),
            min_duration: min_duration.to_bits(),
            envelope_len: envelope.len(),
            total_duration: total_duration.to_bits(),
            region_start: start.to_bits(),
            region_end: end.to_bits(),
        };
        if let Some(hit) = self.cache.lock().get(&key) {
            return hit;
        }

        let threshold = Dsp::from_db(query.threshold_db);
        let regions: Arc<[SilenceRegion]> =
            self.scan(envelope, total_duration, threshold, min_duration, start, end).into();
        self.cache.lock().insert(key, Arc::clone(&regions));
        regions
    }

    fn scan(
        &self,
        envelope: &[f32],
        total_duration: f64,
        threshold: f32,
        min_duration: f64,
        start: f64,
        end: f64,
    ) -> Vec<SilenceRegion> {
        let len = envelope.len();
        let seconds_per_point = total_duration / len as f64;
        let first = ((start / seconds_per_point).floor() as usize).min(len);
        let last = ((end / seconds_per_point).ceil() as usize).min(len);
        if last <= first {
            return Vec::new();
        }

        let span = last - first;
        let stride = span.div_ceil(self.max_scan_points).max(1);

        let mut regions = Vec::new();
        let mut emit = |run_start: f64, run_end: f64| {
            if run_end > run_start && run_end - run_start >= min_duration {
                regions.push(SilenceRegion::new(run_start, run_end));
            }
        };

        let mut run_start: Option<f64> = None;
        for i in (first..last).step_by(stride) {
            let time = (i as f64 * seconds_per_point).clamp(start, end);
            if envelope[i] < threshold {
                run_start.get_or_insert(time);
            } else if let Some(s) = run_start.take() {
                emit(s, time);
            }
        }
        // Run still open at the end of the range
        if let Some(s) = run_start {
            emit(s, end);
        }

        regions
    }

    /// Drop every memoized result (new file loaded)
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().entries.len()
    }
}

/// Spans of `[start, end]` not covered by `regions` (what a cut would keep)
pub fn kept_segments(regions: &[SilenceRegion], start: f64, end: f64) -> Vec<(f64, f64)> {
    let mut kept = Vec::new();
    let mut cursor = start;
    for region in regions {
        let region_start = region.start.max(start);
        if region_start > cursor {
            kept.push((cursor, region_start.min(end)));
        }
        cursor = cursor.max(region.end);
        if cursor >= end {
            break;
        }
    }
    if cursor < end {
        kept.push((cursor, end));
    }
    kept
}

/// Total silent time in seconds
pub fn total_silence(regions: &[SilenceRegion]) -> f64 {
    regions.iter().map(|r| r.duration).sum()
}
