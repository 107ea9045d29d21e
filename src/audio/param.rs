//! AudioParam - lock-free automatable node parameter

use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// ノードパラメータのハンドル
///
/// クローンはすべて同じ値を共有する。書き込みは last-writer-wins で、
/// レンダースレッドは各クォンタムの開始時に値を読む。
#[derive(Debug, Clone)]
pub struct AudioParam {
    value: Arc<AtomicF32>,
    min: f32,
    max: f32,
    default: f32,
}

impl AudioParam {
    pub fn new(default: f32, min: f32, max: f32) -> Self {
        let default = default.clamp(min, max);
        Self {
            value: Arc::new(AtomicF32::new(default)),
            min,
            max,
            default,
        }
    }

    /// Current value
    #[inline]
    pub fn value(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    /// Write a new value, clamped into range.
    ///
    /// Non-finite input is ignored and reported with `false`.
    #[inline]
    pub fn set_value(&self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.value
            .store(value.clamp(self.min, self.max), Ordering::Release);
        true
    }

    /// Restore the default value
    pub fn reset(&self) {
        self.value.store(self.default, Ordering::Release);
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    /// Whether two handles point at the same parameter
    pub fn same_as(&self, other: &AudioParam) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}
