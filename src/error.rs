//! Error types

use crate::audio::NodeHandle;
use thiserror::Error;

/// Errors raised by the audio context while building or rewiring the graph.
///
/// These never reach the host directly: the controller and the equalizer catch them
/// at the call site and report a `bool` / `Option` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("audio context is closed")]
    ContextClosed,
    #[error("media element has no loaded source")]
    NoSource,
    #[error("media element is already bound to a source node")]
    ElementAlreadyBound,
    #[error("node limit reached ({0} nodes)")]
    NodeLimitReached(usize),
    #[error("unknown node {0:?}")]
    UnknownNode(NodeHandle),
    #[error("edge {0:?} -> {1:?} already exists")]
    DuplicateEdge(NodeHandle, NodeHandle),
    #[error("{0:?} has no output port or {1:?} has no input port")]
    InvalidConnection(NodeHandle, NodeHandle),
    #[error("edge {0:?} -> {1:?} would create a cycle")]
    CycleDetected(NodeHandle, NodeHandle),
}

/// Rejected fade configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FadeConfigError {
    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidValue { field: &'static str, value: f64 },
    #[error("region end ({end}) must be after region start ({start})")]
    EmptyRegion { start: f64, end: f64 },
}

/// Configuration load/save failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
