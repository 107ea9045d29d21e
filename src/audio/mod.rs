//! Audio Graph Module - in-process audio context
//!
//! ノードは処理のみを行い、エッジは常にユニティゲイン。
//! レベル制御は GainNode のパラメータで行う。

mod buffer;
mod edge;
mod graph;
mod meters;
mod node;

pub mod analyser;
pub mod biquad;
pub mod context;
pub mod gain;
pub mod param;
pub mod pitch;
pub mod sink;
pub mod source;

pub use analyser::AnalyserTap;
pub use biquad::BiquadParams;
pub use buffer::AudioBuffer;
pub use context::{AudioContext, ContextOptions, ContextState, GraphTransaction, Topology};
pub use edge::{Edge, EdgeId};
pub use graph::AudioGraph;
pub use meters::{GraphMeters, NodeMeter, PortMeter};
pub use node::{AudioNode, NodeHandle, NodeType, PortId, Ports};
pub use param::AudioParam;
pub use pitch::PitchParams;

/// Maximum frames per render call
pub const MAX_FRAMES: usize = 4096;

/// Default sample rate
pub const SAMPLE_RATE: f64 = 48000.0;
