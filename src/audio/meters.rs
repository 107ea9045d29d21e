//! Metering types

use super::node::NodeHandle;

/// Port meter (single channel)
#[derive(Debug, Clone, Default)]
pub struct PortMeter {
    pub peak: f32,
}

impl PortMeter {
    pub fn new(peak: f32) -> Self {
        Self { peak }
    }
}

/// Node meter (all ports)
#[derive(Debug, Clone)]
pub struct NodeMeter {
    pub handle: NodeHandle,
    pub label: String,
    pub inputs: Vec<PortMeter>,
    pub outputs: Vec<PortMeter>,
}

impl NodeMeter {
    pub fn new(handle: NodeHandle, label: impl Into<String>) -> Self {
        Self {
            handle,
            label: label.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Loudest output port
    pub fn output_peak(&self) -> f32 {
        self.outputs.iter().fold(0.0, |acc, m| acc.max(m.peak))
    }
}

/// All meters for the graph, one snapshot per render quantum
#[derive(Debug, Clone, Default)]
pub struct GraphMeters {
    pub nodes: Vec<NodeMeter>,
    pub timestamp: u64,
}

impl GraphMeters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&NodeMeter> {
        self.nodes.iter().find(|m| m.handle == handle)
    }
}
