//! Read-only per-tick snapshots for the visualizer.
//!
//! Field names and order are fixed so consecutive frames can be animated.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::neuron::{ElementId, Neuron, PositionBias, SelfBias};
use crate::store::NeuronStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronSnapshot {
    pub self_bias: SelfBias,
    pub position_bias: PositionBias,
    pub chosen_pattern: u8,
    pub cycles: u64,
}

impl From<&Neuron> for NeuronSnapshot {
    fn from(n: &Neuron) -> Self {
        NeuronSnapshot {
            self_bias: *n.self_bias(),
            position_bias: *n.position_bias(),
            chosen_pattern: n.pattern().index() as u8,
            cycles: n.cycles(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub tick: u64,
    pub neurons: BTreeMap<ElementId, NeuronSnapshot>,
}

impl Frame {
    pub fn capture(tick: u64, store: &NeuronStore) -> Self {
        Frame {
            tick,
            neurons: store
                .all()
                .map(|n| (ElementId::from(n.id()), NeuronSnapshot::from(n)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameRecorder {
    frames: Vec<Frame>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Hand the recorded frames over, leaving the recorder empty.
    pub fn drain(&mut self) -> Vec<Frame> {
        core::mem::take(&mut self.frames)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.frames).unwrap_or_else(|_| String::from("[]"))
    }
}
