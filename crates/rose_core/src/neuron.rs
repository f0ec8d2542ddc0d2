use alloc::string::String;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::encoder::FeatureVector;
use crate::error::{Result, RoseError};
use crate::linalg::{self, Mat5};

pub const NUM_PATTERNS: usize = 5;
/// Canonical neighbour slots; slot 4 means "no neighbour expected".
pub const NUM_SLOTS: usize = 5;

/// Stable element identity handed over by the extraction layer.
pub type ElementId = String;

/// Categorical belief over the five patterns (non-negative, sums to 1).
pub type SelfBias = [f64; NUM_PATTERNS];

/// Row i: distribution over the canonical slots for the i-th arriving
/// neighbour. Row-stochastic.
pub type PositionBias = Mat5;

/// The five canonical structural patterns. `Unknown` doubles as the void
/// pattern and as the state of a neuron that has not run a cycle yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatternId {
    /// Block that groups other elements (section, card, nav)
    Container = 0,
    /// Repeated siblings (list rows, menu items)
    Listing = 1,
    /// Something to click: links and buttons
    Actionable = 2,
    /// Text entry and form controls
    Form = 3,
    Unknown = 4,
}

impl PatternId {
    pub const ALL: [PatternId; NUM_PATTERNS] = [
        PatternId::Container,
        PatternId::Listing,
        PatternId::Actionable,
        PatternId::Form,
        PatternId::Unknown,
    ];

    pub fn from_index(id: u8) -> Result<Self> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(RoseError::UnknownPattern(id))
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for PatternId {
    type Error = RoseError;

    fn try_from(id: u8) -> Result<Self> {
        Self::from_index(id)
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.index())
    }
}

/// Live classification state of one tracked element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NeuronState")]
pub struct Neuron {
    id: ElementId,
    features: FeatureVector,
    self_bias: SelfBias,
    position_bias: PositionBias,
    pattern: PatternId,
    cycles: u64,
}

impl Neuron {
    /// Fresh state: uniform beliefs, pattern unknown, no cycles run.
    pub fn new(id: impl Into<ElementId>) -> Self {
        Neuron {
            id: id.into(),
            features: FeatureVector::void(),
            self_bias: [linalg::UNIFORM; NUM_PATTERNS],
            position_bias: linalg::uniform_matrix(),
            pattern: PatternId::Unknown,
            cycles: 0,
        }
    }

    /// Build a neuron from explicit state, checking the bias invariants.
    pub fn with_state(
        id: impl Into<ElementId>,
        features: FeatureVector,
        self_bias: SelfBias,
        position_bias: PositionBias,
        pattern: PatternId,
    ) -> Result<Self> {
        if !is_distribution(&self_bias) {
            return Err(RoseError::MalformedInput("self bias is not a distribution".into()));
        }
        if !position_bias.iter().all(is_distribution) {
            return Err(RoseError::MalformedInput(
                "position bias is not row-stochastic".into(),
            ));
        }
        Ok(Neuron {
            id: id.into(),
            features,
            self_bias,
            position_bias,
            pattern,
            cycles: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    pub fn self_bias(&self) -> &SelfBias {
        &self.self_bias
    }

    pub fn position_bias(&self) -> &PositionBias {
        &self.position_bias
    }

    pub fn pattern(&self) -> PatternId {
        self.pattern
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub(crate) fn set_features(&mut self, features: FeatureVector) {
        self.features = features;
    }

    pub(crate) fn set_self_bias(&mut self, b: SelfBias) {
        self.self_bias = b;
    }

    pub(crate) fn set_position_bias(&mut self, m: PositionBias) {
        self.position_bias = m;
    }

    pub(crate) fn set_pattern(&mut self, pattern: PatternId) {
        self.pattern = pattern;
    }

    pub(crate) fn advance(&mut self) {
        self.cycles += 1;
    }
}

/// Unchecked wire form; only reaches a [`Neuron`] through `with_state`.
#[derive(Deserialize)]
struct NeuronState {
    id: ElementId,
    features: FeatureVector,
    self_bias: SelfBias,
    position_bias: PositionBias,
    pattern: PatternId,
    cycles: u64,
}

impl TryFrom<NeuronState> for Neuron {
    type Error = RoseError;

    fn try_from(state: NeuronState) -> Result<Self> {
        let mut neuron = Neuron::with_state(
            state.id,
            state.features,
            state.self_bias,
            state.position_bias,
            state.pattern,
        )?;
        neuron.cycles = state.cycles;
        Ok(neuron)
    }
}

fn is_distribution(row: &[f64; NUM_SLOTS]) -> bool {
    let sum: f64 = row.iter().sum();
    row.iter().all(|x| x.is_finite() && *x >= 0.0) && libm::fabs(sum - 1.0) <= 1e-9
}
