//! Rose: the pattern library.
//!
//! Holds the fixed prior for the five canonical patterns. Each pattern has a
//! self expectation (what an element of that pattern looks like) and five
//! position expectations (what its neighbour in each canonical slot looks
//! like). Slot 4 is "no neighbour expected" and is normally the zero vector.
//!
//! The library is read-only during a tick. It can be built from hard-coded
//! priors ([`PatternLibrary::default_priors`]), from accumulated statistics
//! ([`PatternLibrary::from_statistics`]) or loaded from JSON, and it can be
//! slowly re-estimated between ticks ([`PatternLibrary::reestimate`]).

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::encoder::{FeatureVector, Predicate, FEATURE_DIM, PAIRS, PAIR_OFFSET, TRIPLES, TRIPLE_OFFSET, VOID_INDEX};
use crate::error::{Result, RoseError};
use crate::linalg::{self, Mat5};
use crate::neuron::{PatternId, NUM_PATTERNS, NUM_SLOTS};

/// Neighbour vectors placed into their canonical slots for one cycle.
/// Slot every default pattern leaves without a position expectation.
pub const EMPTY_SLOT: usize = NUM_SLOTS - 1;

pub type SlottedNeighbours = [Option<FeatureVector>; NUM_SLOTS];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub self_expectation: FeatureVector,
    pub positions: [FeatureVector; NUM_SLOTS],
}

/// On-disk form: plain numbers, checked on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PatternRecord {
    id: u8,
    self_expectation: Vec<f64>,
    positions: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LibraryRecord {
    patterns: Vec<PatternRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternLibrary {
    patterns: [Pattern; NUM_PATTERNS],
}

fn construction(msg: String) -> RoseError {
    RoseError::LibraryConstruction(msg)
}

impl PatternLibrary {
    /// Assemble a library from exactly five patterns with distinct ids.
    pub fn new(patterns: Vec<Pattern>) -> Result<Self> {
        if patterns.len() != NUM_PATTERNS {
            return Err(construction(format!(
                "expected {} patterns, got {}",
                NUM_PATTERNS,
                patterns.len()
            )));
        }
        let mut slots: [Option<Pattern>; NUM_PATTERNS] = Default::default();
        for p in patterns {
            let idx = p.id.index();
            if slots[idx].is_some() {
                return Err(construction(format!("pattern {} supplied twice", p.id)));
            }
            slots[idx] = Some(p);
        }
        // Five distinct ids out of five possible: every slot is filled
        let patterns = slots.map(|p| p.unwrap_or_else(|| Pattern::zero(PatternId::Unknown)));
        Ok(PatternLibrary { patterns })
    }

    /// Canonical priors derived from the encoder's predicate layout.
    pub fn default_priors() -> Self {
        use Predicate::*;

        let container = Pattern {
            id: PatternId::Container,
            self_expectation: expectation(&[(Visible, 1.0), (Container, 1.0), (HasText, 0.3)], &[], &[]),
            positions: [
                expectation(&[(Container, 1.0), (Visible, 0.8)], &[], &[]),
                expectation(&[(Container, 0.8), (Visible, 0.8)], &[], &[]),
                expectation(&[(Container, 0.8), (Visible, 0.8)], &[], &[]),
                expectation(&[(Heading, 0.6), (HasText, 0.6), (ListItem, 0.4)], &[9], &[1]),
                FeatureVector::zeros(),
            ],
        };

        let listing = Pattern {
            id: PatternId::Listing,
            self_expectation: expectation(
                &[(ListItem, 1.0), (Visible, 1.0), (HasText, 0.6), (Link, 0.4)],
                &[6, 7],
                &[2],
            ),
            positions: [
                expectation(&[(Container, 1.0), (Visible, 0.8)], &[8], &[]),
                expectation(&[(ListItem, 1.0), (Visible, 0.8), (HasText, 0.5)], &[7], &[]),
                expectation(&[(ListItem, 1.0), (Visible, 0.8), (HasText, 0.5)], &[7], &[]),
                expectation(&[(Link, 0.7), (Clickable, 0.7), (HasText, 0.5)], &[2, 3], &[0]),
                FeatureVector::zeros(),
            ],
        };

        let actionable = Pattern {
            id: PatternId::Actionable,
            self_expectation: expectation(
                &[(Visible, 1.0), (Clickable, 1.0), (Link, 0.8), (HasText, 0.6)],
                &[1, 3, 2],
                &[0],
            ),
            positions: [
                expectation(&[(ListItem, 0.6), (Container, 0.6), (Visible, 0.8)], &[], &[]),
                expectation(&[(Clickable, 0.8), (Link, 0.6), (Visible, 0.8)], &[1, 3], &[]),
                expectation(&[(Clickable, 0.8), (Link, 0.6), (Visible, 0.8)], &[1, 3], &[]),
                expectation(&[(Image, 0.5), (HasText, 0.5)], &[], &[]),
                FeatureVector::zeros(),
            ],
        };

        let form = Pattern {
            id: PatternId::Form,
            self_expectation: expectation(
                &[(Input, 1.0), (Visible, 1.0), (Clickable, 0.5)],
                &[4],
                &[4],
            ),
            positions: [
                expectation(&[(Container, 1.0), (Visible, 0.8)], &[], &[]),
                expectation(&[(HasText, 0.8), (Visible, 0.8)], &[0], &[]),
                expectation(&[(Input, 0.7), (Clickable, 0.5), (Visible, 0.8)], &[4], &[]),
                FeatureVector::zeros(),
                FeatureVector::zeros(),
            ],
        };

        let mut void_only = [0.0; FEATURE_DIM];
        void_only[VOID_INDEX] = 1.0;
        let void = FeatureVector::clamped(void_only);
        let unknown = Pattern {
            id: PatternId::Unknown,
            self_expectation: void,
            positions: [void, void, void, void, FeatureVector::zeros()],
        };

        PatternLibrary {
            patterns: [container, listing, actionable, form, unknown],
        }
    }

    /// Build from accumulated observations. Patterns or slots that were never
    /// observed keep the default prior.
    pub fn from_statistics(stats: &PatternStatistics) -> Self {
        let mut library = Self::default_priors();
        library.reestimate(stats, 1.0);
        library
    }

    pub fn pattern(&self, id: PatternId) -> &Pattern {
        &self.patterns[id.index()]
    }

    pub fn patterns(&self) -> &[Pattern; NUM_PATTERNS] {
        &self.patterns
    }

    /// Expectations for a raw pattern id.
    pub fn expectation_for(&self, id: u8) -> Result<(&FeatureVector, &[FeatureVector; NUM_SLOTS])> {
        let p = self.pattern(PatternId::from_index(id)?);
        Ok((&p.self_expectation, &p.positions))
    }

    /// d = X·x: alignment of `x` against every pattern's self expectation.
    pub fn self_alignment(&self, x: &FeatureVector) -> [f64; NUM_PATTERNS] {
        let mut d = [0.0; NUM_PATTERNS];
        for (k, p) in self.patterns.iter().enumerate() {
            d[k] = p.self_expectation.dot(x);
        }
        d
    }

    /// D_j = P_j · N. Entry `[s][t]` correlates slot `s`'s expectation with
    /// the neighbour placed into slot `t`; empty slots are zero columns.
    pub fn position_correlation(&self, id: PatternId, neighbours: &SlottedNeighbours) -> Mat5 {
        let p = self.pattern(id);
        let mut d = [[0.0; NUM_SLOTS]; NUM_SLOTS];
        for (s, expected) in p.positions.iter().enumerate() {
            for (t, observed) in neighbours.iter().enumerate() {
                if let Some(n) = observed {
                    d[s][t] = expected.dot(n);
                }
            }
        }
        d
    }

    /// Position-bias prior used when a neuron switches to `id`.
    ///
    /// Row i is `(e_i + m) / 2` where `m` is the slots' share of the
    /// pattern's total position-expectation mass (uniform if the pattern
    /// expects nothing anywhere). Row-stochastic by construction.
    pub fn position_prior(&self, id: PatternId) -> Mat5 {
        let p = self.pattern(id);
        let mut mass = [0.0; NUM_SLOTS];
        for (s, v) in p.positions.iter().enumerate() {
            mass[s] = v.as_array().iter().sum();
        }
        let m = linalg::normalize(&mass).unwrap_or_else(linalg::uniform_row);

        let mut prior = [[0.0; NUM_SLOTS]; NUM_SLOTS];
        for (i, row) in prior.iter_mut().enumerate() {
            for (s, x) in row.iter_mut().enumerate() {
                let own = if i == s { 1.0 } else { 0.0 };
                *x = 0.5 * (own + m[s]);
            }
        }
        prior
    }

    /// Move every vector towards the observed means by `rate` (clamped to
    /// [0, 1]). Components stay within [0, 1].
    pub fn reestimate(&mut self, stats: &PatternStatistics, rate: f64) {
        let rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };
        for (k, pattern) in self.patterns.iter_mut().enumerate() {
            let acc = &stats.accumulators[k];
            if let Some(mean) = acc.self_mean() {
                pattern.self_expectation = blend(&pattern.self_expectation, &mean, rate);
            }
            // The last slot holds no expectation; neighbours landing there stay unscored
            for s in 0..EMPTY_SLOT {
                if let Some(mean) = acc.position_mean(s) {
                    pattern.positions[s] = blend(&pattern.positions[s], &mean, rate);
                }
            }
        }
        log::info!(
            "pattern library re-estimated from {} observations (rate {})",
            stats.total(),
            rate
        );
    }

    pub fn to_json(&self) -> String {
        let record = LibraryRecord {
            patterns: self
                .patterns
                .iter()
                .map(|p| PatternRecord {
                    id: p.id.index() as u8,
                    self_expectation: p.self_expectation.as_array().to_vec(),
                    positions: p.positions.iter().map(|v| v.as_array().to_vec()).collect(),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&record).unwrap_or_else(|_| String::from("{}"))
    }

    /// Parse and validate a library. Every shape problem is reported as
    /// [`RoseError::LibraryConstruction`].
    pub fn from_json(json: &str) -> Result<Self> {
        let record: LibraryRecord =
            serde_json::from_str(json).map_err(|e| construction(format!("invalid JSON: {}", e)))?;

        let mut patterns = Vec::with_capacity(record.patterns.len());
        for r in record.patterns {
            let id = PatternId::from_index(r.id)
                .map_err(|_| construction(format!("pattern id {} outside 0..=4", r.id)))?;
            let self_expectation = FeatureVector::try_from_slice(&r.self_expectation)
                .map_err(|e| construction(format!("pattern {} self expectation: {}", r.id, e)))?;
            if r.positions.len() != NUM_SLOTS {
                return Err(construction(format!(
                    "pattern {} has {} position expectations, expected {}",
                    r.id,
                    r.positions.len(),
                    NUM_SLOTS
                )));
            }
            let mut positions = [FeatureVector::zeros(); NUM_SLOTS];
            for (s, raw) in r.positions.iter().enumerate() {
                positions[s] = FeatureVector::try_from_slice(raw).map_err(|e| {
                    construction(format!("pattern {} position {}: {}", r.id, s, e))
                })?;
            }
            patterns.push(Pattern {
                id,
                self_expectation,
                positions,
            });
        }
        Self::new(patterns)
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::default_priors()
    }
}

impl Pattern {
    fn zero(id: PatternId) -> Self {
        Pattern {
            id,
            self_expectation: FeatureVector::zeros(),
            positions: [FeatureVector::zeros(); NUM_SLOTS],
        }
    }
}

/// Expectation vector from weighted base predicates plus pair/triple indices
/// (into [`PAIRS`] and [`TRIPLES`]) that take the weaker weight of their members.
fn expectation(base: &[(Predicate, f64)], pairs: &[usize], triples: &[usize]) -> FeatureVector {
    let mut v = [0.0; FEATURE_DIM];
    for &(p, w) in base {
        v[p.index()] = w;
    }
    for &k in pairs {
        let (a, b) = PAIRS[k];
        v[PAIR_OFFSET + k] = v[a.index()].min(v[b.index()]);
    }
    for &k in triples {
        let (a, b, c) = TRIPLES[k];
        v[TRIPLE_OFFSET + k] = v[a.index()].min(v[b.index()]).min(v[c.index()]);
    }
    FeatureVector::clamped(v)
}

fn blend(current: &FeatureVector, target: &[f64; FEATURE_DIM], rate: f64) -> FeatureVector {
    let mut v = [0.0; FEATURE_DIM];
    for (i, x) in v.iter_mut().enumerate() {
        *x = (1.0 - rate) * current.get(i) + rate * target[i];
    }
    FeatureVector::clamped(v)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Accumulator {
    count: u64,
    self_sum: Vec<f64>,
    position_count: [u64; NUM_SLOTS],
    position_sum: Vec<Vec<f64>>,
}

impl Accumulator {
    fn add(sum: &mut Vec<f64>, v: &FeatureVector) {
        if sum.len() != FEATURE_DIM {
            sum.resize(FEATURE_DIM, 0.0);
        }
        for (s, x) in sum.iter_mut().zip(v.as_array()) {
            *s += x;
        }
    }

    fn mean(sum: &[f64], count: u64) -> Option<[f64; FEATURE_DIM]> {
        if count == 0 || sum.len() != FEATURE_DIM {
            return None;
        }
        let mut m = [0.0; FEATURE_DIM];
        for (i, x) in m.iter_mut().enumerate() {
            *x = sum[i] / count as f64;
        }
        Some(m)
    }

    fn self_mean(&self) -> Option<[f64; FEATURE_DIM]> {
        Self::mean(&self.self_sum, self.count)
    }

    fn position_mean(&self, slot: usize) -> Option<[f64; FEATURE_DIM]> {
        Self::mean(self.position_sum.get(slot)?, self.position_count[slot])
    }
}

/// Running per-pattern sums of committed observations, used to build or
/// re-estimate a library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStatistics {
    accumulators: [Accumulator; NUM_PATTERNS],
}

impl PatternStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pattern: PatternId, features: &FeatureVector, neighbours: &SlottedNeighbours) {
        let acc = &mut self.accumulators[pattern.index()];
        acc.count += 1;
        Accumulator::add(&mut acc.self_sum, features);
        if acc.position_sum.len() != NUM_SLOTS {
            acc.position_sum.resize(NUM_SLOTS, Vec::new());
        }
        for (s, n) in neighbours.iter().enumerate() {
            if let Some(v) = n {
                acc.position_count[s] += 1;
                Accumulator::add(&mut acc.position_sum[s], v);
            }
        }
    }

    pub fn count(&self, pattern: PatternId) -> u64 {
        self.accumulators[pattern.index()].count
    }

    pub fn total(&self) -> u64 {
        self.accumulators.iter().map(|a| a.count).sum()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
