//! Nexus: the per-element alignment cycle.
//!
//! One cycle takes a neuron's committed state, its freshly encoded feature
//! vector and up to five neighbour vectors, and produces the next state:
//!
//! 1. self alignment `d = X·x` against every pattern
//! 2. neighbour `i` goes to the arg-max slot of bias row `i` (lowest index on
//!    ties, first claim wins, later neighbours take their best free slot)
//! 3. position correlation `D_j = P_j · N` for the current hypothesis `j`
//! 4. `B_new = rownorm(D_j · B)`; zero rows become uniform; a cycle with no
//!    neighbours carries no position evidence and leaves `B` as it is
//! 5. dominant eigenpair `(λ, v)` of `B_newᵀ` (the stationary weighting of
//!    the slots), `V = diag(v vᵀ)`
//! 6. `b_new = norm(V·b)`; degenerate results keep `b`
//! 7. `O = d + Σ D_j[s][s]` on the hypothesis entry gives the score; the
//!    arg-max of `b_new` decides keep or switch (switch resets `B` to the
//!    new pattern's prior)
//! 8. cycle counter advances
//!
//! [`Nexus::step`] is pure. [`Nexus::cycle`] commits its result in one
//! assignment, so a failed or abandoned cycle never leaves a half-updated
//! neuron behind.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::config::NexusConfig;
use crate::encoder::FeatureVector;
use crate::error::Result;
use crate::linalg::{self, Mat5};
use crate::neuron::{Neuron, PatternId, SelfBias, NUM_PATTERNS, NUM_SLOTS};
use crate::rose::{PatternLibrary, SlottedNeighbours};

/// Share of the alignment score above which a classification counts as confident.
pub const CONFIDENCE_SHARE: f64 = 0.5;

/// What the navigation layer sees for one element per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub chosen_pattern: PatternId,
    /// Chosen pattern's share of the combined alignment score, in [0, 1]
    pub score: f64,
    pub switched: bool,
}

impl AlignmentResult {
    pub fn confident(&self) -> bool {
        self.score >= CONFIDENCE_SHARE
    }
}

/// Pattern hypothesis state machine: states are the five patterns, the
/// only transition is "arg-max of the new self bias differs from current".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Keep(PatternId),
    Switch { from: PatternId, to: PatternId },
}

impl Transition {
    pub fn decide(current: PatternId, self_bias: &SelfBias) -> Self {
        let best = PatternId::ALL[linalg::argmax(self_bias)];
        if best == current {
            Transition::Keep(current)
        } else {
            Transition::Switch {
                from: current,
                to: best,
            }
        }
    }

    pub fn target(self) -> PatternId {
        match self {
            Transition::Keep(p) => p,
            Transition::Switch { to, .. } => to,
        }
    }

    pub fn is_switch(self) -> bool {
        matches!(self, Transition::Switch { .. })
    }
}

/// Everything one cycle produced, before it is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub next: Neuron,
    pub result: AlignmentResult,
    /// Neighbours as placed into slots this cycle
    pub slotted: SlottedNeighbours,
    /// Rows or vectors that needed a normalization fallback
    pub degenerate: usize,
    /// Eigen step failed to settle and the self bias was kept
    pub eigen_fallback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Nexus {
    config: NexusConfig,
}

impl Nexus {
    pub fn new(config: NexusConfig) -> Self {
        Nexus { config }
    }

    pub fn config(&self) -> &NexusConfig {
        &self.config
    }

    /// Run one cycle and commit it into `neuron`.
    pub fn cycle(
        &self,
        neuron: &mut Neuron,
        library: &PatternLibrary,
        features: FeatureVector,
        neighbours: &[FeatureVector],
    ) -> AlignmentResult {
        let step = self.step(neuron, library, features, neighbours);
        *neuron = step.next;
        step.result
    }

    /// Cycle over unvalidated input. Any malformed vector fails the whole
    /// cycle before anything is touched.
    pub fn cycle_raw(
        &self,
        neuron: &mut Neuron,
        library: &PatternLibrary,
        features: &[f64],
        neighbours: &[&[f64]],
    ) -> Result<AlignmentResult> {
        let features = FeatureVector::try_from_slice(features)?;
        let neighbours = neighbours
            .iter()
            .map(|n| FeatureVector::try_from_slice(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.cycle(neuron, library, features, &neighbours))
    }

    /// Compute the next state without mutating anything.
    pub fn step(
        &self,
        neuron: &Neuron,
        library: &PatternLibrary,
        features: FeatureVector,
        neighbours: &[FeatureVector],
    ) -> Step {
        let current = neuron.pattern();
        let bias_matrix = neuron.position_bias();
        let mut degenerate = 0;

        let d = library.self_alignment(&features);

        let slotted = assign_slots(bias_matrix, neighbours);
        let assigned = slotted.iter().filter(|s| s.is_some()).count();

        let correlation = library.position_correlation(current, &slotted);

        let updated_matrix = if assigned == 0 {
            *bias_matrix
        } else {
            let (m, zero_rows) = linalg::normalize_rows(&linalg::mat_mul(&correlation, bias_matrix));
            degenerate += zero_rows;
            m
        };

        let mut eigen_fallback = false;
        let next_bias = match linalg::dominant_eigenpair(
            &linalg::transpose(&updated_matrix),
            self.config.eigen_max_iterations,
            self.config.eigen_tolerance,
        ) {
            Some((_lambda, v)) => {
                let mut raw = *neuron.self_bias();
                for (b, vi) in raw.iter_mut().zip(v.iter()) {
                    *b *= vi * vi;
                }
                match linalg::normalize(&raw) {
                    Some(b) => b,
                    None => {
                        degenerate += 1;
                        *neuron.self_bias()
                    }
                }
            }
            None => {
                eigen_fallback = true;
                *neuron.self_bias()
            }
        };

        let mut alignment = d;
        for s in 0..NUM_SLOTS {
            if slotted[s].is_some() {
                alignment[current.index()] += correlation[s][s];
            }
        }

        let transition = Transition::decide(current, &next_bias);
        let chosen = transition.target();
        let score = share(&alignment, chosen);

        let mut next = neuron.clone();
        next.set_features(features);
        next.set_self_bias(next_bias);
        next.set_pattern(chosen);
        if transition.is_switch() {
            log::debug!("{} switched {} -> {}", neuron.id(), current, chosen);
            next.set_position_bias(library.position_prior(chosen));
        } else {
            next.set_position_bias(updated_matrix);
        }
        next.advance();

        Step {
            next,
            result: AlignmentResult {
                chosen_pattern: chosen,
                score,
                switched: transition.is_switch(),
            },
            slotted,
            degenerate,
            eigen_fallback,
        }
    }
}

/// Place neighbours (in arrival order, at most five) into canonical slots.
pub fn assign_slots(bias_matrix: &Mat5, neighbours: &[FeatureVector]) -> SlottedNeighbours {
    let mut slotted: SlottedNeighbours = [None; NUM_SLOTS];
    for (i, n) in neighbours.iter().take(NUM_SLOTS).enumerate() {
        let row = &bias_matrix[i];
        let mut best: Option<usize> = None;
        for s in 0..NUM_SLOTS {
            if slotted[s].is_some() {
                continue;
            }
            if best.map_or(true, |b| row[s] > row[b]) {
                best = Some(s);
            }
        }
        if let Some(s) = best {
            slotted[s] = Some(*n);
        }
    }
    slotted
}

fn share(alignment: &[f64; NUM_PATTERNS], pattern: PatternId) -> f64 {
    let total: f64 = alignment.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return 0.0;
    }
    (alignment[pattern.index()] / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode, RawAttributes, FEATURE_DIM};
    use crate::rose::Pattern;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn visible(tag: &str) -> FeatureVector {
        let mut raw = RawAttributes::new(tag);
        raw.visible = true;
        raw.text_len = 4;
        encode(&raw)
    }

    /// Pattern 0 expects exactly `x`; every other pattern expects nothing.
    fn single_pattern_library(x: FeatureVector) -> PatternLibrary {
        let patterns = PatternId::ALL
            .iter()
            .map(|&id| Pattern {
                id,
                self_expectation: if id == PatternId::Container { x } else { FeatureVector::zeros() },
                positions: [FeatureVector::zeros(); NUM_SLOTS],
            })
            .collect();
        PatternLibrary::new(patterns).unwrap()
    }

    #[test]
    fn test_transition_state_machine() {
        let b = [0.1, 0.6, 0.1, 0.1, 0.1];
        assert_eq!(
            Transition::decide(PatternId::Listing, &b),
            Transition::Keep(PatternId::Listing)
        );
        let t = Transition::decide(PatternId::Form, &b);
        assert_eq!(
            t,
            Transition::Switch {
                from: PatternId::Form,
                to: PatternId::Listing
            }
        );
        assert!(t.is_switch());
        // Ties go to the lowest index
        assert_eq!(Transition::decide(PatternId::Unknown, &[0.2; 5]).target(), PatternId::Container);
    }

    #[test]
    fn test_assign_slots_uniform_rows_fill_in_order() {
        let n = [visible("li"), visible("a"), visible("div")];
        let slotted = assign_slots(&linalg::uniform_matrix(), &n);
        assert_eq!(slotted[0], Some(n[0]));
        assert_eq!(slotted[1], Some(n[1]));
        assert_eq!(slotted[2], Some(n[2]));
        assert_eq!(slotted[3], None);
    }

    #[test]
    fn test_assign_slots_follows_row_argmax_and_drops_extra() {
        let mut m = linalg::uniform_matrix();
        m[0] = [0.0, 0.0, 0.0, 1.0, 0.0];
        let n = [visible("li"); 7];
        let slotted = assign_slots(&m, &n);
        assert!(slotted[3].is_some());
        assert_eq!(slotted.iter().filter(|s| s.is_some()).count(), NUM_SLOTS);
    }

    #[test]
    fn test_end_to_end_uniform_start() {
        let x = visible("div");
        let lib = single_pattern_library(x);
        let nexus = Nexus::default();

        let mut neuron = Neuron::new("e2e");
        let result = nexus.cycle(&mut neuron, &lib, x, &[]);
        assert_eq!(result.chosen_pattern, PatternId::Container);
        assert!(result.switched);
        assert!(approx(result.score, 1.0));
        assert!(result.confident());
        assert_eq!(neuron.cycles(), 1);
        assert_eq!(*neuron.position_bias(), lib.position_prior(PatternId::Container));

        // Same scenario starting from pattern 0 keeps it
        let mut neuron = Neuron::with_state(
            "e2e",
            x,
            [0.2; NUM_PATTERNS],
            linalg::uniform_matrix(),
            PatternId::Container,
        )
        .unwrap();
        let result = nexus.cycle(&mut neuron, &lib, x, &[]);
        assert_eq!(result.chosen_pattern, PatternId::Container);
        assert!(!result.switched);
    }

    #[test]
    fn test_zero_neighbours_is_a_fixed_point_for_the_matrix() {
        let lib = PatternLibrary::default_priors();
        let nexus = Nexus::default();
        // Rank-one matrix whose stationary weighting favours slot 1, so the
        // Listing hypothesis is never abandoned
        let matrix = [[0.1, 0.6, 0.1, 0.1, 0.1]; NUM_SLOTS];
        let mut neuron = Neuron::with_state(
            "still",
            visible("li"),
            [0.1, 0.6, 0.1, 0.1, 0.1],
            matrix,
            PatternId::Listing,
        )
        .unwrap();
        for _ in 0..20 {
            let result = nexus.cycle(&mut neuron, &lib, visible("li"), &[]);
            assert!(!result.switched);
            assert_eq!(*neuron.position_bias(), matrix);
        }
        assert_eq!(neuron.cycles(), 20);
    }

    #[test]
    fn test_zero_correlation_rows_become_uniform() {
        // Void pattern expects void neighbours; a visible div correlates with nothing
        let lib = PatternLibrary::default_priors();
        let nexus = Nexus::default();
        let neuron = Neuron::new("void");
        let step = nexus.step(&neuron, &lib, FeatureVector::void(), &[visible("div")]);
        assert_eq!(step.degenerate, NUM_SLOTS);
        for row in step.next.position_bias() {
            assert!(approx(row.iter().sum(), 1.0));
        }
    }

    #[test]
    fn test_raw_cycle_rejects_malformed_without_mutation() {
        let lib = PatternLibrary::default_priors();
        let nexus = Nexus::default();
        let mut neuron = Neuron::new("raw");
        let before = neuron.clone();

        let good = [0.0; FEATURE_DIM];
        let short = [0.0; 3];
        let err = nexus.cycle_raw(&mut neuron, &lib, &good, &[&good, &short]);
        assert!(err.is_err());
        assert_eq!(neuron, before);

        let ok = nexus.cycle_raw(&mut neuron, &lib, &good, &[&good]);
        assert!(ok.is_ok());
        assert_eq!(neuron.cycles(), 1);
    }

    #[test]
    fn test_step_is_deterministic() {
        let lib = PatternLibrary::default_priors();
        let nexus = Nexus::default();
        let mut neuron = Neuron::new("det");
        let neighbours = [visible("li"), visible("li"), visible("ul")];
        nexus.cycle(&mut neuron, &lib, visible("li"), &neighbours);

        let a = nexus.step(&neuron, &lib, visible("li"), &neighbours);
        let b = nexus.step(&neuron, &lib, visible("li"), &neighbours);
        assert_eq!(a, b);
        for (x, y) in a.next.self_bias().iter().zip(b.next.self_bias()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }
}
