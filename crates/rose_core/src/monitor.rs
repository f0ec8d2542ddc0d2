//! Monitor: drives one classification pass per polling tick.
//!
//! A tick is computed in two phases. First every cycle runs against a
//! snapshot of its neuron (in parallel with the `parallel` feature), with the
//! library shared read-only. Only when all cycles are done, and the tick was
//! not cancelled, are removals and new states committed to the store. An
//! abandoned tick therefore leaves no trace.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::NexusConfig;
use crate::encoder::{self, FeatureVector, RawAttributes};
use crate::error::{Result, RoseError};
use crate::frames::{Frame, FrameRecorder};
use crate::neuron::{ElementId, Neuron};
use crate::nexus::{AlignmentResult, Nexus, Step};
use crate::rose::{PatternLibrary, PatternStatistics};
use crate::store::NeuronStore;

fn present() -> bool {
    true
}

/// One feed entry from the extraction layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ElementId,
    #[serde(default)]
    pub attributes: Option<RawAttributes>,
    /// Neighbours in arrival order
    #[serde(default)]
    pub neighbours: Vec<RawAttributes>,
    /// `false` means the element is gone
    #[serde(default = "present")]
    pub present: bool,
}

impl Observation {
    pub fn seen(id: &str, attributes: RawAttributes, neighbours: Vec<RawAttributes>) -> Self {
        Observation {
            id: ElementId::from(id),
            attributes: Some(attributes),
            neighbours,
            present: true,
        }
    }

    pub fn gone(id: &str) -> Self {
        Observation {
            id: ElementId::from(id),
            attributes: None,
            neighbours: Vec::new(),
            present: false,
        }
    }
}

/// What the navigation layer receives for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub results: BTreeMap<ElementId, AlignmentResult>,
    pub removed: Vec<ElementId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub ticks: u64,
    pub cycles: u64,
    pub switches: u64,
    pub removals: u64,
    /// Raw attribute sets that had to be encoded as void
    pub malformed: u64,
    /// Normalization fallbacks (zero rows, zero-sum bias)
    pub degenerate: u64,
    pub eigen_fallbacks: u64,
    pub cancelled: u64,
    pub duplicates: u64,
}

struct Work {
    neuron: Neuron,
    features: FeatureVector,
    neighbours: Vec<FeatureVector>,
}

pub struct Monitor {
    library: PatternLibrary,
    store: NeuronStore,
    nexus: Nexus,
    stats: MonitorStats,
    frames: FrameRecorder,
    statistics: PatternStatistics,
    tick: u64,
}

impl Monitor {
    pub fn new(library: PatternLibrary, config: NexusConfig) -> Self {
        Monitor {
            library,
            store: NeuronStore::new(),
            nexus: Nexus::new(config),
            stats: MonitorStats::default(),
            frames: FrameRecorder::new(),
            statistics: PatternStatistics::new(),
            tick: 0,
        }
    }

    pub fn library(&self) -> &PatternLibrary {
        &self.library
    }

    pub fn store(&self) -> &NeuronStore {
        &self.store
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn config(&self) -> &NexusConfig {
        self.nexus.config()
    }

    pub fn frames(&self) -> &FrameRecorder {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut FrameRecorder {
        &mut self.frames
    }

    pub fn statistics(&self) -> &PatternStatistics {
        &self.statistics
    }

    /// Number of ticks committed so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Current state of every live neuron.
    pub fn snapshot(&self) -> Frame {
        Frame::capture(self.tick, &self.store)
    }

    /// Swap in a new library. Takes `&mut self`, so it can only happen
    /// between ticks.
    pub fn set_library(&mut self, library: PatternLibrary) {
        self.library = library;
    }

    /// Blend the accumulated statistics into the library and start a new
    /// accumulation window. Returns how many observations were used.
    pub fn reestimate_library(&mut self) -> u64 {
        let used = self.statistics.total();
        if used > 0 {
            let rate = self.nexus.config().reestimate_rate;
            self.library.reestimate(&self.statistics, rate);
            self.statistics.clear();
        }
        used
    }

    pub fn tick(&mut self, observations: &[Observation]) -> TickReport {
        let never = AtomicBool::new(false);
        match self.tick_cancellable(observations, &never) {
            Ok(report) => report,
            Err(_) => TickReport::default(),
        }
    }

    /// Run one tick. If `cancel` is raised before the commit phase the tick
    /// is abandoned with [`RoseError::Cancelled`] and nothing is persisted.
    pub fn tick_cancellable(
        &mut self,
        observations: &[Observation],
        cancel: &AtomicBool,
    ) -> Result<TickReport> {
        let mut seen = BTreeSet::new();
        let mut removals = Vec::new();
        let mut work = Vec::new();
        let mut malformed = 0u64;

        for obs in observations {
            if !seen.insert(obs.id.as_str()) {
                log::warn!("duplicate observation for {} in tick {}, ignored", obs.id, self.tick);
                self.stats.duplicates += 1;
                continue;
            }
            if !obs.present {
                removals.push(obs.id.clone());
                continue;
            }

            if is_malformed(obs.attributes.as_ref()) {
                malformed += 1;
            }
            malformed += obs.neighbours.iter().filter(|n| is_malformed(Some(n))).count() as u64;

            let neuron = self
                .store
                .get(&obs.id)
                .cloned()
                .unwrap_or_else(|| Neuron::new(obs.id.as_str()));
            work.push(Work {
                neuron,
                features: encoder::encode_opt(obs.attributes.as_ref()),
                neighbours: obs.neighbours.iter().map(encoder::encode).collect(),
            });
        }

        let steps = self.compute(&work, cancel);
        if cancel.load(Ordering::Acquire) {
            self.stats.cancelled += 1;
            log::warn!("tick {} cancelled before commit", self.tick);
            return Err(RoseError::Cancelled);
        }

        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        for id in removals {
            if self.store.remove(&id).is_some() {
                self.stats.removals += 1;
                report.removed.push(id);
            }
        }

        let collect = self.nexus.config().collect_statistics;
        let mut committed = Vec::with_capacity(steps.len());
        let mut degenerate = 0u64;
        for step in steps.into_iter().flatten() {
            self.stats.cycles += 1;
            if step.result.switched {
                self.stats.switches += 1;
            }
            if step.eigen_fallback {
                self.stats.eigen_fallbacks += 1;
            }
            degenerate += step.degenerate as u64;
            if collect {
                self.statistics
                    .record(step.next.pattern(), step.next.features(), &step.slotted);
            }
            report
                .results
                .insert(ElementId::from(step.next.id()), step.result);
            committed.push(step.next);
        }
        self.store.commit_all(committed);

        self.stats.malformed += malformed;
        self.stats.degenerate += degenerate;
        if malformed > 0 {
            log::warn!("tick {}: {} malformed attribute sets encoded as void", self.tick, malformed);
        }
        if degenerate > 0 {
            log::debug!("tick {}: {} normalization fallbacks", self.tick, degenerate);
        }

        if self.nexus.config().record_frames {
            self.frames.record(Frame::capture(self.tick, &self.store));
        }
        self.stats.ticks += 1;
        self.tick += 1;
        Ok(report)
    }

    #[cfg(feature = "parallel")]
    fn compute(&self, work: &[Work], cancel: &AtomicBool) -> Vec<Option<Step>> {
        let nexus = &self.nexus;
        let library = &self.library;
        work.par_iter()
            .map(|w| run(nexus, library, w, cancel))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn compute(&self, work: &[Work], cancel: &AtomicBool) -> Vec<Option<Step>> {
        work.iter()
            .map(|w| run(&self.nexus, &self.library, w, cancel))
            .collect()
    }
}

fn run(nexus: &Nexus, library: &PatternLibrary, w: &Work, cancel: &AtomicBool) -> Option<Step> {
    if cancel.load(Ordering::Relaxed) {
        return None;
    }
    Some(nexus.step(&w.neuron, library, w.features, &w.neighbours))
}

fn is_malformed(raw: Option<&RawAttributes>) -> bool {
    raw.map_or(true, |r| r.tag.trim().is_empty())
}
