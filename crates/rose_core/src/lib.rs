//! # rose_core
//!
//! Classification engine for live, constantly-mutating page structures.
//!
//! Every observed element owns a [`Neuron`]: a categorical belief over five
//! structural patterns (the self bias) and a row-stochastic belief over which
//! canonical neighbour slot each observed neighbour occupies (the position
//! bias matrix). Each tick, the [`Nexus`] cycle correlates the element and its
//! neighbours against the pattern library ("Rose"), updates both beliefs and
//! decides whether to keep or abandon the current pattern hypothesis.
//!
//! ## Feature Flags
//!
//! - `std`: standard library support (`std::error::Error` for [`RoseError`])
//! - `parallel`: per-tick batch of cycles runs on the rayon thread pool
//! - `cli`: `clap::Args` engine flags ([`NexusArgs`]) layered over a [`NexusConfig`]
//!
//! Design constraints:
//! - No std by default: all types use `core::*` and `alloc`
//! - Fixed-size numeric types (`[f64; 25]`, `[[f64; 5]; 5]`) everywhere on the hot path
//! - No hidden randomness: identical inputs give bit-identical outputs

#![cfg_attr(not(any(feature = "std", test)), no_std)]

extern crate alloc;

pub mod config;
pub mod encoder;
pub mod error;
pub mod frames;
pub mod linalg;
pub mod monitor;
pub mod neuron;
pub mod nexus;
pub mod rose;
pub mod store;

pub use config::NexusConfig;
#[cfg(feature = "cli")]
pub use config::NexusArgs;
pub use encoder::{encode, FeatureVector, Predicate, RawAttributes, FEATURE_DIM};
pub use error::{Result, RoseError};
pub use frames::{Frame, FrameRecorder, NeuronSnapshot};
pub use monitor::{Monitor, MonitorStats, Observation, TickReport};
pub use neuron::{ElementId, Neuron, PatternId, PositionBias, SelfBias, NUM_PATTERNS, NUM_SLOTS};
pub use nexus::{AlignmentResult, Nexus, Transition};
pub use rose::{Pattern, PatternLibrary, PatternStatistics};
pub use store::NeuronStore;
