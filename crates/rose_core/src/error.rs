//! Error taxonomy for the classification engine.
//!
//! Only [`RoseError::LibraryConstruction`] is meant to reach the caller as a
//! hard failure; everything else is recovered inside the tick loop.

use alloc::string::String;
use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoseError {
    /// Wrong-shaped vector, out-of-range component or missing raw attributes
    MalformedInput(String),
    /// Pattern id outside 0..=4
    UnknownPattern(u8),
    /// Zero-sum row or non-finite value met during normalization
    DegenerateMatrix,
    /// Fewer than five patterns or a wrongly sized expectation vector
    LibraryConstruction(String),
    /// Tick abandoned before commit
    Cancelled,
}

impl fmt::Display for RoseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoseError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            RoseError::UnknownPattern(id) => write!(f, "Unknown pattern id {} (expected 0..=4)", id),
            RoseError::DegenerateMatrix => write!(f, "Degenerate matrix: zero-sum or non-finite row"),
            RoseError::LibraryConstruction(msg) => {
                write!(f, "Pattern library construction failed: {}", msg)
            }
            RoseError::Cancelled => write!(f, "Tick cancelled before commit"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RoseError {}

pub type Result<T> = core::result::Result<T, RoseError>;
