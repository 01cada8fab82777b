//! wv-engine: Block-Structured Sample Sequence Engine
//!
//! The editable waveform representation under WaveVault:
//! - A `Sequence` stores an ordered run of samples as a concatenation of
//!   immutable, refcount-shared block files
//! - Random access by interpolation search over `(start, length)` entries
//! - Edits (append, paste, delete, overwrite, silence, format conversion)
//!   under a strong exception-safety guarantee: an operation either fully
//!   succeeds or leaves the sequence observably unchanged
//! - Multi-resolution waveform display reads (1:1, 1:256, 1:65536)
//! - XML persistence with best-effort repair of damaged projects

mod display;
mod error;
mod sequence;
mod xml;

pub use error::*;
pub use sequence::*;
