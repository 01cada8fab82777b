//! wv-core: Shared types for WaveVault
//!
//! This crate provides the foundational types used across all WaveVault
//! crates: sample formats, raw sample buffers, format conversion, and the
//! process-wide storage configuration.

mod config;
mod sample;

pub use config::*;
pub use sample::*;
