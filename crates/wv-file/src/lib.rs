//! wv-file: Block Files on Disk
//!
//! The storage layer under the WaveVault sequence engine:
//! - `.wvb` binary block format with embedded min/max/rms summaries at
//!   1:256 and 1:65536 decimation (memory-mapped reads)
//! - Block file variants: simple (owned data), silent (no payload),
//!   PCM alias (window over an external WAV), and the on-demand pair
//!   whose summary/data are produced by a background pass
//! - The directory manager that allocates, shares, and reloads them

mod alias;
mod block;
mod decoder;
mod dir_manager;
mod error;
mod format;
mod od;
mod silent;
mod simple;
mod summary;

pub use alias::*;
pub use block::*;
pub use decoder::*;
pub use dir_manager::*;
pub use error::*;
pub use format::*;
pub use od::*;
pub use silent::*;
pub use simple::*;
pub use summary::*;
