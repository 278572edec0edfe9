//! `replaybuffer` - A rolling video segment buffer with triggered clip assembly
//!
//! An external recorder writes short, sequentially numbered segments into a
//! shared directory. When a trigger fires, the most recent complete segments
//! are joined into one clip by stream copy and older segments are reclaimed.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod assembler;
pub mod cli;
pub mod clip;
pub mod config;
pub mod daemon;
pub mod error;
pub mod janitor;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod muxer;
pub mod producer;
pub mod segment;
pub mod status;
pub mod trigger;
pub mod upload;
pub mod window;

pub use assembler::{Assembler, AssemblyFlag, AssemblyOutcome, AssemblyReport, AssemblyState};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use segment::{Segment, SegmentListing, SegmentNaming};
pub use window::Window;
