//! Shared evolving terrain library
//!
//! Re-exports modules for use by binaries and tools.

pub mod color;
pub mod config;
pub mod detail;
pub mod grid;
pub mod heightfield;
pub mod mesher;
pub mod seeds;
pub mod session;
pub mod shared_random;
pub mod sync;
