//! Utility library for the trajectory optimisation workspace

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod archive;
pub mod host;
#[macro_use]
pub mod logger;
pub mod params;
pub mod session;
pub mod time;
