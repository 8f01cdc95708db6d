//! Configuration constants for Tessera.
//!
//! All tunables live in [`constants`] so that interdependent values stay in
//! one reviewable place. See that module's documentation for the dependency
//! graph between constants.

mod constants;

pub use constants::*;
