//! Event-driven Green's function reaction dynamics.
//!
//! Particles diffuse and react inside protective shells; each shell's exit
//! or reaction event is drawn from an analytic Green's function and the
//! simulator jumps from event to event. Densely packed particles fall back
//! to fixed-step Brownian dynamics inside a Multi.

pub mod config;
pub mod core;
pub mod error;

#[cfg(feature = "python")]
mod python;

pub use crate::config::SimConfig;
pub use crate::core::Simulator;
pub use crate::error::{Error, Result};
