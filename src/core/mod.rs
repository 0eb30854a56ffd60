#![allow(missing_docs)] // Doc comments are added on public items in submodules

//! Core data structures and the event-driven simulator.
//!
//! The simulator keeps every particle inside a protective domain (a Single,
//! a Pair or a Multi) whose shells are indexed by [`shell::ShellContainers`]
//! and whose next event waits in an [`event::EventScheduler`].

pub mod bd;
pub mod check;
pub mod domain;
pub mod event;
pub mod formation;
pub mod geometry;
pub mod greens;
pub mod grid;
pub mod multi;
pub mod pair;
pub mod particle;
pub mod rules;
pub mod shell;
pub mod sim;
pub mod single;
pub mod special;
pub mod stats;
pub mod structure;
pub mod world;

pub use domain::{Domain, DomainId, EventType};
pub use event::{Event, EventId, EventScheduler};
pub use geometry::{Cylinder, Shape, Sphere, Vec3};
pub use particle::{Particle, ParticleId, Species, SpeciesId};
pub use rules::{NetworkRules, ReactionRecord, ReactionRule};
pub use sim::Simulator;
pub use stats::StepCounters;
pub use structure::{Structure, StructureId};
pub use world::World;
