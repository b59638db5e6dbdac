//! Core primitives shared by the race engine.

pub mod rng;

pub use rng::{DeterministicRng, derive_racer_seed};
