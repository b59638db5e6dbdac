//! # Swim Meet
//!
//! Concurrent swimming competition simulator: racers swim rounds in the
//! lanes of a pool, one task per lane, and a shared scoreboard records the
//! finishing order.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SWIM MEET                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  └── rng.rs       - Xorshift128+ PRNG, racer seed derivation │
//! │                                                              │
//! │  meet/            - Race engine                              │
//! │  ├── racer.rs     - Racers, categories, performance table    │
//! │  ├── lane.rs      - Single-occupant lane and its task        │
//! │  ├── pool.rs      - Lane assignment and round fan-out        │
//! │  ├── scoreboard.rs- Finish ledger, observers, completion     │
//! │  ├── roster.rs    - Judges, spectators, staff, racers        │
//! │  ├── events.rs    - Round event stream                       │
//! │  └── competition.rs - Round state machine and history        │
//! │                                                              │
//! │  persistence/     - Snapshots between rounds                 │
//! │  ├── snapshot.rs  - Serializable competition copy            │
//! │  └── store.rs     - File and memory stores                   │
//! │                                                              │
//! │  config.rs        - Binary configuration                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Every occupied lane advances on its own Tokio task and publishes its
//! position through an atomic. The scoreboard is the only state lane tasks
//! share: arrival order, timestamps and the completion check are decided
//! under one lock, and the round's completion runs once, on its own task.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod meet;
pub mod persistence;

// Re-export commonly used types
pub use config::MeetConfig;
pub use core::rng::DeterministicRng;
pub use meet::{
    Category, Competition, CompetitionConfig, CompetitionError, CompetitionState, MeetEvent, Racer,
    Roster, RosterBuilder, Stroke,
};
pub use persistence::{CompetitionSnapshot, FileStore, SnapshotStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lanes in a default pool
pub const DEFAULT_LANE_COUNT: usize = 5;

/// Length of a default lane
pub const DEFAULT_LANE_LENGTH: u32 = 25;

/// Default sleep between lane ticks (milliseconds)
pub const DEFAULT_TICK_MILLIS: u64 = 70;

/// Fewest racers that make a round
pub const MIN_RACERS_PER_ROUND: usize = 2;
