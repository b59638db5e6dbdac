//! Race Engine
//!
//! Racers, lanes, the pool, the per-round scoreboard and the competition
//! state machine that ties them together.

pub mod competition;
pub mod error;
pub mod events;
pub mod lane;
pub mod pool;
pub mod racer;
pub mod roster;
pub mod scoreboard;

pub use competition::{Competition, CompetitionConfig, CompetitionState, RoundInfo, RoundResult};
pub use error::CompetitionError;
pub use events::MeetEvent;
pub use lane::{Lane, LaneTiming};
pub use pool::Pool;
pub use racer::{Category, PerformanceTable, Racer, RacerId, RacerRecord, Stroke, Uniform};
pub use roster::{Judge, Roster, RosterBuilder, RosterCounts, Spectator, StaffMember};
pub use scoreboard::{FinishObserver, FinishRecord, ObserverId, Scoreboard, ScoreboardRecord};
