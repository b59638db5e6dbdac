//! Competition Events
//!
//! Round lifecycle events broadcast to any number of listeners (a
//! presentation layer, a logger, a test). Lagging listeners lose the oldest
//! events; the competition itself never waits on them.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::sync::broadcast;

use crate::meet::racer::{Category, RacerId, Stroke};
use crate::meet::scoreboard::{FinishObserver, FinishRecord, Scoreboard};

/// Something that happened during the competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MeetEvent {
    /// Lanes were assigned for a new round.
    RoundPrepared {
        /// 0-based round number.
        round: usize,
        /// Category of the round.
        category: Category,
        /// Stroke of the round.
        stroke: Stroke,
        /// Racers in lane order.
        racers: Vec<RacerId>,
    },

    /// The judge started the round.
    RoundStarted {
        /// 0-based round number.
        round: usize,
        /// Recorded start time.
        started_at: DateTime<Utc>,
    },

    /// A racer touched the pad.
    RacerFinished {
        /// 0-based round number.
        round: usize,
        /// 1-based place.
        place: usize,
        /// The racer.
        racer: RacerId,
        /// Racer's name.
        name: String,
        /// Finish time.
        finished_at: DateTime<Utc>,
    },

    /// Every racer of the round finished.
    RoundCompleted {
        /// 0-based round number.
        round: usize,
    },
}

impl MeetEvent {
    /// Round the event belongs to.
    pub fn round(&self) -> usize {
        match self {
            MeetEvent::RoundPrepared { round, .. }
            | MeetEvent::RoundStarted { round, .. }
            | MeetEvent::RacerFinished { round, .. }
            | MeetEvent::RoundCompleted { round } => *round,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Scoreboard observer forwarding every finish onto the event channel.
pub(crate) struct EventRelay {
    round: usize,
    events: broadcast::Sender<MeetEvent>,
}

impl EventRelay {
    pub(crate) fn new(round: usize, events: broadcast::Sender<MeetEvent>) -> Self {
        Self { round, events }
    }
}

impl FinishObserver for EventRelay {
    fn on_finish(&self, _scoreboard: &Scoreboard, finish: &FinishRecord) {
        // No listeners is fine.
        let _ = self.events.send(MeetEvent::RacerFinished {
            round: self.round,
            place: finish.place,
            racer: finish.racer.id(),
            name: finish.racer.name().to_string(),
            finished_at: finish.finished_at,
        });
    }
}
