//! Competition Snapshots
//!
//! A self-contained, serializable copy of a competition between rounds:
//! configuration, roster (racer RNG state included), lane assignment, the
//! current scoreboard and every retired round. Lane tasks cannot be saved,
//! so a competition with a round in the water refuses to snapshot.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::meet::competition::{Competition, CompetitionConfig, CompetitionState, RoundInfo, RoundResult};
use crate::meet::error::CompetitionError;
use crate::meet::racer::{Racer, RacerId, RacerRecord};
use crate::meet::roster::{Judge, Roster, Spectator, StaffMember};
use crate::meet::scoreboard::{Scoreboard, ScoreboardRecord};

/// Snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Saved competition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompetitionSnapshot {
    /// Layout version, [`SNAPSHOT_VERSION`] when written by this crate.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Competition configuration.
    pub config: CompetitionConfig,
    /// Everyone in the competition.
    pub roster: RosterRecord,
    /// State at the time of the snapshot. Never `Ongoing`.
    pub state: CompetitionState,
    /// Lane occupants and positions, in lane order.
    pub lanes: Vec<LaneRecord>,
    /// The round currently on the board, if one was prepared.
    pub current_round: Option<RoundRecord>,
    /// Retired rounds, oldest first.
    pub history: Vec<RoundRecord>,
}

/// Saved roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosterRecord {
    /// Judge names.
    pub judges: Vec<String>,
    /// Spectators.
    pub spectators: Vec<SpectatorRecord>,
    /// Staff names.
    pub staff: Vec<String>,
    /// Racers in enrolment order.
    pub racers: Vec<RacerRecord>,
}

/// Saved spectator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectatorRecord {
    /// Name.
    pub name: String,
    /// Finishes seen so far.
    pub finishes_seen: usize,
}

/// Saved lane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneRecord {
    /// Racer in the lane.
    pub occupant: Option<RacerId>,
    /// Position reached.
    pub position: f64,
}

/// Saved round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Category and stroke.
    pub info: RoundInfo,
    /// Finish ledger.
    pub scoreboard: ScoreboardRecord,
}

impl RosterRecord {
    fn capture(roster: &Roster) -> Self {
        Self {
            judges: roster.judges().iter().map(|j| j.name().to_string()).collect(),
            spectators: roster
                .spectators()
                .iter()
                .map(|s| SpectatorRecord {
                    name: s.name().to_string(),
                    finishes_seen: s.finishes_seen(),
                })
                .collect(),
            staff: roster.staff().iter().map(|s| s.name().to_string()).collect(),
            racers: roster.racers().iter().map(|r| r.to_record()).collect(),
        }
    }

    fn into_roster(self) -> Result<Roster, CompetitionError> {
        let judges = self.judges.into_iter().map(Judge::new).collect::<Result<Vec<_>, _>>()?;
        let spectators = self
            .spectators
            .into_iter()
            .map(|s| Spectator::restored(s.name, s.finishes_seen).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let staff = self.staff.into_iter().map(StaffMember::new).collect::<Result<Vec<_>, _>>()?;
        let racers = self
            .racers
            .into_iter()
            .map(|r| Racer::from_record(r).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Roster::new(judges, spectators, staff, racers)
    }
}

impl RoundRecord {
    fn from_result(result: &RoundResult) -> Self {
        Self {
            info: result.info(),
            scoreboard: ScoreboardRecord {
                expected: result.expected_count(),
                started_at: result.started_at(),
                finishes: result
                    .finishes()
                    .iter()
                    .map(|f| (f.racer.id(), f.finished_at))
                    .collect(),
            },
        }
    }
}

impl CompetitionSnapshot {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
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

impl Competition {
    /// Capture the competition. Fails while a round is `Ongoing`.
    pub fn snapshot(&self) -> Result<CompetitionSnapshot, CompetitionError> {
        let state = self.state();
        if state == CompetitionState::Ongoing {
            return Err(CompetitionError::invalid_state("snapshot", state));
        }

        let current_round = match (&self.scoreboard, self.current_round) {
            (Some(board), Some(info)) => Some(RoundRecord { info, scoreboard: board.to_record() }),
            _ => None,
        };

        Ok(CompetitionSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            config: self.config.clone(),
            roster: RosterRecord::capture(&self.roster),
            state,
            lanes: self
                .pool
                .lanes()
                .iter()
                .map(|lane| LaneRecord {
                    occupant: lane.occupant().map(|r| r.id()),
                    position: lane.position(),
                })
                .collect(),
            current_round,
            history: self.history.iter().map(RoundRecord::from_result).collect(),
        })
    }

    /// Rebuild a competition from a snapshot.
    ///
    /// A restored `Ready` round can be started as usual.
    pub fn restore(snapshot: CompetitionSnapshot) -> Result<Self, CompetitionError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CompetitionError::Validation(format!(
                "snapshot version {} is not supported (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        match (snapshot.state, snapshot.current_round.is_some()) {
            (CompetitionState::Initial, false)
            | (CompetitionState::Ready, true)
            | (CompetitionState::Finished, true) => {}
            (CompetitionState::Ongoing, _) => {
                return Err(CompetitionError::Validation(
                    "snapshot was taken while a round was swimming".to_string(),
                ));
            }
            (state, has_round) => {
                return Err(CompetitionError::Validation(format!(
                    "snapshot in state {state} {} a current round",
                    if has_round { "cannot hold" } else { "must hold" }
                )));
            }
        }

        let roster = snapshot.roster.into_roster()?;
        let history = snapshot
            .history
            .iter()
            .map(|record| {
                let board = Scoreboard::from_record(&record.scoreboard, |id| roster.racer(id), || {})?;
                Ok(RoundResult::from_scoreboard(record.info, &board))
            })
            .collect::<Result<Vec<_>, CompetitionError>>()?;

        let round = history.len();
        let mut competition = Competition::assemble(roster, snapshot.config, snapshot.state, round)?;
        competition.history = history;

        let occupants = snapshot
            .lanes
            .iter()
            .map(|lane| match lane.occupant {
                Some(id) => competition
                    .roster
                    .racer(&id)
                    .map(|racer| (Some(racer), lane.position))
                    .ok_or_else(|| {
                        CompetitionError::IllegalOperation(format!(
                            "snapshot lane names unknown racer {}",
                            id.short()
                        ))
                    }),
                None => Ok((None, 0.0)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        check_occupants(&occupants, snapshot.current_round.as_ref())?;
        competition.pool.restore_assignment(occupants)?;

        if let Some(record) = snapshot.current_round {
            let board = Arc::new(Scoreboard::from_record(
                &record.scoreboard,
                |id| competition.roster.racer(id),
                competition.completion_hook(round),
            )?);
            competition.attach_observers(&board, round);
            competition.scoreboard = Some(board);
            competition.current_round = Some(record.info);
        }

        info!(
            "Competition restored in state {} with {} retired rounds",
            competition.state(),
            competition.old_scoreboard_count()
        );
        Ok(competition)
    }
}

/// Saved lanes must describe the saved round: distinct racers of its
/// category, one per expected finish. No round means empty lanes.
fn check_occupants(
    occupants: &[(Option<Arc<Racer>>, f64)],
    round: Option<&RoundRecord>,
) -> Result<(), CompetitionError> {
    let racers: Vec<&Arc<Racer>> = occupants.iter().filter_map(|(racer, _)| racer.as_ref()).collect();
    let expected = round.map_or(0, |r| r.scoreboard.expected);
    if racers.len() != expected {
        return Err(CompetitionError::Validation(format!(
            "snapshot lanes hold {} racers, round expects {}",
            racers.len(),
            expected
        )));
    }
    let Some(round) = round else {
        return Ok(());
    };

    for (i, racer) in racers.iter().enumerate() {
        if racer.category() != round.info.category {
            return Err(CompetitionError::Validation(format!(
                "snapshot lane holds {} in a {} round",
                racer, round.info.category
            )));
        }
        if racers[..i].iter().any(|other| other.id() == racer.id()) {
            return Err(CompetitionError::Validation(format!(
                "snapshot puts {} in two lanes",
                racer
            )));
        }
    }
    Ok(())
}
