//! Competition State Machine
//!
//! Drives rounds through `Initial → Ready → Ongoing → Finished → Ready → …`.
//! The owner of a [`Competition`] issues `prepare` and `start`; the one
//! transition made from elsewhere is Ongoing → Finished, which the round's
//! completion task performs through the shared phase cell.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Deserialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument};

use crate::meet::error::CompetitionError;
use crate::meet::events::{EventRelay, MeetEvent};
use crate::meet::lane::LaneTiming;
use crate::meet::pool::Pool;
use crate::meet::racer::{Category, Racer, Stroke};
use crate::meet::roster::Roster;
use crate::meet::scoreboard::{FinishRecord, Scoreboard};
use crate::{DEFAULT_LANE_COUNT, DEFAULT_LANE_LENGTH, MIN_RACERS_PER_ROUND};

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// =============================================================================
// STATE
// =============================================================================

/// Lifecycle state of a competition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionState {
    /// No round prepared yet.
    #[default]
    Initial,
    /// Lanes assigned, waiting for the start.
    Ready,
    /// Lane tasks are swimming.
    Ongoing,
    /// Every racer of the round finished (or the round was stopped).
    Finished,
}

impl fmt::Display for CompetitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompetitionState::Initial => "initial",
            CompetitionState::Ready => "ready",
            CompetitionState::Ongoing => "ongoing",
            CompetitionState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Current state plus the round it belongs to.
///
/// Every transition goes through the watch channel's write lock, so a
/// completion task and the owner can never both move the state.
#[derive(Debug)]
pub(crate) struct PhaseCell {
    state: watch::Sender<CompetitionState>,
    round: AtomicUsize,
}

impl PhaseCell {
    pub(crate) fn new(state: CompetitionState, round: usize) -> Self {
        let (state, _) = watch::channel(state);
        Self { state, round: AtomicUsize::new(round) }
    }

    pub(crate) fn get(&self) -> CompetitionState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<CompetitionState> {
        self.state.subscribe()
    }

    fn round(&self) -> usize {
        self.round.load(Ordering::Acquire)
    }

    fn set_round(&self, round: usize) {
        self.round.store(round, Ordering::Release);
    }

    /// Move to `to` if the current state is one of `from`.
    ///
    /// On refusal returns the state that was found.
    fn transition(&self, from: &[CompetitionState], to: CompetitionState) -> Result<(), CompetitionState> {
        let mut found = to;
        let moved = self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                found = *state;
                false
            }
        });
        if moved { Ok(()) } else { Err(found) }
    }

    /// Ongoing → Finished for `round`.
    ///
    /// `Ok(false)` means `round` is no longer the current round.
    fn finish_round(&self, round: usize) -> Result<bool, CompetitionState> {
        let mut outcome = Ok(false);
        self.state.send_if_modified(|state| {
            if self.round.load(Ordering::Acquire) != round {
                return false;
            }
            match *state {
                CompetitionState::Ongoing => {
                    *state = CompetitionState::Finished;
                    outcome = Ok(true);
                    true
                }
                other => {
                    outcome = Err(other);
                    false
                }
            }
        });
        outcome
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Competition configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetitionConfig {
    /// Number of lanes in the pool.
    pub lane_count: usize,
    /// Length of every lane.
    pub lane_length: u32,
    /// Lane loop pacing.
    pub timing: LaneTiming,
    /// Events kept for slow listeners before they start lagging.
    pub event_capacity: usize,
}

impl Default for CompetitionConfig {
    fn default() -> Self {
        Self {
            lane_count: DEFAULT_LANE_COUNT,
            lane_length: DEFAULT_LANE_LENGTH,
            timing: LaneTiming::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CompetitionConfig {
    /// Check that every round under this configuration can run and finish.
    pub fn validate(&self) -> Result<(), CompetitionError> {
        if self.lane_count < MIN_RACERS_PER_ROUND {
            return Err(CompetitionError::Validation(format!(
                "a pool needs at least {} lanes, got {}",
                MIN_RACERS_PER_ROUND, self.lane_count
            )));
        }
        if self.lane_length == 0 {
            return Err(CompetitionError::Validation("lane length must be positive".to_string()));
        }
        if !self.timing.tick_distance.is_finite() || self.timing.tick_distance <= 0.0 {
            return Err(CompetitionError::Validation(
                "tick distance must be a positive number".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(CompetitionError::Validation("event capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// ROUNDS
// =============================================================================

/// What a round is swum as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    /// Category of every racer in the round.
    pub category: Category,
    /// Stroke of the round.
    pub stroke: Stroke,
}

/// Read-only outcome of a retired round.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundResult {
    info: RoundInfo,
    expected: usize,
    started_at: Option<DateTime<Utc>>,
    finishes: Vec<FinishRecord>,
}

impl RoundResult {
    pub(crate) fn from_scoreboard(info: RoundInfo, scoreboard: &Scoreboard) -> Self {
        Self {
            info,
            expected: scoreboard.expected_count(),
            started_at: scoreboard.started_at(),
            finishes: scoreboard.finishes(),
        }
    }

    /// Category and stroke.
    pub fn info(&self) -> RoundInfo {
        self.info
    }

    /// Racers that were in the round.
    pub fn expected_count(&self) -> usize {
        self.expected
    }

    /// Start time, if the round was started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Ledger entries in finishing order.
    pub fn finishes(&self) -> &[FinishRecord] {
        &self.finishes
    }

    /// Racers in finishing order.
    pub fn ranking(&self) -> Vec<Arc<Racer>> {
        self.finishes.iter().map(|f| f.racer.clone()).collect()
    }

    /// Finish timestamps in finishing order.
    pub fn timecard(&self) -> Vec<DateTime<Utc>> {
        self.finishes.iter().map(|f| f.finished_at).collect()
    }

    /// Time each racer needed, in finishing order.
    pub fn elapsed(&self) -> Vec<Option<Duration>> {
        self.finishes.iter().map(|f| f.elapsed_since(self.started_at)).collect()
    }
}

// =============================================================================
// COMPETITION
// =============================================================================

/// A competition: roster, pool, the current round and every retired round.
#[derive(Debug)]
pub struct Competition {
    pub(crate) config: CompetitionConfig,
    pub(crate) roster: Roster,
    pub(crate) pool: Pool,
    pub(crate) phase: Arc<PhaseCell>,
    pub(crate) scoreboard: Option<Arc<Scoreboard>>,
    pub(crate) current_round: Option<RoundInfo>,
    pub(crate) history: Vec<RoundResult>,
    pub(crate) events: broadcast::Sender<MeetEvent>,
}

impl Competition {
    /// Create a competition in the `Initial` state.
    pub fn new(roster: Roster, config: CompetitionConfig) -> Result<Self, CompetitionError> {
        let competition = Self::assemble(roster, config, CompetitionState::Initial, 0)?;
        let counts = competition.roster.counts();
        info!(
            "Competition created: {} lanes of {}, {} racers, {} judges, {} spectators",
            competition.config.lane_count,
            competition.config.lane_length,
            counts.racers(),
            counts.judges,
            counts.spectators
        );
        Ok(competition)
    }

    pub(crate) fn assemble(
        roster: Roster,
        config: CompetitionConfig,
        state: CompetitionState,
        round: usize,
    ) -> Result<Self, CompetitionError> {
        config.validate()?;
        let pool = Pool::new(config.lane_count, config.lane_length, config.timing);
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            config,
            roster,
            pool,
            phase: Arc::new(PhaseCell::new(state, round)),
            scoreboard: None,
            current_round: None,
            history: Vec::new(),
            events,
        })
    }

    // ===== LIFECYCLE =====

    /// Assign `racers` to lanes for a new round of `category` swum as `stroke`.
    ///
    /// Legal from `Initial` and `Finished`. The previous round, if any, is
    /// retired into the history.
    #[instrument(skip(self, racers), fields(racers = racers.len()))]
    pub fn prepare(
        &mut self,
        category: Category,
        stroke: Stroke,
        racers: &[Arc<Racer>],
    ) -> Result<(), CompetitionError> {
        let state = self.state();
        if !matches!(state, CompetitionState::Initial | CompetitionState::Finished) {
            return Err(CompetitionError::invalid_state("prepare", state));
        }
        if let Some(outsider) = racers.iter().find(|r| !self.roster.contains(r)) {
            return Err(CompetitionError::IllegalOperation(format!(
                "{outsider} is not on the roster"
            )));
        }

        let round = self.next_round();
        let scoreboard = Arc::new(Scoreboard::new(racers.len(), self.completion_hook(round))?);
        self.pool.assign_round(category, stroke, racers)?;

        if let (Some(board), Some(info)) = (self.scoreboard.take(), self.current_round.take()) {
            self.history.push(RoundResult::from_scoreboard(info, &board));
        }
        self.attach_observers(&scoreboard, round);
        self.scoreboard = Some(scoreboard);
        self.current_round = Some(RoundInfo { category, stroke });

        self.phase.set_round(round);
        self.phase
            .transition(&[CompetitionState::Initial, CompetitionState::Finished], CompetitionState::Ready)
            .map_err(|found| CompetitionError::invalid_state("prepare", found))?;

        let _ = self.events.send(MeetEvent::RoundPrepared {
            round,
            category,
            stroke,
            racers: racers.iter().map(|r| r.id()).collect(),
        });
        info!("Round {} prepared: {} {} with {} racers", round, category, stroke, racers.len());
        Ok(())
    }

    /// Blow the whistle and launch every occupied lane.
    ///
    /// Legal from `Ready`. Returns the number of lanes launched without
    /// waiting for them. Outside a Tokio runtime nothing changes and
    /// `IllegalOperation` is returned.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<usize, CompetitionError> {
        let state = self.state();
        if state != CompetitionState::Ready {
            return Err(CompetitionError::invalid_state("start", state));
        }
        let scoreboard = self.current_board()?.clone();
        if Handle::try_current().is_err() {
            return Err(CompetitionError::IllegalOperation(
                "a round can only start inside a Tokio runtime".to_string(),
            ));
        }

        if let Some(judge) = self.roster.judges().first() {
            judge.blow_whistle();
        }
        self.phase
            .transition(&[CompetitionState::Ready], CompetitionState::Ongoing)
            .map_err(|found| CompetitionError::invalid_state("start", found))?;

        let launched = match self.pool.start_round(&scoreboard) {
            Ok(launched) => launched,
            Err(e) => {
                let _ = self.phase.transition(&[CompetitionState::Ongoing], CompetitionState::Ready);
                return Err(e);
            }
        };

        if let Some(started_at) = scoreboard.started_at() {
            let _ = self.events.send(MeetEvent::RoundStarted {
                round: self.phase.round(),
                started_at,
            });
        }
        Ok(launched)
    }

    /// End the current round. Legal from `Ongoing`.
    ///
    /// Called automatically once every racer has finished. Lanes still
    /// swimming keep recording their finishes.
    pub fn stop(&self) -> Result<(), CompetitionError> {
        self.phase
            .transition(&[CompetitionState::Ongoing], CompetitionState::Finished)
            .map_err(|found| CompetitionError::invalid_state("stop", found))?;
        info!("Round {} stopped", self.phase.round());
        Ok(())
    }

    /// Abort every lane task still running. The state is left as it is.
    pub fn shutdown(&mut self) {
        let running = self.pool.running_lanes();
        self.pool.cancel();
        if running > 0 {
            info!("Competition shut down with {} lanes still swimming", running);
        }
    }

    /// Resolve once the current round is `Finished`.
    ///
    /// Fails straight away when no round has been started.
    pub async fn wait_until_finished(&self) -> Result<(), CompetitionError> {
        let mut rx = self.phase.subscribe();
        let state = *rx.borrow_and_update();
        if matches!(state, CompetitionState::Initial | CompetitionState::Ready) {
            return Err(CompetitionError::invalid_state("wait for the finish", state));
        }
        rx.wait_for(|s| *s == CompetitionState::Finished)
            .await
            .map(|_| ())
            .map_err(|_| CompetitionError::IllegalOperation("competition state channel closed".to_string()))
    }

    /// Spectators and the event relay watch every round.
    pub(crate) fn attach_observers(&self, scoreboard: &Scoreboard, round: usize) {
        for spectator in self.roster.spectators() {
            scoreboard.subscribe(spectator.clone());
        }
        scoreboard.subscribe(Arc::new(EventRelay::new(round, self.events.clone())));
    }

    pub(crate) fn completion_hook(&self, round: usize) -> impl FnOnce() + Send + 'static {
        let phase = self.phase.clone();
        let events = self.events.clone();
        move || match phase.finish_round(round) {
            Ok(true) => {
                info!("Round {} completed", round);
                let _ = events.send(MeetEvent::RoundCompleted { round });
            }
            Ok(false) => debug!("Round {} completion superseded", round),
            Err(CompetitionState::Finished) => debug!("Round {} was already stopped", round),
            Err(state) => error!("Round {} completed while the competition is {}", round, state),
        }
    }

    fn next_round(&self) -> usize {
        self.history.len() + usize::from(self.scoreboard.is_some())
    }

    // ===== CURRENT ROUND =====

    fn require(&self, operation: &'static str, allowed: &[CompetitionState]) -> Result<(), CompetitionError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(CompetitionError::invalid_state(operation, state))
        }
    }

    fn current_board(&self) -> Result<&Arc<Scoreboard>, CompetitionError> {
        self.scoreboard
            .as_ref()
            .ok_or_else(|| CompetitionError::IllegalOperation("no round has been prepared".to_string()))
    }

    /// Racers of the current round, in lane order. Any state but `Initial`.
    pub fn active_racers(&self) -> Result<Vec<Arc<Racer>>, CompetitionError> {
        self.require("list active racers", &[
            CompetitionState::Ready,
            CompetitionState::Ongoing,
            CompetitionState::Finished,
        ])?;
        Ok(self.pool.active_racers())
    }

    /// Position of every lane. `Ongoing` or `Finished`.
    pub fn positions(&self) -> Result<Vec<f64>, CompetitionError> {
        self.require("read positions", &[CompetitionState::Ongoing, CompetitionState::Finished])?;
        Ok(self.pool.positions())
    }

    /// Start of the current round. `Ongoing` or `Finished`.
    pub fn start_time(&self) -> Result<DateTime<Utc>, CompetitionError> {
        self.require("read the start time", &[CompetitionState::Ongoing, CompetitionState::Finished])?;
        self.current_board()?
            .started_at()
            .ok_or_else(|| CompetitionError::IllegalOperation("the round has not started".to_string()))
    }

    /// Finish timestamps of the current round so far. `Ongoing` or `Finished`.
    pub fn timecard(&self) -> Result<Vec<DateTime<Utc>>, CompetitionError> {
        self.require("read the timecard", &[CompetitionState::Ongoing, CompetitionState::Finished])?;
        Ok(self.current_board()?.finish_timestamps())
    }

    /// Finishing order of the current round so far. `Ongoing` or `Finished`.
    pub fn ranking(&self) -> Result<Vec<Arc<Racer>>, CompetitionError> {
        self.require("read the ranking", &[CompetitionState::Ongoing, CompetitionState::Finished])?;
        Ok(self.current_board()?.finish_order())
    }

    /// Scoreboard of the current round.
    pub fn scoreboard(&self) -> Option<&Arc<Scoreboard>> {
        self.scoreboard.as_ref()
    }

    /// Category and stroke of the current round.
    pub fn current_round(&self) -> Option<RoundInfo> {
        self.current_round
    }

    // ===== HISTORY =====

    /// Number of retired rounds.
    pub fn old_scoreboard_count(&self) -> usize {
        self.history.len()
    }

    /// Every retired round, oldest first.
    pub fn round_results(&self) -> &[RoundResult] {
        &self.history
    }

    fn old_round(&self, operation: &'static str, index: usize) -> Result<&RoundResult, CompetitionError> {
        self.require(operation, &[
            CompetitionState::Ready,
            CompetitionState::Ongoing,
            CompetitionState::Finished,
        ])?;
        self.history.get(index).ok_or_else(|| {
            CompetitionError::IllegalOperation(format!(
                "no retired round {index}; {} retired so far",
                self.history.len()
            ))
        })
    }

    /// Start of retired round `index`.
    pub fn old_start_time(&self, index: usize) -> Result<DateTime<Utc>, CompetitionError> {
        self.old_round("read an old start time", index)?
            .started_at()
            .ok_or_else(|| CompetitionError::IllegalOperation(format!("retired round {index} never started")))
    }

    /// Finish timestamps of retired round `index`.
    pub fn old_timecard(&self, index: usize) -> Result<Vec<DateTime<Utc>>, CompetitionError> {
        Ok(self.old_round("read an old timecard", index)?.timecard())
    }

    /// Finishing order of retired round `index`.
    pub fn old_ranking(&self, index: usize) -> Result<Vec<Arc<Racer>>, CompetitionError> {
        Ok(self.old_round("read an old ranking", index)?.ranking())
    }

    // ===== ALWAYS AVAILABLE =====

    /// Current state.
    pub fn state(&self) -> CompetitionState {
        self.phase.get()
    }

    /// Receiver of every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<CompetitionState> {
        self.phase.subscribe()
    }

    /// Receiver of round events from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<MeetEvent> {
        self.events.subscribe()
    }

    /// Number of lanes.
    pub fn lane_count(&self) -> usize {
        self.pool.lane_count()
    }

    /// Length of every lane.
    pub fn pool_length(&self) -> u32 {
        self.pool.length()
    }

    /// The roster.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The configuration.
    pub fn config(&self) -> &CompetitionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use crate::meet::roster::RosterBuilder;

    fn fast_config(lane_length: u32, tick_millis: u64) -> CompetitionConfig {
        CompetitionConfig {
            lane_length,
            timing: LaneTiming {
                tick_interval: StdDuration::from_millis(tick_millis),
                tick_distance: 0.25,
            },
            ..Default::default()
        }
    }

    struct Field {
        roster: Roster,
        slow: Arc<Racer>,
        fast: Arc<Racer>,
        women: Vec<Arc<Racer>>,
    }

    fn field() -> Field {
        let slow = Arc::new(Racer::seeded(Category::Male, "Ada", 13).unwrap());
        let fast = Arc::new(Racer::seeded(Category::Male, "Grace", 21).unwrap());
        let roster = RosterBuilder::new()
            .seed(99)
            .judge("Judy").unwrap()
            .spectator("Sue").unwrap()
            .enrol(slow.clone())
            .enrol(fast.clone())
            .racer(Category::Female, "Eve").unwrap()
            .racer(Category::Female, "Ida").unwrap()
            .build()
            .unwrap();
        let women = roster.racers_in(Category::Female);
        Field { roster, slow, fast, women }
    }

    async fn finish_within(competition: &Competition, limit: StdDuration) {
        tokio::time::timeout(limit, competition.wait_until_finished())
            .await
            .expect("round did not finish in time")
            .unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CompetitionState::Initial.to_string(), "initial");
        assert_eq!(CompetitionState::Finished.to_string(), "finished");
    }

    #[test]
    fn test_config_validation() {
        assert!(CompetitionConfig::default().validate().is_ok());

        let bad = [
            CompetitionConfig { lane_count: 1, ..Default::default() },
            CompetitionConfig { lane_length: 0, ..Default::default() },
            CompetitionConfig { event_capacity: 0, ..Default::default() },
            CompetitionConfig {
                timing: LaneTiming { tick_distance: 0.0, ..Default::default() },
                ..Default::default()
            },
        ];
        for config in bad {
            let err = Competition::new(field().roster, config).unwrap_err();
            assert!(matches!(err, CompetitionError::Validation(_)));
        }
    }

    #[test]
    fn test_config_json_defaults() {
        let config = CompetitionConfig::from_json(r#"{"lane_count": 8}"#).unwrap();
        assert_eq!(config.lane_count, 8);
        assert_eq!(config.lane_length, DEFAULT_LANE_LENGTH);

        let json = config.to_json().unwrap();
        assert_eq!(CompetitionConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_initial_accessors() {
        let competition = Competition::new(field().roster, CompetitionConfig::default()).unwrap();

        assert_eq!(competition.state(), CompetitionState::Initial);
        assert_eq!(competition.lane_count(), 5);
        assert_eq!(competition.pool_length(), 25);
        assert_eq!(competition.old_scoreboard_count(), 0);

        let invalid = |r: Result<(), CompetitionError>| {
            assert!(matches!(r, Err(CompetitionError::InvalidState { state: CompetitionState::Initial, .. })));
        };
        invalid(competition.active_racers().map(drop));
        invalid(competition.positions().map(drop));
        invalid(competition.ranking().map(drop));
        invalid(competition.timecard().map(drop));
        invalid(competition.start_time().map(drop));
        invalid(competition.old_ranking(0).map(drop));
        invalid(competition.stop());
    }

    #[test]
    fn test_prepare_rejects_outsider() {
        let f = field();
        let mut competition = Competition::new(f.roster, CompetitionConfig::default()).unwrap();
        let outsider = Arc::new(Racer::seeded(Category::Male, "Ada", 13).unwrap());

        let err = competition
            .prepare(Category::Male, Stroke::Freestyle, &[f.fast.clone(), outsider])
            .unwrap_err();
        assert!(matches!(err, CompetitionError::IllegalOperation(_)));
        assert_eq!(competition.state(), CompetitionState::Initial);
    }

    #[test]
    fn test_prepare_propagates_pool_errors() {
        let f = field();
        let mut competition = Competition::new(f.roster, CompetitionConfig::default()).unwrap();

        let err = competition
            .prepare(Category::Female, Stroke::Freestyle, &[f.slow.clone(), f.fast.clone()])
            .unwrap_err();
        assert!(matches!(err, CompetitionError::CategoryMismatch { .. }));

        let err = competition
            .prepare(Category::Male, Stroke::Freestyle, &[f.slow.clone()])
            .unwrap_err();
        assert!(matches!(err, CompetitionError::WrongParticipantCount(_)));

        assert_eq!(competition.state(), CompetitionState::Initial);
        assert!(competition.scoreboard().is_none());
    }

    #[test]
    fn test_prepare_in_ready_fails() {
        let f = field();
        let mut competition = Competition::new(f.roster, CompetitionConfig::default()).unwrap();
        let racers = [f.slow.clone(), f.fast.clone()];

        competition.prepare(Category::Male, Stroke::Freestyle, &racers).unwrap();
        assert_eq!(competition.state(), CompetitionState::Ready);
        assert_eq!(competition.active_racers().unwrap(), racers.to_vec());
        assert!(matches!(competition.positions(), Err(CompetitionError::InvalidState { .. })));

        let err = competition.prepare(Category::Male, Stroke::Freestyle, &racers).unwrap_err();
        assert!(matches!(err, CompetitionError::InvalidState { state: CompetitionState::Ready, .. }));
        assert!(matches!(competition.old_ranking(0), Err(CompetitionError::IllegalOperation(_))));
    }

    #[tokio::test]
    async fn test_start_twice_and_prepare_while_ongoing_fail() {
        let f = field();
        let mut competition = Competition::new(f.roster, fast_config(1000, 1)).unwrap();
        let racers = [f.slow.clone(), f.fast.clone()];

        assert!(matches!(competition.start(), Err(CompetitionError::InvalidState { .. })));
        competition.prepare(Category::Male, Stroke::Breaststroke, &racers).unwrap();

        assert_eq!(competition.start().unwrap(), 2);
        assert_eq!(competition.state(), CompetitionState::Ongoing);
        assert_eq!(competition.pool.running_lanes(), 2);

        let err = competition.start().unwrap_err();
        assert!(matches!(err, CompetitionError::InvalidState { state: CompetitionState::Ongoing, .. }));
        let err = competition.prepare(Category::Male, Stroke::Freestyle, &racers).unwrap_err();
        assert!(matches!(err, CompetitionError::InvalidState { state: CompetitionState::Ongoing, .. }));

        competition.shutdown();
        assert_eq!(competition.pool.running_lanes(), 0);
    }

    #[test]
    fn test_start_outside_runtime_keeps_ready() {
        let f = field();
        let mut competition = Competition::new(f.roster, fast_config(25, 1)).unwrap();
        competition.prepare(Category::Male, Stroke::Freestyle, &[f.slow.clone(), f.fast.clone()]).unwrap();

        let err = competition.start().unwrap_err();
        assert!(matches!(err, CompetitionError::IllegalOperation(_)));
        assert_eq!(competition.state(), CompetitionState::Ready);
        assert!(competition.scoreboard().unwrap().started_at().is_none());
        assert_eq!(competition.pool.running_lanes(), 0);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            assert_eq!(competition.start().unwrap(), 2);
            assert_eq!(competition.state(), CompetitionState::Ongoing);
            competition.shutdown();
        });
    }

    #[tokio::test]
    async fn test_started_event_follows_round_number() {
        let f = field();
        let mut competition = Competition::new(f.roster, fast_config(5, 1)).unwrap();
        let mut events = competition.subscribe_events();

        for round in 0..2 {
            competition.prepare(Category::Female, Stroke::Butterfly, &f.women).unwrap();
            competition.start().unwrap();
            finish_within(&competition, StdDuration::from_secs(5)).await;
            loop {
                let event = tokio::time::timeout(StdDuration::from_secs(1), events.recv())
                    .await
                    .unwrap()
                    .unwrap();
                if let MeetEvent::RoundStarted { round: started, .. } = event {
                    assert_eq!(started, round);
                    break;
                }
            }
        }
        competition.shutdown();
    }

    #[tokio::test]
    async fn test_manual_stop() {
        let f = field();
        let mut competition = Competition::new(f.roster, fast_config(1000, 1)).unwrap();
        competition.prepare(Category::Male, Stroke::Freestyle, &[f.slow.clone(), f.fast.clone()]).unwrap();
        competition.start().unwrap();

        competition.stop().unwrap();
        assert_eq!(competition.state(), CompetitionState::Finished);
        assert!(matches!(competition.stop(), Err(CompetitionError::InvalidState { .. })));
        finish_within(&competition, StdDuration::from_millis(100)).await;
        competition.shutdown();
    }

    #[tokio::test]
    async fn test_wait_requires_started_round() {
        let competition = Competition::new(field().roster, CompetitionConfig::default()).unwrap();
        let err = competition.wait_until_finished().await.unwrap_err();
        assert!(matches!(err, CompetitionError::InvalidState { state: CompetitionState::Initial, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_round_end_to_end() {
        let f = field();
        let mut competition = Competition::new(f.roster, fast_config(25, 2)).unwrap();
        let mut events = competition.subscribe_events();
        let racers = [f.slow.clone(), f.fast.clone()];

        competition.prepare(Category::Male, Stroke::Freestyle, &racers).unwrap();
        assert_eq!(competition.state(), CompetitionState::Ready);
        assert_eq!(competition.active_racers().unwrap(), racers.to_vec());

        competition.start().unwrap();
        assert_eq!(competition.state(), CompetitionState::Ongoing);

        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
        let mut last = vec![0.0; competition.lane_count()];
        while competition.state() != CompetitionState::Finished {
            assert!(tokio::time::Instant::now() < deadline, "round did not finish in time");
            let positions = competition.positions().unwrap();
            assert!(positions.iter().zip(&last).all(|(now, before)| now >= before));
            last = positions;
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }

        let ranking = competition.ranking().unwrap();
        assert_eq!(ranking, vec![f.fast.clone(), f.slow.clone()]);
        let timecard = competition.timecard().unwrap();
        assert_eq!(timecard.len(), 2);
        assert!(timecard[0] < timecard[1]);
        assert!(competition.start_time().unwrap() < timecard[0]);
        assert!(competition.positions().unwrap()[..2].iter().all(|p| *p >= 25.0));

        let mut seen = Vec::new();
        while seen.len() < 5 {
            let event = tokio::time::timeout(StdDuration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert!(matches!(seen[0], MeetEvent::RoundPrepared { round: 0, .. }));
        assert!(matches!(seen[1], MeetEvent::RoundStarted { round: 0, .. }));
        assert!(matches!(&seen[2], MeetEvent::RacerFinished { place: 1, name, .. } if name == "Grace"));
        assert!(matches!(&seen[3], MeetEvent::RacerFinished { place: 2, name, .. } if name == "Ada"));
        assert_eq!(seen[4], MeetEvent::RoundCompleted { round: 0 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_history_survives_next_round() {
        let f = field();
        let spectator = f.roster.spectators()[0].clone();
        let mut competition = Competition::new(f.roster, fast_config(10, 1)).unwrap();

        competition.prepare(Category::Male, Stroke::Freestyle, &[f.slow.clone(), f.fast.clone()]).unwrap();
        competition.start().unwrap();
        finish_within(&competition, StdDuration::from_secs(5)).await;
        let first_ranking = competition.ranking().unwrap();
        let first_timecard = competition.timecard().unwrap();

        competition.prepare(Category::Female, Stroke::Backstroke, &f.women).unwrap();
        assert_eq!(competition.old_scoreboard_count(), 1);
        assert_eq!(competition.old_ranking(0).unwrap(), first_ranking);

        competition.start().unwrap();
        finish_within(&competition, StdDuration::from_secs(5)).await;

        assert_eq!(competition.old_ranking(0).unwrap(), first_ranking);
        assert_eq!(competition.old_timecard(0).unwrap(), first_timecard);
        assert!(competition.old_start_time(0).unwrap() < first_timecard[0]);
        assert!(matches!(competition.old_ranking(1), Err(CompetitionError::IllegalOperation(_))));

        let second = competition.ranking().unwrap();
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|r| r.category() == Category::Female));
        assert_eq!(competition.round_results()[0].info().stroke, Stroke::Freestyle);
        assert_eq!(spectator.finishes_seen(), 4);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let cell = PhaseCell::new(CompetitionState::Ongoing, 2);

        assert_eq!(cell.finish_round(1), Ok(false));
        assert_eq!(cell.get(), CompetitionState::Ongoing);

        assert_eq!(cell.finish_round(2), Ok(true));
        assert_eq!(cell.get(), CompetitionState::Finished);
        assert_eq!(cell.finish_round(2), Err(CompetitionState::Finished));
    }
}
