//! Round Scoreboard
//!
//! The one piece of state that every lane task writes to. A single mutex
//! guards the finish ledger; the append, the timestamp and the completion
//! check all happen in one critical section, so arrival order is the
//! recorded order and the completion hook is taken exactly once.
//!
//! Observers are notified after the ledger lock is released but while the
//! dispatch lock is still held, so every observer sees finishes in arrival
//! order and may read the scoreboard from inside its callback.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::meet::error::CompetitionError;
use crate::meet::racer::{Racer, RacerId};
use crate::MIN_RACERS_PER_ROUND;

/// Observer handle returned by [`Scoreboard::subscribe`].
pub type ObserverId = u64;

/// Callback fired once when the last expected racer finishes.
pub type CompletionHook = Box<dyn FnOnce() + Send + 'static>;

/// Something interested in every finish of a round.
pub trait FinishObserver: Send + Sync {
    /// Called once per finish, in arrival order.
    ///
    /// Must not call [`Scoreboard::record_finish`] on the same scoreboard.
    fn on_finish(&self, scoreboard: &Scoreboard, finish: &FinishRecord);
}

/// One entry of the finish ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct FinishRecord {
    /// 1-based finishing place.
    pub place: usize,
    /// The racer.
    pub racer: Arc<Racer>,
    /// When the racer touched the pad.
    pub finished_at: DateTime<Utc>,
}

impl FinishRecord {
    /// Time from round start to this finish, if the start was recorded.
    pub fn elapsed_since(&self, started_at: Option<DateTime<Utc>>) -> Option<Duration> {
        started_at.map(|start| self.finished_at - start)
    }
}

#[derive(Default)]
struct Ledger {
    started_at: Option<DateTime<Utc>>,
    finishes: Vec<FinishRecord>,
}

/// Finish ledger of one round.
pub struct Scoreboard {
    expected: usize,
    ledger: Mutex<Ledger>,
    dispatch: Mutex<()>,
    observers: Mutex<BTreeMap<ObserverId, Arc<dyn FinishObserver>>>,
    next_observer: AtomicU64,
    on_complete: Mutex<Option<CompletionHook>>,
}

impl Scoreboard {
    /// Create a scoreboard expecting `expected` finishes.
    pub fn new<F>(expected: usize, on_round_complete: F) -> Result<Self, CompetitionError>
    where
        F: FnOnce() + Send + 'static,
    {
        if expected < MIN_RACERS_PER_ROUND {
            return Err(CompetitionError::WrongParticipantCount(format!(
                "a round needs at least {} racers, got {}",
                MIN_RACERS_PER_ROUND, expected
            )));
        }

        Ok(Self {
            expected,
            ledger: Mutex::new(Ledger::default()),
            dispatch: Mutex::new(()),
            observers: Mutex::new(BTreeMap::new()),
            next_observer: AtomicU64::new(1),
            on_complete: Mutex::new(Some(Box::new(on_round_complete))),
        })
    }

    /// Number of finishes that completes the round.
    pub fn expected_count(&self) -> usize {
        self.expected
    }

    /// Record the round start time. Allowed once.
    pub fn mark_start(&self) -> Result<DateTime<Utc>, CompetitionError> {
        let mut ledger = lock(&self.ledger);
        if ledger.started_at.is_some() {
            return Err(CompetitionError::IllegalOperation(
                "round start already recorded".to_string(),
            ));
        }
        let now = Utc::now();
        ledger.started_at = Some(now);
        Ok(now)
    }

    /// Round start time, once recorded.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.ledger).started_at
    }

    /// Append a finish for `racer`.
    ///
    /// Safe to call from any number of lane tasks at once. Rejects a racer
    /// that already finished and any finish beyond the expected count
    /// without touching the ledger.
    pub fn record_finish(&self, racer: &Arc<Racer>) -> Result<FinishRecord, CompetitionError> {
        let _turn = lock(&self.dispatch);

        let (record, complete) = {
            let mut ledger = lock(&self.ledger);
            if ledger.finishes.len() >= self.expected {
                return Err(CompetitionError::IllegalOperation(format!(
                    "scoreboard already holds all {} finishes",
                    self.expected
                )));
            }
            if ledger.finishes.iter().any(|f| f.racer.id() == racer.id()) {
                return Err(CompetitionError::IllegalOperation(format!(
                    "{} has already finished this round",
                    racer
                )));
            }

            let now = Utc::now();
            let finished_at = match ledger.finishes.last() {
                Some(prev) if now <= prev.finished_at => prev.finished_at + Duration::nanoseconds(1),
                _ => now,
            };
            let record = FinishRecord {
                place: ledger.finishes.len() + 1,
                racer: racer.clone(),
                finished_at,
            };
            ledger.finishes.push(record.clone());
            (record, ledger.finishes.len() == self.expected)
        };

        info!("#{} {} [{}]", record.place, racer, racer.id().short());

        let observers: Vec<Arc<dyn FinishObserver>> = lock(&self.observers).values().cloned().collect();
        for observer in observers {
            observer.on_finish(self, &record);
        }

        if complete {
            if let Some(hook) = lock(&self.on_complete).take() {
                spawn_completion(hook);
            }
        }

        Ok(record)
    }

    /// Racers in finishing order.
    pub fn finish_order(&self) -> Vec<Arc<Racer>> {
        lock(&self.ledger).finishes.iter().map(|f| f.racer.clone()).collect()
    }

    /// Finish timestamps in finishing order.
    pub fn finish_timestamps(&self) -> Vec<DateTime<Utc>> {
        lock(&self.ledger).finishes.iter().map(|f| f.finished_at).collect()
    }

    /// Full ledger entries in finishing order.
    pub fn finishes(&self) -> Vec<FinishRecord> {
        lock(&self.ledger).finishes.clone()
    }

    /// Number of finishes recorded so far.
    pub fn finished_count(&self) -> usize {
        lock(&self.ledger).finishes.len()
    }

    /// Whether every expected racer has finished.
    pub fn is_complete(&self) -> bool {
        self.finished_count() == self.expected
    }

    /// Register an observer for every future finish.
    pub fn subscribe(&self, observer: Arc<dyn FinishObserver>) -> ObserverId {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        lock(&self.observers).insert(id, observer);
        debug!("Scoreboard observer {} subscribed", id);
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = lock(&self.observers).remove(&id).is_some();
        if removed {
            debug!("Scoreboard observer {} unsubscribed", id);
        }
        removed
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Serializable copy of the ledger.
    pub fn to_record(&self) -> ScoreboardRecord {
        let ledger = lock(&self.ledger);
        ScoreboardRecord {
            expected: self.expected,
            started_at: ledger.started_at,
            finishes: ledger
                .finishes
                .iter()
                .map(|f| (f.racer.id(), f.finished_at))
                .collect(),
        }
    }

    /// Rebuild a scoreboard from a record.
    ///
    /// `resolve` maps racer ids back to racers. A record that is already
    /// complete never fires `on_round_complete`.
    pub fn from_record<F, R>(
        record: &ScoreboardRecord,
        mut resolve: R,
        on_round_complete: F,
    ) -> Result<Self, CompetitionError>
    where
        F: FnOnce() + Send + 'static,
        R: FnMut(&RacerId) -> Option<Arc<Racer>>,
    {
        let board = Self::new(record.expected, on_round_complete)?;
        if record.finishes.len() > record.expected {
            return Err(CompetitionError::Validation(format!(
                "scoreboard record holds {} finishes for {} racers",
                record.finishes.len(),
                record.expected
            )));
        }

        {
            let mut ledger = lock(&board.ledger);
            ledger.started_at = record.started_at;
            for (place, (id, finished_at)) in record.finishes.iter().enumerate() {
                let racer = resolve(id).ok_or_else(|| {
                    CompetitionError::IllegalOperation(format!(
                        "scoreboard record names unknown racer {}",
                        id.short()
                    ))
                })?;
                if ledger.finishes.last().is_some_and(|prev| prev.finished_at >= *finished_at) {
                    return Err(CompetitionError::Validation(
                        "scoreboard record timestamps are not increasing".to_string(),
                    ));
                }
                ledger.finishes.push(FinishRecord {
                    place: place + 1,
                    racer,
                    finished_at: *finished_at,
                });
            }
        }

        if record.finishes.len() == record.expected {
            *lock(&board.on_complete) = None;
        }
        Ok(board)
    }
}

impl fmt::Debug for Scoreboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoreboard")
            .field("expected", &self.expected)
            .field("finished", &self.finished_count())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Serializable form of a scoreboard ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardRecord {
    /// Expected finishes.
    pub expected: usize,
    /// Round start.
    pub started_at: Option<DateTime<Utc>>,
    /// `(racer, finish time)` in finishing order.
    pub finishes: Vec<(RacerId, DateTime<Utc>)>,
}

/// Run the completion hook away from the lane that detected completion.
fn spawn_completion(hook: CompletionHook) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { hook() });
        }
        Err(_) => {
            std::thread::spawn(hook);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
