//! Swimming Lane
//!
//! One lane of fixed length holding at most one racer. While a round runs
//! the lane's own task is the only writer of its position; any number of
//! readers can poll it without blocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::meet::racer::Racer;

/// Tick pacing of the lane loop.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneTiming {
    /// Sleep between two position updates.
    pub tick_interval: Duration,
    /// Distance covered per unit of racer speed in one tick.
    pub tick_distance: f64,
}

impl Default for LaneTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(crate::DEFAULT_TICK_MILLIS),
            tick_distance: 0.25,
        }
    }
}

/// Position of the racer in a lane, stored as `f64` bits.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    bits: AtomicU64,
    touched: AtomicBool,
}

impl Progress {
    fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn store(&self, position: f64) {
        self.bits.store(position.to_bits(), Ordering::Release);
    }

    fn reset(&self) {
        self.store(0.0);
        self.touched.store(false, Ordering::Release);
    }

    fn has_touched(&self) -> bool {
        self.touched.load(Ordering::Acquire)
    }
}

/// A single-occupant lane.
#[derive(Debug)]
pub struct Lane {
    index: usize,
    length: u32,
    progress: Arc<Progress>,
    occupant: Option<Arc<Racer>>,
    task: Option<JoinHandle<()>>,
}

impl Lane {
    /// Create an empty lane.
    pub fn new(index: usize, length: u32) -> Self {
        Self {
            index,
            length,
            progress: Arc::new(Progress::default()),
            occupant: None,
            task: None,
        }
    }

    /// Position of this lane in the pool (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Course length.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Set or clear the occupant and reset the position to 0.
    ///
    /// A loop still attached to the lane is cancelled first.
    pub fn assign(&mut self, racer: Option<Arc<Racer>>) {
        self.cancel();
        match &racer {
            Some(r) => debug!("Lane {} assigned to {} [{}]", self.index, r, r.id().short()),
            None => debug!("Lane {} cleared", self.index),
        }
        self.occupant = racer;
        self.progress.reset();
    }

    /// Put back a saved position. Reaching the lane length counts as touched.
    pub(crate) fn restore_position(&mut self, position: f64) {
        self.progress.store(position);
        self.progress
            .touched
            .store(position >= f64::from(self.length), Ordering::Release);
    }

    /// Whether a racer holds the lane.
    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    /// The racer holding the lane.
    pub fn occupant(&self) -> Option<&Arc<Racer>> {
        self.occupant.as_ref()
    }

    /// Current position. Never blocks.
    pub fn position(&self) -> f64 {
        self.progress.load()
    }

    /// Whether the occupant has reached the end of the lane this round.
    pub fn has_touched(&self) -> bool {
        self.progress.has_touched()
    }

    /// Whether the lane loop is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawn the advancement loop on the current Tokio runtime.
    ///
    /// `on_finish` runs exactly once, on the lane task, when the position
    /// reaches the lane length. Returns `false` (and spawns nothing) for an
    /// unoccupied lane.
    pub fn run_to_completion<F>(&mut self, timing: LaneTiming, on_finish: F) -> bool
    where
        F: FnOnce(Arc<Racer>) + Send + 'static,
    {
        let Some(racer) = self.occupant.clone() else {
            return false;
        };
        self.cancel();

        let progress = self.progress.clone();
        let length = f64::from(self.length);
        let index = self.index;

        debug!("Lane {} launching {}", index, racer);
        self.task = Some(tokio::spawn(async move {
            swim_lane(&racer, &progress, length, timing).await;
            debug!("Lane {} touchpad hit by {}", index, racer);
            on_finish(racer);
        }));
        true
    }

    /// Abort the lane loop, if one is running.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                if !self.progress.has_touched() {
                    warn!("Cancelling lane {} before its racer finished", self.index);
                }
                task.abort();
            }
        }
    }

    /// Wait for the lane loop to end. Returns immediately if none is attached.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            // A cancelled task resolves with a JoinError; nothing to report.
            let _ = task.await;
        }
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Advance `racer` until `length` is reached.
///
/// No lock is held across the sleep.
async fn swim_lane(racer: &Racer, progress: &Progress, length: f64, timing: LaneTiming) {
    let mut position = progress.load();
    while position < length {
        position += timing.tick_distance * racer.advance();
        progress.store(position);

        #[cfg(feature = "debug-tracing")]
        tracing::trace!("{} at {:.3}", racer.name(), position);

        tokio::time::sleep(timing.tick_interval).await;
    }
    progress.touched.store(true, Ordering::Release);
}
