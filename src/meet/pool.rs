//! Swimming Pool
//!
//! The fixed, ordered set of lanes. Assigns a round's racers to lanes and
//! fans the start out to one task per occupied lane.

use std::sync::Arc;
use futures_util::future::join_all;
use tracing::{debug, error, info};

use crate::meet::error::CompetitionError;
use crate::meet::lane::{Lane, LaneTiming};
use crate::meet::racer::{Category, Racer, Stroke};
use crate::meet::scoreboard::Scoreboard;
use crate::MIN_RACERS_PER_ROUND;

/// The pool and its lanes.
#[derive(Debug)]
pub struct Pool {
    lanes: Vec<Lane>,
    length: u32,
    timing: LaneTiming,
}

impl Pool {
    /// Create a pool of `lane_count` empty lanes of `length`.
    pub fn new(lane_count: usize, length: u32, timing: LaneTiming) -> Self {
        Self {
            lanes: (0..lane_count).map(|i| Lane::new(i, length)).collect(),
            length,
            timing,
        }
    }

    /// Number of lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Length shared by every lane.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Tick pacing used by every lane.
    pub fn timing(&self) -> LaneTiming {
        self.timing
    }

    /// Lanes in order.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Put `racers` into lanes for a new round, in input order.
    ///
    /// All checks run before any lane or racer changes.
    pub fn assign_round(
        &mut self,
        category: Category,
        stroke: Stroke,
        racers: &[Arc<Racer>],
    ) -> Result<(), CompetitionError> {
        if racers.len() < MIN_RACERS_PER_ROUND || racers.len() > self.lanes.len() {
            return Err(CompetitionError::WrongParticipantCount(format!(
                "a round takes {} to {} racers, got {}",
                MIN_RACERS_PER_ROUND,
                self.lanes.len(),
                racers.len()
            )));
        }

        if let Some(racer) = racers.iter().find(|r| r.category() != category) {
            return Err(CompetitionError::CategoryMismatch {
                racer: racer.to_string(),
                expected: category,
            });
        }

        for (i, racer) in racers.iter().enumerate() {
            if racers[..i].iter().any(|other| other.id() == racer.id()) {
                return Err(CompetitionError::IllegalOperation(format!(
                    "{} cannot swim in two lanes",
                    racer
                )));
            }
        }

        for (i, lane) in self.lanes.iter_mut().enumerate() {
            match racers.get(i) {
                Some(racer) => {
                    racer.prepare_for_round(stroke);
                    lane.assign(Some(racer.clone()));
                }
                None => lane.assign(None),
            }
        }

        debug!("Pool assigned {} {} racers for {}", racers.len(), category, stroke);
        Ok(())
    }

    /// Occupy lanes with already-prepared racers at saved positions.
    pub(crate) fn restore_assignment(
        &mut self,
        occupants: Vec<(Option<Arc<Racer>>, f64)>,
    ) -> Result<(), CompetitionError> {
        if occupants.len() != self.lanes.len() {
            return Err(CompetitionError::Validation(format!(
                "snapshot describes {} lanes, pool has {}",
                occupants.len(),
                self.lanes.len()
            )));
        }
        for (lane, (occupant, position)) in self.lanes.iter_mut().zip(occupants) {
            let occupied = occupant.is_some();
            lane.assign(occupant);
            if occupied {
                lane.restore_position(position);
            }
        }
        Ok(())
    }

    /// Racers holding a lane, in lane order.
    pub fn active_racers(&self) -> Vec<Arc<Racer>> {
        self.lanes.iter().filter_map(|lane| lane.occupant().cloned()).collect()
    }

    /// Position of every lane, in lane order. Empty lanes report 0.
    pub fn positions(&self) -> Vec<f64> {
        self.lanes.iter().map(Lane::position).collect()
    }

    /// Mark the round start on `scoreboard` and launch every occupied lane.
    ///
    /// Returns the number of lanes launched without waiting for any of them.
    /// Must be called from within a Tokio runtime.
    pub fn start_round(&mut self, scoreboard: &Arc<Scoreboard>) -> Result<usize, CompetitionError> {
        let started_at = scoreboard.mark_start()?;
        let timing = self.timing;

        let mut launched = 0;
        for lane in &mut self.lanes {
            let board = scoreboard.clone();
            let index = lane.index();
            let spawned = lane.run_to_completion(timing, move |racer| {
                if let Err(e) = board.record_finish(&racer) {
                    error!("Lane {} could not record finish of {}: {}", index, racer, e);
                }
            });
            if spawned {
                launched += 1;
            }
        }

        info!("Round started at {} with {} lanes", started_at.format("%H:%M:%S%.3f"), launched);
        Ok(launched)
    }

    /// Number of lane tasks still alive.
    pub fn running_lanes(&self) -> usize {
        self.lanes.iter().filter(|lane| lane.is_running()).count()
    }

    /// Abort every lane task still running.
    pub fn cancel(&mut self) {
        for lane in &mut self.lanes {
            lane.cancel();
        }
    }

    /// Wait until every lane task has ended.
    pub async fn join(&mut self) {
        join_all(self.lanes.iter_mut().map(Lane::join)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use proptest::prelude::*;

    fn fast_pool(lanes: usize, length: u32) -> Pool {
        Pool::new(lanes, length, LaneTiming {
            tick_interval: Duration::from_millis(1),
            tick_distance: 0.25,
        })
    }

    fn field(category: Category, count: usize) -> Vec<Arc<Racer>> {
        (0..count)
            .map(|i| Arc::new(Racer::seeded(category, format!("{category} {i}"), 100 + i as u64).unwrap()))
            .collect()
    }

    #[test]
    fn test_new_pool_is_empty() {
        let pool = fast_pool(5, 25);
        assert_eq!(pool.lane_count(), 5);
        assert_eq!(pool.length(), 25);
        assert!(pool.active_racers().is_empty());
        assert_eq!(pool.positions(), vec![0.0; 5]);
    }

    #[test]
    fn test_assign_round_in_lane_order() {
        let mut pool = fast_pool(5, 25);
        let racers = field(Category::Female, 3);
        pool.assign_round(Category::Female, Stroke::Backstroke, &racers).unwrap();

        assert_eq!(pool.active_racers(), racers);
        assert!(pool.lanes()[..3].iter().all(Lane::is_occupied));
        assert!(pool.lanes()[3..].iter().all(|l| !l.is_occupied()));
        assert!(racers.iter().all(|r| r.stroke() == Stroke::Backstroke));
    }

    #[test]
    fn test_wrong_counts_rejected() {
        let mut pool = fast_pool(3, 25);
        for count in [0, 1, 4] {
            let racers = field(Category::Male, count);
            let err = pool.assign_round(Category::Male, Stroke::Freestyle, &racers).unwrap_err();
            assert!(matches!(err, CompetitionError::WrongParticipantCount(_)));
        }
    }

    #[test]
    fn test_category_mismatch_leaves_pool_untouched() {
        let mut pool = fast_pool(5, 25);
        let first = field(Category::Male, 2);
        pool.assign_round(Category::Male, Stroke::Freestyle, &first).unwrap();
        let modifier = first[0].round_modifier();

        let mut mixed = field(Category::Male, 2);
        mixed.push(Arc::new(Racer::seeded(Category::Female, "Eve", 1).unwrap()));
        let err = pool.assign_round(Category::Male, Stroke::Butterfly, &mixed).unwrap_err();
        assert!(matches!(err, CompetitionError::CategoryMismatch { .. }));

        assert_eq!(pool.active_racers(), first);
        assert_eq!(first[0].round_modifier(), modifier);
        assert!(mixed.iter().all(|r| r.round_modifier() == 0.0));
    }

    #[test]
    fn test_duplicate_racer_rejected() {
        let mut pool = fast_pool(5, 25);
        let racers = field(Category::Male, 2);
        let doubled = vec![racers[0].clone(), racers[1].clone(), racers[0].clone()];
        let err = pool.assign_round(Category::Male, Stroke::Freestyle, &doubled).unwrap_err();
        assert!(matches!(err, CompetitionError::IllegalOperation(_)));
    }

    #[test]
    fn test_next_round_clears_lanes() {
        let mut pool = fast_pool(5, 25);
        pool.assign_round(Category::Male, Stroke::Freestyle, &field(Category::Male, 5)).unwrap();
        let second = field(Category::Female, 2);
        pool.assign_round(Category::Female, Stroke::Freestyle, &second).unwrap();

        assert_eq!(pool.active_racers(), second);
        assert_eq!(pool.lanes().iter().filter(|l| l.is_occupied()).count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_round_reports_every_lane() {
        let mut pool = fast_pool(5, 5);
        let racers = field(Category::Male, 3);
        pool.assign_round(Category::Male, Stroke::Freestyle, &racers).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let board = Arc::new(Scoreboard::new(3, move || {
            let _ = tx.send(());
        }).unwrap());

        assert_eq!(pool.start_round(&board).unwrap(), 3);
        assert!(board.started_at().is_some());

        tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        pool.join().await;

        assert_eq!(board.finished_count(), 3);
        assert_eq!(pool.running_lanes(), 0);
        let positions = pool.positions();
        assert!(positions[..3].iter().all(|p| *p >= 5.0));
        assert_eq!(&positions[3..], &[0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_cancel_aborts_lanes() {
        let mut pool = fast_pool(2, 1000);
        pool.assign_round(Category::Male, Stroke::Breaststroke, &field(Category::Male, 2)).unwrap();
        let board = Arc::new(Scoreboard::new(2, || {}).unwrap());

        pool.start_round(&board).unwrap();
        assert_eq!(pool.running_lanes(), 2);

        pool.cancel();
        assert_eq!(pool.running_lanes(), 0);
        assert_eq!(board.finished_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_assignment_occupies_exactly_n_lanes(lanes in 2usize..9, pick in 0usize..16) {
            let count = 2 + pick % (lanes - 1);
            let mut pool = fast_pool(lanes, 25);
            let racers = field(Category::Female, count);

            pool.assign_round(Category::Female, Stroke::Freestyle, &racers).unwrap();

            let occupied = pool.lanes().iter().filter(|l| l.is_occupied()).count();
            prop_assert_eq!(occupied, count);
            prop_assert!(pool.lanes()[count..].iter().all(|l| !l.is_occupied()));
            prop_assert!(pool.positions().iter().all(|p| *p == 0.0));
        }
    }
}
