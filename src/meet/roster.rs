//! Competition Roster
//!
//! Everyone taking part: judges, spectators, supporting staff and racers.
//! The roster is validated once, at construction, and never changes
//! afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::rng::{DeterministicRng, derive_racer_seed};
use crate::meet::error::CompetitionError;
use crate::meet::racer::{Category, PerformanceTable, Racer, RacerId};
use crate::meet::scoreboard::{FinishObserver, FinishRecord, Scoreboard};
use crate::MIN_RACERS_PER_ROUND;

fn checked_name(role: &str, name: String) -> Result<String, CompetitionError> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(CompetitionError::Validation(format!("{role} name must not be empty")));
    }
    Ok(name)
}

// =============================================================================
// PEOPLE
// =============================================================================

/// A judge. The first judge starts every round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judge {
    name: String,
}

impl Judge {
    /// Create a judge.
    pub fn new(name: impl Into<String>) -> Result<Self, CompetitionError> {
        Ok(Self { name: checked_name("judge", name.into())? })
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the start of a round.
    pub fn blow_whistle(&self) {
        info!("{}: whistle", self.name);
    }
}

/// A spectator, notified of every finish of the rounds it watches.
#[derive(Debug)]
pub struct Spectator {
    name: String,
    finishes_seen: AtomicUsize,
}

impl Spectator {
    /// Create a spectator.
    pub fn new(name: impl Into<String>) -> Result<Self, CompetitionError> {
        Ok(Self {
            name: checked_name("spectator", name.into())?,
            finishes_seen: AtomicUsize::new(0),
        })
    }

    pub(crate) fn restored(name: impl Into<String>, finishes_seen: usize) -> Result<Self, CompetitionError> {
        let spectator = Self::new(name)?;
        spectator.finishes_seen.store(finishes_seen, Ordering::Relaxed);
        Ok(spectator)
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes this spectator has been told about, across all rounds.
    pub fn finishes_seen(&self) -> usize {
        self.finishes_seen.load(Ordering::Relaxed)
    }
}

impl FinishObserver for Spectator {
    fn on_finish(&self, _scoreboard: &Scoreboard, finish: &FinishRecord) {
        self.finishes_seen.fetch_add(1, Ordering::Relaxed);
        debug!("{} saw {} finish #{}", self.name, finish.racer, finish.place);
    }
}

/// A member of the supporting staff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    name: String,
}

impl StaffMember {
    /// Create a staff member.
    pub fn new(name: impl Into<String>) -> Result<Self, CompetitionError> {
        Ok(Self { name: checked_name("staff", name.into())? })
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Head counts per role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterCounts {
    /// Judges.
    pub judges: usize,
    /// Spectators.
    pub spectators: usize,
    /// Supporting staff.
    pub staff: usize,
    /// Racers in the male category.
    pub male_racers: usize,
    /// Racers in the female category.
    pub female_racers: usize,
}

impl RosterCounts {
    /// All racers.
    pub fn racers(&self) -> usize {
        self.male_racers + self.female_racers
    }

    /// Everyone.
    pub fn people(&self) -> usize {
        self.judges + self.spectators + self.staff + self.racers()
    }

    /// Racers of one category.
    pub fn in_category(&self, category: Category) -> usize {
        match category {
            Category::Male => self.male_racers,
            Category::Female => self.female_racers,
        }
    }
}

// =============================================================================
// ROSTER
// =============================================================================

/// The validated set of people in a competition.
#[derive(Debug)]
pub struct Roster {
    judges: Vec<Judge>,
    spectators: Vec<Arc<Spectator>>,
    staff: Vec<StaffMember>,
    racers: Vec<Arc<Racer>>,
    counts: RosterCounts,
}

impl Roster {
    /// Validate and build a roster.
    ///
    /// Needs at least one judge, and each category must hold either no
    /// racers or at least two, with at least one round's worth overall.
    pub fn new(
        judges: Vec<Judge>,
        spectators: Vec<Arc<Spectator>>,
        staff: Vec<StaffMember>,
        racers: Vec<Arc<Racer>>,
    ) -> Result<Self, CompetitionError> {
        if judges.is_empty() {
            return Err(CompetitionError::WrongParticipantCount(
                "a competition needs at least one judge".to_string(),
            ));
        }

        let counts = RosterCounts {
            judges: judges.len(),
            spectators: spectators.len(),
            staff: staff.len(),
            male_racers: racers.iter().filter(|r| r.category() == Category::Male).count(),
            female_racers: racers.iter().filter(|r| r.category() == Category::Female).count(),
        };

        for category in Category::ALL {
            if counts.in_category(category) == 1 {
                return Err(CompetitionError::WrongParticipantCount(format!(
                    "the {category} category has a single racer; it needs none or at least {MIN_RACERS_PER_ROUND}"
                )));
            }
        }
        if counts.racers() < MIN_RACERS_PER_ROUND {
            return Err(CompetitionError::WrongParticipantCount(format!(
                "a competition needs at least {MIN_RACERS_PER_ROUND} racers"
            )));
        }

        for (i, racer) in racers.iter().enumerate() {
            if racers[..i].iter().any(|other| other.same_identity(racer) || other.id() == racer.id()) {
                return Err(CompetitionError::Validation(format!("{racer} is enrolled twice")));
            }
        }

        Ok(Self { judges, spectators, staff, racers, counts })
    }

    /// Judges.
    pub fn judges(&self) -> &[Judge] {
        &self.judges
    }

    /// Spectators.
    pub fn spectators(&self) -> &[Arc<Spectator>] {
        &self.spectators
    }

    /// Supporting staff.
    pub fn staff(&self) -> &[StaffMember] {
        &self.staff
    }

    /// Racers.
    pub fn racers(&self) -> &[Arc<Racer>] {
        &self.racers
    }

    /// Racers of one category, in enrolment order.
    pub fn racers_in(&self, category: Category) -> Vec<Arc<Racer>> {
        self.racers.iter().filter(|r| r.category() == category).cloned().collect()
    }

    /// Head counts.
    pub fn counts(&self) -> RosterCounts {
        self.counts
    }

    /// Whether `racer` is enrolled.
    pub fn contains(&self, racer: &Racer) -> bool {
        self.racers.iter().any(|r| r.id() == racer.id())
    }

    /// Look up a racer by id.
    pub fn racer(&self, id: &RacerId) -> Option<Arc<Racer>> {
        self.racers.iter().find(|r| r.id() == *id).cloned()
    }

    /// Look up a racer by name and category.
    pub fn racer_named(&self, category: Category, name: &str) -> Option<Arc<Racer>> {
        self.racers
            .iter()
            .find(|r| r.category() == category && r.name() == name)
            .cloned()
    }

    /// Names of everyone in the roster: judges, spectators, racers, staff.
    pub fn all_people(&self) -> Vec<String> {
        self.judges
            .iter()
            .map(|j| j.name().to_string())
            .chain(self.spectators.iter().map(|s| s.name().to_string()))
            .chain(self.racers.iter().map(|r| r.name().to_string()))
            .chain(self.staff.iter().map(|s| s.name().to_string()))
            .collect()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Incremental roster construction with optional deterministic seeding.
#[derive(Debug, Default)]
pub struct RosterBuilder {
    seed: Option<u64>,
    performance: PerformanceTable,
    judges: Vec<Judge>,
    spectators: Vec<Arc<Spectator>>,
    staff: Vec<StaffMember>,
    racers: Vec<Arc<Racer>>,
}

impl RosterBuilder {
    /// Start an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive every racer's seed from `seed` and the racer's name.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Performance table for racers added after this call.
    pub fn performance(mut self, table: PerformanceTable) -> Self {
        self.performance = table;
        self
    }

    /// Add a judge.
    pub fn judge(mut self, name: impl Into<String>) -> Result<Self, CompetitionError> {
        self.judges.push(Judge::new(name)?);
        Ok(self)
    }

    /// Add a spectator.
    pub fn spectator(mut self, name: impl Into<String>) -> Result<Self, CompetitionError> {
        self.spectators.push(Arc::new(Spectator::new(name)?));
        Ok(self)
    }

    /// Add a staff member.
    pub fn staff(mut self, name: impl Into<String>) -> Result<Self, CompetitionError> {
        self.staff.push(StaffMember::new(name)?);
        Ok(self)
    }

    /// Add a racer.
    pub fn racer(mut self, category: Category, name: impl Into<String>) -> Result<Self, CompetitionError> {
        let name = name.into();
        let seed = match self.seed {
            Some(master) => derive_racer_seed(master, format!("{category}:{}", name.trim()).as_bytes()),
            None => DeterministicRng::from_entropy().next_u64(),
        };
        let racer = Racer::with_performance(category, name, seed, self.performance)?;
        self.racers.push(Arc::new(racer));
        Ok(self)
    }

    /// Add an already-built racer.
    pub fn enrol(mut self, racer: Arc<Racer>) -> Self {
        self.racers.push(racer);
        self
    }

    /// Validate and build the roster.
    pub fn build(self) -> Result<Roster, CompetitionError> {
        Roster::new(self.judges, self.spectators, self.staff, self.racers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roster_with(male: usize, female: usize) -> Result<Roster, CompetitionError> {
        let mut builder = RosterBuilder::new().seed(1).judge("Judy")?;
        for i in 0..male {
            builder = builder.racer(Category::Male, format!("M{i}"))?;
        }
        for i in 0..female {
            builder = builder.racer(Category::Female, format!("F{i}"))?;
        }
        builder.build()
    }

    #[test]
    fn test_singleton_categories_rejected() {
        for (male, female) in [(1, 0), (0, 1), (1, 3), (3, 1), (0, 0)] {
            let err = roster_with(male, female).unwrap_err();
            assert!(
                matches!(err, CompetitionError::WrongParticipantCount(_)),
                "{male}/{female} should be rejected"
            );
        }
    }

    #[test]
    fn test_valid_category_counts() {
        for (male, female) in [(0, 2), (2, 0), (2, 2), (5, 3)] {
            let roster = roster_with(male, female).unwrap();
            assert_eq!(roster.counts().male_racers, male);
            assert_eq!(roster.counts().female_racers, female);
        }
    }

    #[test]
    fn test_judge_required() {
        let err = RosterBuilder::new()
            .racer(Category::Male, "A").unwrap()
            .racer(Category::Male, "B").unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, CompetitionError::WrongParticipantCount(_)));
    }

    #[test]
    fn test_empty_names_rejected() {
        assert!(matches!(Judge::new(""), Err(CompetitionError::Validation(_))));
        assert!(matches!(Spectator::new(" "), Err(CompetitionError::Validation(_))));
        assert!(matches!(StaffMember::new(""), Err(CompetitionError::Validation(_))));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let err = RosterBuilder::new()
            .judge("Judy").unwrap()
            .racer(Category::Male, "Ian").unwrap()
            .racer(Category::Male, "Ian").unwrap()
            .racer(Category::Male, "Tom").unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, CompetitionError::Validation(_)));

        // Same name across categories is a different identity.
        assert!(RosterBuilder::new()
            .judge("Judy").unwrap()
            .racer(Category::Male, "Sam").unwrap()
            .racer(Category::Male, "Ian").unwrap()
            .racer(Category::Female, "Sam").unwrap()
            .racer(Category::Female, "Ada").unwrap()
            .build()
            .is_ok());
    }

    #[test]
    fn test_seeded_builder_is_reproducible() {
        let a = roster_with(2, 2).unwrap();
        let b = roster_with(2, 2).unwrap();
        let skills = |r: &Roster| r.racers().iter().map(|x| x.skill()).collect::<Vec<_>>();
        assert_eq!(skills(&a), skills(&b));
    }

    #[test]
    fn test_lookups_and_counts() {
        let roster = RosterBuilder::new()
            .seed(3)
            .judge("Judy").unwrap()
            .spectator("Sue").unwrap()
            .staff("Stan").unwrap()
            .racer(Category::Female, "Ada").unwrap()
            .racer(Category::Female, "Eve").unwrap()
            .build()
            .unwrap();

        let ada = roster.racer_named(Category::Female, "Ada").unwrap();
        assert!(roster.contains(&ada));
        assert_eq!(roster.racer(&ada.id()), Some(ada.clone()));
        assert!(roster.racer_named(Category::Male, "Ada").is_none());

        let outsider = Racer::seeded(Category::Female, "Ada", 3).unwrap();
        assert!(!roster.contains(&outsider));

        assert_eq!(roster.counts().people(), 5);
        assert_eq!(roster.all_people(), vec!["Judy", "Sue", "Ada", "Eve", "Stan"]);
        assert_eq!(roster.racers_in(Category::Male).len(), 0);
    }

    #[test]
    fn test_spectator_counts_finishes() {
        let spectator = Arc::new(Spectator::new("Sue").unwrap());
        let board = Scoreboard::new(2, || {}).unwrap();
        board.subscribe(spectator.clone());

        let a = Arc::new(Racer::seeded(Category::Male, "A", 1).unwrap());
        let b = Arc::new(Racer::seeded(Category::Male, "B", 2).unwrap());
        board.record_finish(&a).unwrap();
        board.record_finish(&b).unwrap();

        assert_eq!(spectator.finishes_seen(), 2);
    }

    proptest! {
        #[test]
        fn prop_category_count_rule(male in 0usize..6, female in 0usize..6) {
            let valid = male != 1 && female != 1 && male + female >= 2;
            prop_assert_eq!(roster_with(male, female).is_ok(), valid);
        }
    }
}
