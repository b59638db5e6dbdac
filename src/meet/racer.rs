//! Racer Definitions
//!
//! A racer is an immutable identity (id, name, category, base skill) plus a
//! small piece of per-round state: the stroke of the round, the round
//! modifier and the RNG feeding per-tick jitter.
//!
//! Category-specific behaviour is a lookup into [`PerformanceTable`], not a
//! type per category.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::meet::error::CompetitionError;

// =============================================================================
// RACER ID
// =============================================================================

/// Unique racer identifier (UUID as bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct RacerId(pub [u8; 16]);

impl RacerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// =============================================================================
// CATEGORY / UNIFORM / STROKE
// =============================================================================

/// The two disjoint racer categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    /// Men's category.
    Male = 0,
    /// Women's category.
    Female = 1,
}

impl Category {
    /// Uniform colour worn by this category.
    pub fn uniform(self) -> Uniform {
        match self {
            Category::Male => Uniform::Blue,
            Category::Female => Uniform::Red,
        }
    }

    /// Both categories, in table order.
    pub const ALL: [Category; 2] = [Category::Male, Category::Female];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Male => f.write_str("male"),
            Category::Female => f.write_str("female"),
        }
    }
}

/// Uniform colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Uniform {
    /// Male uniform.
    Blue,
    /// Female uniform.
    Red,
}

/// Swimming stroke of a round (the course variant).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[derive(Default)]
pub enum Stroke {
    /// Freestyle, the fastest stroke.
    #[default]
    Freestyle = 0,
    /// Butterfly.
    Butterfly = 1,
    /// Breaststroke, the slowest stroke.
    Breaststroke = 2,
    /// Backstroke.
    Backstroke = 3,
}

impl Stroke {
    /// All strokes, in table order.
    pub const ALL: [Stroke; 4] = [
        Stroke::Freestyle,
        Stroke::Butterfly,
        Stroke::Breaststroke,
        Stroke::Backstroke,
    ];
}

impl fmt::Display for Stroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stroke::Freestyle => "freestyle",
            Stroke::Butterfly => "butterfly",
            Stroke::Breaststroke => "breaststroke",
            Stroke::Backstroke => "backstroke",
        };
        f.write_str(name)
    }
}

// =============================================================================
// PERFORMANCE TABLE
// =============================================================================

/// Bounding constants of the performance function.
///
/// A tick's speed is
/// `(skill + round_modifier + jitter) * (stroke_factor + category_offset)`.
/// With the defaults the result lies in roughly `[0.24, 0.97)`, always
/// strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTable {
    /// Lowest base skill (inclusive).
    pub skill_floor: f64,
    /// Highest base skill (exclusive).
    pub skill_ceiling: f64,
    /// Round modifier is drawn from `[-bound, bound)`.
    pub round_modifier_bound: f64,
    /// Per-tick jitter is drawn from `[-bound, bound)`.
    pub tick_jitter_bound: f64,
    /// Relative speed per stroke, indexed by `Stroke as usize`.
    pub stroke_factors: [f64; 4],
    /// Offset per category, indexed by `Category as usize`.
    pub category_offsets: [f64; 2],
}

impl Default for PerformanceTable {
    fn default() -> Self {
        Self {
            skill_floor: 0.5,
            skill_ceiling: 1.0,
            round_modifier_bound: 0.1,
            tick_jitter_bound: 0.05,
            stroke_factors: [0.89, 0.82, 0.71, 0.82],
            category_offsets: [0.02, -0.02],
        }
    }
}

impl PerformanceTable {
    /// Stroke factor with the category offset applied.
    #[inline]
    pub fn stroke_factor(&self, stroke: Stroke, category: Category) -> f64 {
        self.stroke_factors[stroke as usize] + self.category_offsets[category as usize]
    }

    /// Smallest speed `advance()` can return under this table.
    ///
    /// Zero or negative means a lane could never finish.
    pub fn min_speed(&self) -> f64 {
        let effort = self.min_effort();
        let factor = self.min_stroke_factor();
        if effort <= 0.0 || factor <= 0.0 {
            return effort.min(factor);
        }
        effort * factor
    }

    /// Weakest per-tick effort: skill floor less both modifier bounds.
    fn min_effort(&self) -> f64 {
        self.skill_floor - self.round_modifier_bound - self.tick_jitter_bound
    }

    /// Smallest stroke factor over every stroke and category.
    fn min_stroke_factor(&self) -> f64 {
        Stroke::ALL
            .iter()
            .flat_map(|s| Category::ALL.iter().map(move |c| self.stroke_factor(*s, *c)))
            .fold(f64::INFINITY, f64::min)
    }

    /// Check that the table describes a race every lane can finish.
    pub fn validate(&self) -> Result<(), CompetitionError> {
        if self.skill_floor >= self.skill_ceiling {
            return Err(CompetitionError::Validation(
                "skill floor must be below skill ceiling".to_string(),
            ));
        }
        if self.round_modifier_bound < 0.0 || self.tick_jitter_bound < 0.0 {
            return Err(CompetitionError::Validation(
                "modifier bounds must not be negative".to_string(),
            ));
        }
        if self.min_effort() <= 0.0 {
            return Err(CompetitionError::Validation(
                "skill floor must exceed the modifier bounds".to_string(),
            ));
        }
        if self.min_stroke_factor() <= 0.0 {
            return Err(CompetitionError::Validation(
                "every stroke factor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// RACER
// =============================================================================

/// Per-round state, mutated by `prepare_for_round` and `advance`.
#[derive(Clone, Debug)]
struct RoundForm {
    stroke: Stroke,
    modifier: f64,
    rng: DeterministicRng,
}

/// A swimmer.
///
/// Racers are shared as `Arc<Racer>` between the roster and the lane that
/// holds them for a round. Identity is fixed at construction; only the
/// round form changes.
#[derive(Debug)]
pub struct Racer {
    id: RacerId,
    name: String,
    category: Category,
    skill: f64,
    table: PerformanceTable,
    round: Mutex<RoundForm>,
}

impl Racer {
    /// Create a racer with a skill drawn from fresh entropy.
    pub fn new(category: Category, name: impl Into<String>) -> Result<Self, CompetitionError> {
        Self::build(category, name.into(), DeterministicRng::from_entropy(), PerformanceTable::default())
    }

    /// Create a racer whose skill, round modifiers and jitter all come from `seed`.
    pub fn seeded(
        category: Category,
        name: impl Into<String>,
        seed: u64,
    ) -> Result<Self, CompetitionError> {
        Self::build(category, name.into(), DeterministicRng::new(seed), PerformanceTable::default())
    }

    /// Create a seeded racer with a custom performance table.
    pub fn with_performance(
        category: Category,
        name: impl Into<String>,
        seed: u64,
        table: PerformanceTable,
    ) -> Result<Self, CompetitionError> {
        Self::build(category, name.into(), DeterministicRng::new(seed), table)
    }

    fn build(
        category: Category,
        name: String,
        mut rng: DeterministicRng,
        table: PerformanceTable,
    ) -> Result<Self, CompetitionError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CompetitionError::Validation("racer name must not be empty".to_string()));
        }
        table.validate()?;

        let skill = rng.next_f64_range(table.skill_floor, table.skill_ceiling);

        Ok(Self {
            id: RacerId::random(),
            name,
            category,
            skill,
            table,
            round: Mutex::new(RoundForm {
                stroke: Stroke::default(),
                modifier: 0.0,
                rng,
            }),
        })
    }

    /// Unique id.
    pub fn id(&self) -> RacerId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Uniform colour.
    pub fn uniform(&self) -> Uniform {
        self.category.uniform()
    }

    /// Base skill, fixed for the racer's lifetime.
    pub fn skill(&self) -> f64 {
        self.skill
    }

    /// Performance table this racer swims by.
    pub fn performance(&self) -> &PerformanceTable {
        &self.table
    }

    /// Whether `other` has the same name and category.
    pub fn same_identity(&self, other: &Racer) -> bool {
        self.category == other.category && self.name == other.name
    }

    /// Stroke of the current round.
    pub fn stroke(&self) -> Stroke {
        self.form().stroke
    }

    /// Modifier of the current round.
    pub fn round_modifier(&self) -> f64 {
        self.form().modifier
    }

    /// Reset the round form for a new round.
    ///
    /// The previous round's modifier is discarded.
    pub fn prepare_for_round(&self, stroke: Stroke) {
        let mut form = self.form();
        form.stroke = stroke;
        form.modifier = form.rng.next_symmetric(self.table.round_modifier_bound);
    }

    /// Speed contribution of one tick. Always strictly positive.
    pub fn advance(&self) -> f64 {
        let mut form = self.form();
        let jitter = form.rng.next_symmetric(self.table.tick_jitter_bound);
        (self.skill + form.modifier + jitter) * self.table.stroke_factor(form.stroke, self.category)
    }

    fn form(&self) -> std::sync::MutexGuard<'_, RoundForm> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializable copy of this racer, round form included.
    pub fn to_record(&self) -> RacerRecord {
        let form = self.form();
        RacerRecord {
            id: self.id,
            name: self.name.clone(),
            category: self.category,
            skill: self.skill,
            table: self.table,
            stroke: form.stroke,
            modifier: form.modifier,
            rng: form.rng.clone(),
        }
    }

    /// Rebuild a racer from a record.
    pub fn from_record(record: RacerRecord) -> Result<Self, CompetitionError> {
        if record.name.trim().is_empty() {
            return Err(CompetitionError::Validation("racer name must not be empty".to_string()));
        }
        record.table.validate()?;
        if !(record.table.skill_floor..record.table.skill_ceiling).contains(&record.skill) {
            return Err(CompetitionError::Validation(format!(
                "skill {} of {} is outside the performance table",
                record.skill, record.name
            )));
        }

        Ok(Self {
            id: record.id,
            name: record.name,
            category: record.category,
            skill: record.skill,
            table: record.table,
            round: Mutex::new(RoundForm {
                stroke: record.stroke,
                modifier: record.modifier,
                rng: record.rng,
            }),
        })
    }
}

impl PartialEq for Racer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Racer {}

impl fmt::Display for Racer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.category)
    }
}

/// Serializable form of a [`Racer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RacerRecord {
    /// Racer id.
    pub id: RacerId,
    /// Display name.
    pub name: String,
    /// Category.
    pub category: Category,
    /// Base skill.
    pub skill: f64,
    /// Performance table.
    pub table: PerformanceTable,
    /// Stroke of the last prepared round.
    pub stroke: Stroke,
    /// Modifier of the last prepared round.
    pub modifier: f64,
    /// RNG state.
    pub rng: DeterministicRng,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_rejected() {
        let err = Racer::new(Category::Male, "   ").unwrap_err();
        assert!(matches!(err, CompetitionError::Validation(_)));
    }

    #[test]
    fn test_name_is_trimmed() {
        let racer = Racer::new(Category::Female, "  Ada ").unwrap();
        assert_eq!(racer.name(), "Ada");
        assert_eq!(racer.to_string(), "Ada (female)");
    }

    #[test]
    fn test_skill_in_range() {
        for seed in 0..200 {
            let racer = Racer::seeded(Category::Male, "r", seed).unwrap();
            assert!((0.5..1.0).contains(&racer.skill()));
        }
    }

    #[test]
    fn test_seeded_skill_is_reproducible() {
        let a = Racer::seeded(Category::Male, "a", 21).unwrap();
        let b = Racer::seeded(Category::Male, "b", 21).unwrap();
        assert_eq!(a.skill(), b.skill());
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn test_prepare_resets_modifier() {
        let racer = Racer::seeded(Category::Female, "r", 3).unwrap();
        assert_eq!(racer.round_modifier(), 0.0);

        racer.prepare_for_round(Stroke::Backstroke);
        let first = racer.round_modifier();
        assert!((-0.1..0.1).contains(&first));
        assert_eq!(racer.stroke(), Stroke::Backstroke);

        racer.prepare_for_round(Stroke::Butterfly);
        assert_ne!(racer.round_modifier(), first);
        assert_eq!(racer.stroke(), Stroke::Butterfly);
    }

    #[test]
    fn test_advance_strictly_positive() {
        let table = PerformanceTable::default();
        for seed in 0..50 {
            let racer = Racer::seeded(Category::Female, "r", seed).unwrap();
            racer.prepare_for_round(Stroke::Breaststroke);
            for _ in 0..100 {
                let speed = racer.advance();
                assert!(speed >= table.min_speed());
                assert!(speed > 0.0);
            }
        }
    }

    #[test]
    fn test_category_offset_is_symmetric() {
        let table = PerformanceTable::default();
        for stroke in Stroke::ALL {
            let male = table.stroke_factor(stroke, Category::Male);
            let female = table.stroke_factor(stroke, Category::Female);
            assert!((male - female - 0.04).abs() < 1e-12);
        }
    }

    #[test]
    fn test_uniforms() {
        assert_eq!(Category::Male.uniform(), Uniform::Blue);
        assert_eq!(Category::Female.uniform(), Uniform::Red);
    }

    #[test]
    fn test_validate_rejects_stalling_table() {
        let table = PerformanceTable {
            skill_floor: 0.1,
            round_modifier_bound: 0.1,
            ..Default::default()
        };
        assert!(table.validate().is_err());
        assert!(PerformanceTable::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_stroke_factors() {
        let table = PerformanceTable {
            skill_floor: 0.01,
            stroke_factors: [-0.5; 4],
            ..Default::default()
        };
        assert!(matches!(table.validate(), Err(CompetitionError::Validation(_))));
        assert!(table.min_speed() <= 0.0);
        assert!(Racer::with_performance(Category::Male, "Ian", 1, table).is_err());

        let one_backwards = PerformanceTable {
            stroke_factors: [0.89, 0.82, -0.1, 0.82],
            ..Default::default()
        };
        assert!(one_backwards.validate().is_err());
    }

    #[test]
    fn test_record_roundtrip_keeps_rng() {
        let racer = Racer::seeded(Category::Male, "Ian", 9).unwrap();
        racer.prepare_for_round(Stroke::Freestyle);

        let restored = Racer::from_record(racer.to_record()).unwrap();
        assert_eq!(restored, racer);
        assert_eq!(restored.round_modifier(), racer.round_modifier());
        assert_eq!(restored.advance(), racer.advance());
    }
}
