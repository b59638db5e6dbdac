//! Competition Errors
//!
//! Every failure is synchronous and raised before any shared state changes.

use crate::meet::competition::CompetitionState;
use crate::meet::racer::Category;

/// Errors raised by the race engine and the competition state machine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompetitionError {
    /// Roster or round cardinality violated.
    #[error("Wrong participant count: {0}")]
    WrongParticipantCount(String),

    /// A racer does not belong to the round's category.
    #[error("Racer {racer} does not match round category {expected}")]
    CategoryMismatch {
        /// Display name of the offending racer.
        racer: String,
        /// Category the round was prepared for.
        expected: Category,
    },

    /// The operation references something the competition does not hold.
    #[error("Illegal operation: {0}")]
    IllegalOperation(String),

    /// The state machine does not permit the operation right now.
    #[error("Cannot {operation} while the competition is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the competition was in.
        state: CompetitionState,
    },

    /// Malformed identity or configuration input.
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl CompetitionError {
    /// Shorthand for [`CompetitionError::InvalidState`].
    pub fn invalid_state(operation: &'static str, state: CompetitionState) -> Self {
        Self::InvalidState { operation, state }
    }
}
