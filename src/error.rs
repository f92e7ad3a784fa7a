use thiserror::Error;

use crate::step::{Step, StepAndPhase};

/// Error type for the history buffer and its rewind machinery
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewindError {
    #[error("Ordering error occured, time travel! wrote {attempted} after {last}")]
    TimeTravel {
        last: StepAndPhase,
        attempted: StepAndPhase,
    },
    #[error("History capacity must be greater than 0")]
    ZeroCapacity,
    #[error("Step {step} is older than the earliest retrievable step {earliest}")]
    OutOfWindow { step: Step, earliest: Step },
    #[error("Cannot rewind to step {target}, it is not behind the current step {current}")]
    NotInPast { target: Step, current: Step },
    #[error("Rewinding to step {0} would evict history still needed to rebuild the present")]
    WouldEvict(Step),
    #[error("Body not found: {name}")]
    NotFound { name: String },
}
