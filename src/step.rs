//! Simulation step indices and the phases within a step.
use std::fmt::Display;

/// One simulation tick. Signed so that window arithmetic below the first step stays representable.
pub type Step = i64;

/// Where inside a step's pipeline a value was produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Dirty properties pushed by the owning application, before the solver sees them.
    PreInput,
    /// Solver state after input has been applied, before integration.
    PostInput,
    /// Solver results after integration and post-solve callbacks.
    PostSolve,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::PreInput => write!(f, "pre-input"),
            Phase::PostInput => write!(f, "post-input"),
            Phase::PostSolve => write!(f, "post-solve"),
        }
    }
}

/// A point in simulated time, ordered by step and then by phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepAndPhase {
    pub step: Step,
    pub phase: Phase,
}

impl StepAndPhase {
    pub const fn new(step: Step, phase: Phase) -> Self {
        Self { step, phase }
    }

    pub const fn pre_input(step: Step) -> Self {
        Self::new(step, Phase::PreInput)
    }

    pub const fn post_input(step: Step) -> Self {
        Self::new(step, Phase::PostInput)
    }

    pub const fn post_solve(step: Step) -> Self {
        Self::new(step, Phase::PostSolve)
    }
}

impl Display for StepAndPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.step, self.phase)
    }
}
