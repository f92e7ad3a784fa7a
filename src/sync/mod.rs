//! Rewind and reconciliation.
//!
//! A rewind restores every tracked body to an earlier step and puts the buffer into a
//! resimulation. While the host replays the steps, resimulated values are compared with
//! what was recorded the first time round; bodies that diverge are desynced and their
//! stale future is discarded. The final pass brings the buffer back to the present.

pub mod desync;
pub mod driver;
pub mod rewind;

use std::fmt::Display;

/// Global resimulation mode of a history buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResimState {
    #[default]
    Idle,
    Resimulating,
    /// The step being resimulated is the last one before the present.
    ResimulatingFinalPass,
}

impl Display for ResimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResimState::Idle => write!(f, "idle"),
            ResimState::Resimulating => write!(f, "resimulating"),
            ResimState::ResimulatingFinalPass => write!(f, "resimulating (final pass)"),
        }
    }
}

/// Per-body reconciliation state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Resimulation reproduces the recorded trajectory so far.
    #[default]
    InSync,
    /// Diverged; stays so until the resimulation's final pass completes.
    HardDesync,
}
