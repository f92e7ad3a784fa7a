//! Step-ordered deferred work.
//!
//! Currently this holds the release queue, which keeps destroyed bodies addressable until
//! no rewind can reach back to a step where they were alive.
pub mod release;
