//! Ready checks
//!
//! Before a match is committed every player has to confirm they are still
//! there. One session per formed match, bounded by a deadline.

pub mod coordinator;
pub mod session;

pub use coordinator::{MatchHandoff, ReadyCheckCoordinator, DEFAULT_READY_CHECK_TIMEOUT};
pub use session::{ReadyCheckOutcome, ReadyCheckSession};
