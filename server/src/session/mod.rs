//! Sync session state machine.
//!
//! A session moves one library into another:
//! export → transfer → import → verify. Each session owns its working set and
//! checkpoint; sessions targeting the same store run one at a time.

mod events;
mod progress;
mod registry;
mod retry;
mod runner;
mod state;

pub use events::SessionEvent;
pub use progress::{ProgressTracker, ProgressUpdate};
pub use registry::SessionRegistry;
pub use retry::RetryPolicy;
pub use runner::{Decision, RunMode, SessionContext, SessionRunner};
pub use state::*;
