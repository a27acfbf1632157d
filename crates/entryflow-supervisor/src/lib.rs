//! In-process supervisor for the long-running application processes.
//!
//! One tokio task owns each child (spawn, wait, restart), one task drains
//! each captured output stream into the shared log sink, and the supervisor
//! future itself waits for a termination signal. Shared state lives in an
//! explicit [`Registry`] passed to every task.

mod child;
pub mod error;
pub mod event;
pub mod listener;
pub mod logs;
pub mod registry;
pub mod signal;
pub mod supervisor;

pub use error::SupervisorError;
pub use event::{Stream, SupervisorEvent};
pub use listener::EventListener;
pub use registry::{ProcessRecord, Registry};
pub use supervisor::{GroupStopReport, Supervisor, SupervisorOptions};
