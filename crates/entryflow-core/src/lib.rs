//! Core logic and abstractions for entryflow.
//!
//! This crate defines the startup configuration, runtime flags, the
//! readiness gate, the setup pipeline, capability registration, overlay
//! links and the declarative process model consumed by the supervisor.

pub mod capability;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod invocation;
pub mod overlay;
pub mod process;
pub mod readiness;
pub mod runtime;
pub mod setup;
pub mod startup;

pub use capability::{CapabilityDescriptor, CapabilityRegistrar, CapabilitySet};
pub use command::{Stage, StageRef};
pub use config::StartupConfig;
pub use error::{InvocationError, StartupError};
pub use invocation::{CommandRunner, HostRunner, Invocation};
pub use process::{ExitDecision, ExitKind, GroupSpec, ProcessSpec, ProcessState, RestartPolicy};
pub use readiness::ReadinessGate;
pub use runtime::RuntimeFlags;
pub use setup::{Condition, SetupPipeline, SetupReport, SetupStep};
pub use startup::{Handoff, Startup, StartupPlan};
