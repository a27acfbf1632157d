//! Constants used across the entryflow workspace.

/// The filename for entryflow's primary configuration.
pub const CONFIG_FILE: &str = "entryflow.toml";

/// Environment variable carrying the development-mode flag.
pub const ENV_DEV_MODE: &str = "DEV_MODE";

/// Environment variable carrying the debug flag.
pub const ENV_DEBUG: &str = "DEBUG";

/// Variable exported to supervised processes with the enabled capabilities.
pub const ENV_CAPABILITIES: &str = "ENABLED_CAPABILITIES";

/// Separator used when the capability set is serialized.
pub const CAPABILITY_SEPARATOR: &str = ",";

/// Default spacing between readiness probes, in seconds.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 60;

pub const DEFAULT_GRACE_SECS: u64 = 10;
pub const DEFAULT_RESTART_BACKOFF_SECS: u64 = 5;
pub const DEFAULT_LISTENER_BUFFER: usize = 256;
