use serde::{Deserialize, Serialize};

use crate::constants::{ENV_DEBUG, ENV_DEV_MODE};

/// Flags read from the container environment once at startup.
///
/// Every branch that used to test the environment directly now reads these
/// values, so decisions can be exercised without mutating process state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFlags {
    pub dev_mode: bool,
    pub debug: bool,
}

impl RuntimeFlags {
    /// Reads the flags from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the flags through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            dev_mode: lookup(ENV_DEV_MODE).as_deref().is_some_and(is_truthy),
            debug: lookup(ENV_DEBUG).as_deref().is_some_and(is_truthy),
        }
    }
}

/// Returns true for the usual spellings of an enabled flag.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
