//! Detection and installation of optional plugin packages.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::constants::CAPABILITY_SEPARATOR;
use crate::error::StartupError;
use crate::invocation::{CommandRunner, Invocation};

/// An optional feature unit enabled by the presence of its package on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    /// Path whose existence enables the capability.
    pub marker: PathBuf,
    /// Idempotent install action, e.g. `pip install /mnt/plugins/x`.
    pub install: Invocation,
    /// Data loads run after a successful install, in order.
    #[serde(default)]
    pub load: Vec<Invocation>,
}

/// The enabled capability names, kept sorted for deterministic output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.0.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Serialized form exported to supervised processes.
    pub fn to_env_value(&self) -> String {
        self.iter().collect::<Vec<_>>().join(CAPABILITY_SEPARATOR)
    }

    /// Parses the exported form back; blank entries are ignored.
    pub fn from_env_value(value: &str) -> Self {
        value
            .split(CAPABILITY_SEPARATOR)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }
}

impl Display for CapabilitySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_env_value())
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Resolves marker paths against a project root and installs what it finds.
#[derive(Debug, Clone)]
pub struct CapabilityRegistrar {
    root: PathBuf,
}

impl CapabilityRegistrar {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute location of a candidate's marker.
    pub fn marker_path(&self, candidate: &CapabilityDescriptor) -> PathBuf {
        resolve(&self.root, &candidate.marker)
    }

    pub fn is_present(&self, candidate: &CapabilityDescriptor) -> bool {
        self.marker_path(candidate).exists()
    }

    /// Installs every candidate whose marker exists and returns their names.
    ///
    /// An absent marker is the common case and is skipped silently.
    ///
    /// # Errors
    /// A detected candidate whose install or load fails aborts with
    /// [`StartupError::CapabilityInstall`].
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub fn discover_and_register<R: CommandRunner>(
        &self,
        candidates: &[CapabilityDescriptor],
        runner: &mut R,
    ) -> Result<CapabilitySet, StartupError> {
        let mut enabled = CapabilitySet::default();

        for candidate in candidates {
            if !self.is_present(candidate) {
                debug!(capability = %candidate.name, marker = %self.marker_path(candidate).display(), "marker absent");
                continue;
            }

            info!(capability = %candidate.name, "installing");
            let actions = std::iter::once(&candidate.install).chain(candidate.load.iter());
            for action in actions {
                runner
                    .run(action)
                    .map_err(|source| StartupError::CapabilityInstall {
                        capability: candidate.name.clone(),
                        source,
                    })?;
            }
            enabled.insert(candidate.name.clone());
        }

        info!(enabled = %enabled, "capabilities registered");
        Ok(enabled)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
