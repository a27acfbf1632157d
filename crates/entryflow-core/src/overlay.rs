use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StartupError;

/// Replaces `target` with a symlink to a vendor-provided `source`.
///
/// Each overlay is an independent mapping; applying it twice yields the same
/// link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayLink {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl OverlayLink {
    pub fn apply(&self) -> Result<(), StartupError> {
        self.link().map_err(|source| StartupError::Overlay {
            target: self.target.clone(),
            source,
        })
    }

    fn link(&self) -> io::Result<()> {
        remove_existing(&self.target)?;
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)?;
        }
        symlink(&self.source, &self.target)?;
        info!(
            source = %self.source.display(),
            target = %self.target.display(),
            "overlay linked"
        );
        Ok(())
    }
}

/// Applies every overlay in order, stopping at the first failure.
pub fn apply_all(links: &[OverlayLink]) -> Result<(), StartupError> {
    links.iter().try_for_each(OverlayLink::apply)
}

fn remove_existing(target: &Path) -> io::Result<()> {
    // symlink_metadata so a dangling link still counts as existing
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    debug!(target = %target.display(), "removing existing overlay target");
    if meta.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    }
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn symlink(_source: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "overlay links require a unix host",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file_directory_and_link() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("vendor/maploom.html");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, b"vendor").unwrap();

        let file_target = dir.path().join("templates/maploom.html");
        fs::create_dir_all(file_target.parent().unwrap()).unwrap();
        fs::write(&file_target, b"stale").unwrap();

        let dir_target = dir.path().join("static/maploom");
        fs::create_dir_all(dir_target.join("js")).unwrap();

        let links = vec![
            OverlayLink {
                source: source.clone(),
                target: file_target.clone(),
            },
            OverlayLink {
                source: dir.path().join("vendor"),
                target: dir_target.clone(),
            },
        ];

        apply_all(&links).expect("first apply");
        apply_all(&links).expect("second apply is idempotent");

        assert_eq!(fs::read_link(&file_target).unwrap(), source);
        assert_eq!(fs::read_to_string(&file_target).unwrap(), "vendor");
        assert_eq!(fs::read_link(&dir_target).unwrap(), dir.path().join("vendor"));
    }

    #[test]
    fn replaces_dangling_link_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deep/nested/link");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), &target).unwrap();

        let link = OverlayLink {
            source: dir.path().to_path_buf(),
            target: target.clone(),
        };
        link.apply().unwrap();
        assert_eq!(fs::read_link(&target).unwrap(), dir.path());

        let fresh = OverlayLink {
            source: dir.path().to_path_buf(),
            target: dir.path().join("new/parent/link"),
        };
        fresh.apply().unwrap();
        assert!(fresh.target.is_symlink());
    }
}
