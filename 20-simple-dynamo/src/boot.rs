//! First-boot versus restart detection.
//!
//! A node that has run before must pull its share of the data back from its
//! peers before serving. The only signal is a marker file left in the data
//! directory by the first run.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const MARKER_FILE: &str = "dynamo.boot";

/// How a node comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Nothing to reconcile; serve immediately.
    FirstBoot,
    /// Storage existed before this run; recover from peers first.
    Restart,
}

#[derive(Debug, Clone)]
pub struct BootMarker {
    path: PathBuf,
}

impl BootMarker {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reports whether this is a restart and leaves the marker in place for
    /// the next run.
    pub fn detect(&self) -> Result<StartupMode> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(StartupMode::Restart),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if let Some(dir) = self.path.parent() {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("failed to create {}", dir.display()))?;
                }
                fs::write(&self.path, b"START\n")
                    .with_context(|| format!("failed to write {}", self.path.display()))?;
                Ok(StartupMode::FirstBoot)
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to inspect {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_marker_then_restarts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let marker = BootMarker::new(&dir.path().join("node-5554"));

        assert_eq!(marker.detect()?, StartupMode::FirstBoot);
        assert!(marker.path().exists());
        assert_eq!(marker.detect()?, StartupMode::Restart);
        assert_eq!(marker.detect()?, StartupMode::Restart);
        Ok(())
    }
}
