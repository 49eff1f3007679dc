//! Backup, replace and rollback of an installation root.
//!
//! The sequence is `BackingUp → Removing → Extracting → Verifying → Done`.
//! A failure while extracting or verifying triggers one restore attempt from
//! the backup (`Restoring → Restored | Unrecoverable`). Nothing is retried.
//!
//! The installation root is assumed to be owned by this process for the
//! duration of the run; concurrent runs against the same root are unsupported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::{ExtractError, Extractor};
use crate::fsutil::{copy_dir_recursive, reset_dir, CopyError};
use crate::probe::{Probe, ProbeError};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::version::VersionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    BackingUp,
    Removing,
    Extracting,
    Verifying,
    Done,
    Restoring,
    Restored,
    Unrecoverable,
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("cannot create backup directory: {0}")]
    BackupDir(#[source] io::Error),
    #[error("backup failed: {0}")]
    Backup(#[source] CopyError),
    #[error("cannot remove {path} (elevated permissions may be required): {source}; backup kept at {backup}")]
    Removal {
        path: PathBuf,
        #[source]
        source: io::Error,
        backup: PathBuf,
    },
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("new installation does not run: {0}")]
    Probe(#[from] ProbeError),
    #[error("new installation reports {found}, expected {expected}")]
    VerifyMismatch { expected: VersionInfo, found: VersionInfo },
    #[error("{cause}; restoring the backup also failed: {restore}; backup kept at {backup}")]
    Unrecoverable {
        cause: Box<UpgradeError>,
        restore: CopyError,
        backup: PathBuf,
    },
}

/// Everything [`Installer::replace`] needs to know about one upgrade.
#[derive(Debug, Clone)]
pub struct ReplacePlan {
    pub install_root: PathBuf,
    /// Downloaded distribution archive.
    pub archive: PathBuf,
    /// Toolchain executable used to verify the new installation.
    pub exe: PathBuf,
    pub current: VersionInfo,
    pub target: VersionInfo,
}

#[derive(Debug)]
pub enum Replaced {
    Installed,
    /// The new version failed and the previous installation was put back.
    RolledBack { cause: UpgradeError },
}

type RemoveFn = fn(&Path) -> io::Result<()>;

fn remove_tree(path: &Path) -> io::Result<()> {
    fs::remove_dir_all(path)
}

pub struct Installer<'a> {
    extractor: &'a dyn Extractor,
    probe: &'a dyn Probe,
    sink: &'a dyn ProgressSink,
    remove: RemoveFn,
}

impl<'a> Installer<'a> {
    pub fn new(extractor: &'a dyn Extractor, probe: &'a dyn Probe, sink: &'a dyn ProgressSink) -> Self {
        Self { extractor, probe, sink, remove: remove_tree }
    }

    /// Replace how the old installation root is deleted.
    #[cfg(test)]
    fn with_removal(self, remove: RemoveFn) -> Self {
        Self { remove, ..self }
    }

    fn enter(&self, state: UpgradeState) {
        info!(?state, "entering state");
        self.sink.on_progress(ProgressEvent::State(state));
    }

    pub fn replace(&self, plan: &ReplacePlan) -> Result<Replaced, UpgradeError> {
        self.enter(UpgradeState::Idle);

        self.enter(UpgradeState::BackingUp);
        let backup = tempfile::Builder::new()
            .prefix(&format!("gobackup-{}-", plan.current))
            .tempdir()
            .map_err(UpgradeError::BackupDir)?;
        debug!("backup location: {}", backup.path().display());
        let files = copy_dir_recursive(&plan.install_root, backup.path()).map_err(UpgradeError::Backup)?;
        debug!(files, "backup complete");

        self.enter(UpgradeState::Removing);
        debug!("removing {}", plan.install_root.display());
        if let Err(source) = (self.remove)(&plan.install_root) {
            return Err(UpgradeError::Removal {
                path: plan.install_root.clone(),
                source,
                backup: backup.keep(),
            });
        }

        match self.install(plan) {
            Ok(()) => {
                self.enter(UpgradeState::Done);
                Ok(Replaced::Installed)
            }
            Err(cause) => self.restore(plan, backup, cause),
        }
    }

    fn install(&self, plan: &ReplacePlan) -> Result<(), UpgradeError> {
        self.enter(UpgradeState::Extracting);
        fs::create_dir_all(&plan.install_root).map_err(|source| ExtractError::Io {
            path: plan.install_root.clone(),
            source,
        })?;
        self.extractor.extract(&plan.archive, &plan.install_root, self.sink)?;

        self.enter(UpgradeState::Verifying);
        let env = self.probe.probe(&plan.exe)?;
        if env.version != plan.target {
            return Err(UpgradeError::VerifyMismatch { expected: plan.target, found: env.version });
        }
        Ok(())
    }

    fn restore(&self, plan: &ReplacePlan, backup: TempDir, cause: UpgradeError) -> Result<Replaced, UpgradeError> {
        warn!("upgrade failed ({cause}); restoring {}", plan.install_root.display());
        self.enter(UpgradeState::Restoring);

        let restored = reset_dir(&plan.install_root)
            .and_then(|()| copy_dir_recursive(backup.path(), &plan.install_root));
        match restored {
            Ok(_) => {
                self.enter(UpgradeState::Restored);
                Ok(Replaced::RolledBack { cause })
            }
            Err(restore) => {
                self.enter(UpgradeState::Unrecoverable);
                Err(UpgradeError::Unrecoverable {
                    cause: Box::new(cause),
                    restore,
                    backup: backup.keep(),
                })
            }
        }
    }
}
