//! Local directory target.
//!
//! Writes each archive into a per-application directory instead of sending
//! it over the network. Unlike the HTTP target it supports marking coverage
//! files for a later re-upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use crate::archive::ArchivePackager;
use crate::domain::{Application, CommitDescriptor, CoverageSnapshot, OutcomeKind, UploadOutcome};
use crate::obs;
use crate::target::{TargetFactory, UploadTarget};

/// Suffix of the marker file written next to a coverage file to retry.
pub const RETRY_MARKER_SUFFIX: &str = "retry";

pub struct DirectoryTarget {
    dir: PathBuf,
    commit: CommitDescriptor,
    packager: ArchivePackager,
}

impl DirectoryTarget {
    pub fn new(
        root: impl AsRef<Path>,
        application: &Application,
        commit: CommitDescriptor,
        packager: ArchivePackager,
    ) -> Self {
        Self {
            dir: root.as_ref().join(sanitize(application.marker())),
            commit,
            packager,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_archive(&self, archive: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!(
            "{}-{}-{}.zip",
            sanitize(&self.commit.branch),
            self.commit.timestamp_millis,
            Utc::now().timestamp_millis()
        );
        let path = self.dir.join(name);
        std::fs::write(&path, archive)?;
        Ok(path)
    }

    fn try_upload(&self, snapshot: &CoverageSnapshot) -> UploadOutcome {
        let archive = match self.packager.build(snapshot.report()) {
            Ok(archive) => archive,
            Err(e) => {
                error!("Failed to compile coverage zip file for {}: {}", self.dir.display(), e);
                return UploadOutcome::failed(
                    OutcomeKind::Packaging,
                    format!("failed to build coverage archive: {e}"),
                );
            }
        };

        match self.write_archive(&archive) {
            Ok(path) => {
                debug!("Wrote coverage archive {}", path.display());
                UploadOutcome::delivered(format!("written to {}", path.display()))
            }
            Err(e) => {
                error!("Failed to write coverage archive to {}: {}", self.dir.display(), e);
                UploadOutcome::failed(
                    OutcomeKind::Storage,
                    format!("cannot write to {}: {e}", self.dir.display()),
                )
            }
        }
    }
}

#[async_trait]
impl UploadTarget for DirectoryTarget {
    async fn upload(&self, snapshot: &CoverageSnapshot) -> UploadOutcome {
        let started = Instant::now();
        let outcome = self.try_upload(snapshot);
        obs::emit_upload_finished(
            &self.describe(),
            started.elapsed().as_millis() as u64,
            &outcome,
        );
        outcome
    }

    fn describe(&self) -> String {
        format!("Saving to {} ({})", self.dir.display(), self.commit)
    }

    fn mark_for_retry(&self, coverage_file: &Path) {
        let mut marker = coverage_file.as_os_str().to_owned();
        marker.push(".");
        marker.push(RETRY_MARKER_SUFFIX);
        let marker = PathBuf::from(marker);

        match std::fs::write(&marker, self.describe()) {
            Ok(()) => info!(
                "Marked {} for upload retry to {}",
                coverage_file.display(),
                self.dir.display()
            ),
            Err(e) => error!(
                "Failed to mark {} for upload retry: {}",
                coverage_file.display(),
                e
            ),
        }
    }
}

/// Builds [`DirectoryTarget`]s below one root directory.
pub struct DirectoryTargetFactory {
    root: PathBuf,
    packager: ArchivePackager,
}

impl DirectoryTargetFactory {
    pub fn new(root: impl Into<PathBuf>, auxiliary_files: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            packager: ArchivePackager::new(auxiliary_files),
        }
    }
}

impl TargetFactory for DirectoryTargetFactory {
    fn build(&self, commit: &CommitDescriptor, application: &Application) -> Arc<dyn UploadTarget> {
        Arc::new(DirectoryTarget::new(
            &self.root,
            application,
            commit.clone(),
            self.packager.clone(),
        ))
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_archive_into_application_directory() {
        let root = tempdir().unwrap();
        let target = DirectoryTarget::new(
            root.path(),
            &Application::new("com.example.shop.Main"),
            CommitDescriptor::new("feature/login", 42),
            ArchivePackager::default(),
        );

        let outcome = target.upload(&CoverageSnapshot::new(b"<report/>".to_vec())).await;
        assert!(outcome.success, "{}", outcome.diagnostic);

        let files: Vec<_> = std::fs::read_dir(target.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        let written_at = files[0]
            .strip_prefix("feature_login-42-")
            .and_then(|rest| rest.strip_suffix(".zip"))
            .unwrap();
        assert!(written_at.parse::<i64>().unwrap() > 1_700_000_000_000);
    }

    #[tokio::test]
    async fn unwritable_directory_is_storage_failure() {
        let root = tempdir().unwrap();
        let blocker = root.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let target = DirectoryTarget::new(
            &blocker,
            &Application::new("app"),
            CommitDescriptor::new("main", 1),
            ArchivePackager::default(),
        );

        let outcome = target.upload(&CoverageSnapshot::new(b"<report/>".to_vec())).await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, OutcomeKind::Storage);
        assert!(outcome.diagnostic.contains("cannot write to"));
    }

    #[test]
    fn mark_for_retry_writes_marker_next_to_coverage_file() {
        let dir = tempdir().unwrap();
        let coverage = dir.path().join("coverage-1.xml");
        std::fs::write(&coverage, b"<report/>").unwrap();

        let target = DirectoryTarget::new(
            dir.path().join("out"),
            &Application::new("app"),
            CommitDescriptor::new("main", 1),
            ArchivePackager::default(),
        );
        target.mark_for_retry(&coverage);

        let marker = dir.path().join("coverage-1.xml.retry");
        let content = std::fs::read_to_string(marker).unwrap();
        assert!(content.contains("main:1"));
        assert!(coverage.exists());
    }
}
