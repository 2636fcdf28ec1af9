//! Discovery of commit metadata inside deployed artifacts.
//!
//! [`locate`] scans a zip-like artifact for a `git.properties` entry and
//! turns it into a [`CommitDescriptor`]. [`MetadataLocator`] runs those scans
//! on a dedicated background worker so coverage collection never waits on
//! artifact I/O.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use zip::ZipArchive;

use crate::domain::CommitDescriptor;
use crate::error::LocateError;
use crate::properties::Properties;

/// Base name of the metadata entry, matched case-insensitively.
pub const GIT_PROPERTIES_FILE_NAME: &str = "git.properties";

pub const BRANCH_KEY: &str = "git.branch";
pub const COMMIT_TIME_KEY: &str = "git.commit.time";

/// `yyyy-MM-dd'T'HH:mm:ssZ`, the format written by git-commit-id build plugins.
pub const GIT_PROPERTIES_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Read the commit descriptor from the artifact's `git.properties`.
///
/// Returns `Ok(None)` when no entry has the metadata file name. Only the
/// first matching entry is considered.
pub fn locate(artifact: &Path) -> Result<Option<CommitDescriptor>, LocateError> {
    let io_err = |source: std::io::Error| LocateError::Io {
        artifact: artifact.to_path_buf(),
        source,
    };

    let file = File::open(artifact).map_err(io_err)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| io_err(e.into()))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| io_err(e.into()))?;
        if entry.is_dir() || !is_git_properties(entry.name()) {
            continue;
        }

        let entry_name = entry.name().to_string();
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw).map_err(io_err)?;
        let properties = Properties::parse(&String::from_utf8_lossy(&raw));
        return parse_git_properties(&properties, &entry_name, artifact).map(Some);
    }

    Ok(None)
}

fn is_git_properties(entry_name: &str) -> bool {
    Path::new(entry_name)
        .file_name()
        .map(|name| {
            name.to_string_lossy()
                .eq_ignore_ascii_case(GIT_PROPERTIES_FILE_NAME)
        })
        .unwrap_or(false)
}

/// Build a descriptor from an already parsed property set.
pub fn parse_git_properties(
    properties: &Properties,
    entry_name: &str,
    artifact: &Path,
) -> Result<CommitDescriptor, LocateError> {
    let invalid = |reason: String| LocateError::InvalidMetadata {
        artifact: artifact.to_path_buf(),
        entry: entry_name.to_string(),
        reason,
    };

    let branch = properties.non_empty(BRANCH_KEY).ok_or_else(|| {
        invalid(format!(
            "no entry or empty value for '{BRANCH_KEY}'. Contents of {GIT_PROPERTIES_FILE_NAME}: {properties}"
        ))
    })?;
    let timestamp = properties.non_empty(COMMIT_TIME_KEY).ok_or_else(|| {
        invalid(format!(
            "no entry or empty value for '{COMMIT_TIME_KEY}'. Contents of {GIT_PROPERTIES_FILE_NAME}: {properties}"
        ))
    })?;

    let malformed = |detail: String| {
        invalid(format!(
            "{COMMIT_TIME_KEY} value '{timestamp}' is malformed: it cannot be parsed with the pattern {GIT_PROPERTIES_DATE_FORMAT} ({detail})"
        ))
    };
    if !has_commit_time_shape(timestamp) {
        return Err(malformed(
            "expected yyyy-MM-ddTHH:mm:ss followed by a [+-]HHmm offset".to_string(),
        ));
    }
    let parsed = DateTime::parse_from_str(timestamp, GIT_PROPERTIES_DATE_FORMAT)
        .map_err(|e| malformed(e.to_string()))?;

    Ok(CommitDescriptor::new(branch, parsed.timestamp_millis()))
}

/// Fixed-width `yyyy-MM-ddTHH:mm:ss+HHmm`. chrono's `%z` alone also takes
/// `+HH:MM` and single-digit fields.
fn has_commit_time_shape(timestamp: &str) -> bool {
    const SHAPE: &[u8] = b"dddd-dd-ddTdd:dd:dd_dddd";
    let bytes = timestamp.as_bytes();
    bytes.len() == SHAPE.len()
        && bytes.iter().zip(SHAPE).all(|(&b, &s)| match s {
            b'd' => b.is_ascii_digit(),
            b'_' => b == b'+' || b == b'-',
            _ => b == s,
        })
}

type OnFound = Box<dyn FnOnce(CommitDescriptor) + Send + 'static>;

struct ScanJob {
    artifact: PathBuf,
    on_found: OnFound,
}

/// Single-worker background queue for artifact scans.
///
/// Scans run one at a time in submission order. Dropping the locator (or
/// calling [`MetadataLocator::drain`]) lets the worker finish what is queued
/// and exit.
pub struct MetadataLocator {
    jobs: mpsc::UnboundedSender<ScanJob>,
    worker: JoinHandle<()>,
}

impl MetadataLocator {
    /// Start the worker on the current tokio runtime.
    pub fn spawn() -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx));
        Self { jobs, worker }
    }

    /// Queue a scan of `artifact`; `on_found` runs on the worker only if a
    /// descriptor is found.
    pub fn locate_async<F>(&self, artifact: impl Into<PathBuf>, on_found: F)
    where
        F: FnOnce(CommitDescriptor) + Send + 'static,
    {
        let job = ScanJob {
            artifact: artifact.into(),
            on_found: Box::new(on_found),
        };
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            error!(
                "Metadata locator worker is gone, dropping scan of {}",
                job.artifact.display()
            );
        }
    }

    /// Close the queue and wait until every queued scan has run.
    pub async fn drain(self) {
        let Self { jobs, worker } = self;
        drop(jobs);
        if let Err(e) = worker.await {
            error!("Metadata locator worker panicked: {}", e);
        }
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<ScanJob>) {
    while let Some(ScanJob { artifact, on_found }) = rx.recv().await {
        let scanned = artifact.clone();
        let result = match tokio::task::spawn_blocking(move || locate(&scanned)).await {
            Ok(result) => result,
            Err(e) => {
                error!("Scan of {} aborted: {}", artifact.display(), e);
                continue;
            }
        };

        match result {
            Ok(Some(commit)) => {
                debug!(
                    "Found git.properties file in {} and found commit descriptor {}",
                    artifact.display(),
                    commit
                );
                on_found(commit);
            }
            Ok(None) => debug!("No git.properties file found in {}", artifact.display()),
            Err(e) => error!(
                "Error during asynchronous search for git.properties in {}: {}",
                artifact.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(text: &str) -> Properties {
        Properties::parse(text)
    }

    #[test]
    fn matches_base_name_case_insensitively() {
        assert!(is_git_properties("META-INF/git.properties"));
        assert!(is_git_properties("BOOT-INF/classes/GIT.Properties"));
        assert!(is_git_properties("git.properties"));
        assert!(!is_git_properties("META-INF/git.properties.bak"));
        assert!(!is_git_properties("META-INF/"));
    }

    #[test]
    fn parses_timestamp_to_epoch_millis() {
        let commit = parse_git_properties(
            &props("git.branch=release/1.0\ngit.commit.time=2024-03-01T10:00:00+0000\n"),
            "git.properties",
            Path::new("app.jar"),
        )
        .unwrap();
        assert_eq!(commit, CommitDescriptor::new("release/1.0", 1_709_287_200_000));
    }

    #[test]
    fn honors_non_utc_offsets() {
        let commit = parse_git_properties(
            &props("git.branch=main\ngit.commit.time=2024-03-01T12:00:00+0200\n"),
            "git.properties",
            Path::new("app.jar"),
        )
        .unwrap();
        assert_eq!(commit.timestamp_millis, 1_709_287_200_000);
    }

    #[test]
    fn missing_branch_is_invalid_metadata() {
        let err = parse_git_properties(
            &props("git.commit.time=2024-03-01T10:00:00+0000\n"),
            "git.properties",
            Path::new("app.jar"),
        )
        .unwrap_err();
        assert!(matches!(err, LocateError::InvalidMetadata { .. }));
        assert!(err.to_string().contains(BRANCH_KEY));
    }

    #[test]
    fn empty_timestamp_is_invalid_metadata() {
        let err = parse_git_properties(
            &props("git.branch=main\ngit.commit.time=\n"),
            "git.properties",
            Path::new("app.jar"),
        )
        .unwrap_err();
        assert!(err.to_string().contains(COMMIT_TIME_KEY));
    }

    #[test]
    fn unparsable_timestamp_is_invalid_metadata() {
        let err = parse_git_properties(
            &props("git.branch=main\ngit.commit.time=01.03.2024 10:00\n"),
            "git.properties",
            Path::new("app.jar"),
        )
        .unwrap_err();
        assert!(matches!(err, LocateError::InvalidMetadata { .. }));
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn colon_separated_offset_is_invalid_metadata() {
        let err = parse_git_properties(
            &props("git.branch=main\ngit.commit.time=2024-03-01T10:00:00+00:00\n"),
            "git.properties",
            Path::new("app.jar"),
        )
        .unwrap_err();
        assert!(matches!(err, LocateError::InvalidMetadata { .. }));
    }

    #[test]
    fn surrounding_whitespace_in_timestamp_is_invalid_metadata() {
        for raw in ["2024-03-01T10:00:00+0000 ", "2024-03-01T10:00:00+0000\t"] {
            let text = format!("git.branch=main\ngit.commit.time={raw}\n");
            let err = parse_git_properties(&props(&text), "git.properties", Path::new("app.jar"))
                .unwrap_err();
            assert!(matches!(err, LocateError::InvalidMetadata { .. }), "{raw:?}");
        }
    }

    #[test]
    fn zulu_and_short_fields_are_rejected() {
        assert!(has_commit_time_shape("2024-03-01T10:00:00+0000"));
        assert!(has_commit_time_shape("2024-03-01T10:00:00-0530"));
        assert!(!has_commit_time_shape("2024-03-01T10:00:00Z"));
        assert!(!has_commit_time_shape("2024-3-01T10:00:00+0000"));
        assert!(!has_commit_time_shape("2024-03-01 10:00:00+0000"));
    }

    #[test]
    fn unreadable_artifact_is_io_error() {
        let err = locate(Path::new("/nonexistent/app.jar")).unwrap_err();
        assert!(matches!(err, LocateError::Io { .. }));
    }
}
