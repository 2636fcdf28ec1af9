//! Value types shared by the locator, the registry and the upload targets.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One logical deployable unit whose coverage is routed independently.
///
/// Identified by its marker: the symbol that becomes observable once the
/// unit has started running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Application {
    marker: String,
}

impl Application {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marker)
    }
}

/// Version-control identity read from a deployed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitDescriptor {
    pub branch: String,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_millis: i64,
}

impl CommitDescriptor {
    pub fn new(branch: impl Into<String>, timestamp_millis: i64) -> Self {
        Self {
            branch: branch.into(),
            timestamp_millis,
        }
    }
}

/// Renders as `branch:timestamp`, the form expected by the upload endpoint.
impl fmt::Display for CommitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.branch, self.timestamp_millis)
    }
}

/// One flush-worth of coverage handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSnapshot {
    report: Vec<u8>,
    source_file: Option<PathBuf>,
}

impl CoverageSnapshot {
    /// Snapshot that exists only in memory.
    pub fn new(report: impl Into<Vec<u8>>) -> Self {
        Self {
            report: report.into(),
            source_file: None,
        }
    }

    /// Snapshot backed by the local coverage file it was read from.
    ///
    /// That file is removed after a fully successful dispatch and kept
    /// otherwise.
    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    pub fn report(&self) -> &[u8] {
        &self.report
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }
}

/// Classification of a single upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Delivered,
    /// The server answered with a non-success status.
    Rejected,
    /// Network or I/O fault while talking to the server.
    Network,
    /// The destination is misconfigured (bad URL, client setup failure).
    Configuration,
    /// The archive could not be built.
    Packaging,
    /// The archive could not be written to local storage.
    Storage,
}

/// Result of one upload attempt. Always returned, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub diagnostic: String,
    pub kind: OutcomeKind,
}

impl UploadOutcome {
    pub fn delivered(diagnostic: impl Into<String>) -> Self {
        Self {
            success: true,
            diagnostic: diagnostic.into(),
            kind: OutcomeKind::Delivered,
        }
    }

    pub fn failed(kind: OutcomeKind, diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: diagnostic.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_descriptor_displays_as_branch_and_millis() {
        let commit = CommitDescriptor::new("release/1.0", 1_709_287_200_000);
        assert_eq!(commit.to_string(), "release/1.0:1709287200000");
    }

    #[test]
    fn snapshot_source_file_is_optional() {
        let snapshot = CoverageSnapshot::new(b"<report/>".to_vec());
        assert!(snapshot.source_file().is_none());

        let snapshot = snapshot.with_source_file("/tmp/coverage.xml");
        assert_eq!(
            snapshot.source_file(),
            Some(Path::new("/tmp/coverage.xml"))
        );
        assert_eq!(snapshot.report(), b"<report/>");
    }

    #[test]
    fn failed_outcome_is_not_success() {
        let outcome = UploadOutcome::failed(OutcomeKind::Network, "connection reset");
        assert!(!outcome.success);
        assert_eq!(outcome.kind, OutcomeKind::Network);
    }
}
