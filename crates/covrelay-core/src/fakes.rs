//! In-memory doubles for targets and transports (testing only)
//!
//! `RecordingTarget` and `FailingTarget` stand in for upload destinations;
//! `RecordingTransport` replaces the HTTP client behind `HttpUploadTarget`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CommitDescriptor, CoverageSnapshot, OutcomeKind, UploadOutcome};
use crate::error::TransportError;
use crate::target::UploadTarget;
use crate::transport::{ArchiveUpload, Transport, TransportResponse};

// ---------------------------------------------------------------------------
// RecordingTarget
// ---------------------------------------------------------------------------

/// Target that accepts every upload and remembers the reports it received.
#[derive(Debug)]
pub struct RecordingTarget {
    name: String,
    commit: Option<CommitDescriptor>,
    received: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Target remembering the commit it was built for.
    pub fn for_commit(name: impl Into<String>, commit: CommitDescriptor) -> Self {
        Self {
            commit: Some(commit),
            ..Self::new(name)
        }
    }

    pub fn commit(&self) -> Option<&CommitDescriptor> {
        self.commit.as_ref()
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl UploadTarget for RecordingTarget {
    async fn upload(&self, snapshot: &CoverageSnapshot) -> UploadOutcome {
        self.received
            .lock()
            .unwrap()
            .push(snapshot.report().to_vec());
        UploadOutcome::delivered(format!("recorded by {}", self.name))
    }

    fn describe(&self) -> String {
        format!("Recording into {}", self.name)
    }
}

// ---------------------------------------------------------------------------
// FailingTarget
// ---------------------------------------------------------------------------

/// Target whose uploads always fail; records attempts and retry marks.
#[derive(Debug)]
pub struct FailingTarget {
    kind: OutcomeKind,
    attempts: Mutex<usize>,
    retry_marks: Mutex<Vec<PathBuf>>,
}

impl FailingTarget {
    pub fn new(kind: OutcomeKind) -> Self {
        Self {
            kind,
            attempts: Mutex::new(0),
            retry_marks: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn retry_marks(&self) -> Vec<PathBuf> {
        self.retry_marks.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTarget for FailingTarget {
    async fn upload(&self, _snapshot: &CoverageSnapshot) -> UploadOutcome {
        *self.attempts.lock().unwrap() += 1;
        UploadOutcome::failed(self.kind, "simulated failure")
    }

    fn describe(&self) -> String {
        "Always failing".to_string()
    }

    fn mark_for_retry(&self, coverage_file: &Path) {
        self.retry_marks
            .lock()
            .unwrap()
            .push(coverage_file.to_path_buf());
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Request captured by [`RecordingTransport`]: the URL plus the file part a
/// real transport would put into the multipart form.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub url: String,
    pub file_name: String,
    pub archive: Vec<u8>,
}

/// Transport returning a canned response or error.
#[derive(Debug)]
pub struct RecordingTransport {
    reply: Result<TransportResponse, TransportError>,
    requests: Mutex<Vec<SentRequest>>,
}

impl RecordingTransport {
    pub fn responding(status: u16, body: impl Into<String>) -> Self {
        Self {
            reply: Ok(TransportResponse {
                status,
                body: body.into(),
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: TransportError) -> Self {
        Self {
            reply: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        url: &str,
        upload: ArchiveUpload,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(SentRequest {
            url: url.to_string(),
            file_name: upload.file_name,
            archive: upload.bytes,
        });
        self.reply.clone()
    }
}
