//! Structured lifecycle events for resolution, dispatch and upload.
//!
//! Every event carries a stable `event` field so log pipelines can filter on
//! it independently of the human readable message.

use tracing::{info, warn, Span};

use crate::domain::{Application, CommitDescriptor, UploadOutcome};

/// Span covering one dispatch.
///
/// Dispatch runs across `.await` points, so callers attach it with
/// `tracing::Instrument` rather than entering it.
pub fn dispatch_span(targets: usize) -> Span {
    tracing::info_span!("covrelay.dispatch", dispatch_targets = targets)
}

/// Emit event: an application got its upload target.
pub fn emit_commit_resolved(application: &Application, commit: &CommitDescriptor) {
    info!(
        event = "commit.resolved",
        application = %application,
        commit = %commit,
        "Found commit for {}: {}", application, commit
    );
}

/// Emit event: a later commit for an already resolved application was dropped.
pub fn emit_commit_ignored(application: &Application, commit: &CommitDescriptor) {
    info!(
        event = "commit.ignored",
        application = %application,
        commit = %commit,
        "Ignoring commit {} for {}: a target is already resolved", commit, application
    );
}

pub fn emit_dispatch_started(targets: usize, report_bytes: usize) {
    info!(event = "dispatch.started", targets = targets, report_bytes = report_bytes);
}

pub fn emit_dispatch_finished(attempted: usize, failed: usize) {
    if failed == 0 {
        info!(event = "dispatch.finished", attempted = attempted, failed = failed);
    } else {
        warn!(event = "dispatch.finished", attempted = attempted, failed = failed);
    }
}

/// Emit event: one upload attempt ended, with its duration.
pub fn emit_upload_finished(target: &str, duration_ms: u64, outcome: &UploadOutcome) {
    info!(
        event = "upload.finished",
        target = %target,
        duration_ms = duration_ms,
        success = outcome.success,
        kind = ?outcome.kind,
    );
}

/// Emit event: the shutdown flush ran (`performed`) or was skipped.
pub fn emit_shutdown_flush(performed: bool) {
    info!(event = "shutdown.flush", performed = performed);
}
