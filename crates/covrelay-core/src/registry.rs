//! Delayed multi-target upload registry.
//!
//! Maps each [`Application`] to the [`UploadTarget`] built once its commit is
//! known. Whenever coverage is dispatched it goes to every application that
//! has a target at that moment; applications still waiting for their commit
//! are skipped.
//!
//! Skipping is safe as long as the marker is the application's entry point:
//! before the marker is observed there is no relevant coverage for that
//! application.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use tracing::{debug, warn, Instrument};

use crate::domain::{Application, CommitDescriptor, CoverageSnapshot, UploadOutcome};
use crate::obs;
use crate::shutdown::{self, ShutdownFlushHook, ShutdownRegistration};
use crate::target::{FnTargetFactory, TargetFactory, UploadTarget};

pub struct DelayedUploadRegistry {
    factory: Box<dyn TargetFactory>,
    targets: RwLock<HashMap<Application, Arc<dyn UploadTarget>>>,
    shutdown_registered: AtomicBool,
}

impl DelayedUploadRegistry {
    pub fn new(factory: impl TargetFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            targets: RwLock::new(HashMap::new()),
            shutdown_registered: AtomicBool::new(false),
        }
    }

    /// Registry building targets with a closure.
    pub fn from_fn<F>(factory: F) -> Self
    where
        F: Fn(&CommitDescriptor, &Application) -> Arc<dyn UploadTarget> + Send + Sync + 'static,
    {
        Self::new(FnTargetFactory(factory))
    }

    /// Associate `application` with a target for `commit`.
    ///
    /// The first resolution wins: if the application already has a target the
    /// new commit is ignored and `false` is returned. Check and insert happen
    /// under one write lock.
    pub fn resolve(&self, application: Application, commit: CommitDescriptor) -> bool {
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        match targets.entry(application) {
            Entry::Occupied(entry) => {
                obs::emit_commit_ignored(entry.key(), &commit);
                false
            }
            Entry::Vacant(entry) => {
                let target = self.factory.build(&commit, entry.key());
                obs::emit_commit_resolved(entry.key(), &commit);
                entry.insert(target);
                true
            }
        }
    }

    pub fn is_resolved(&self, application: &Application) -> bool {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(application)
    }

    pub fn resolved_applications(&self) -> Vec<Application> {
        let mut applications: Vec<_> = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        applications.sort();
        applications
    }

    /// Current (application, target) pairs; the lock is released on return.
    fn snapshot_targets(&self) -> Vec<(Application, Arc<dyn UploadTarget>)> {
        let mut pairs: Vec<_> = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(application, target)| (application.clone(), Arc::clone(target)))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Upload `snapshot` to every currently resolved application.
    ///
    /// Never waits for unresolved applications and never fails: individual
    /// failures are logged, and failed targets get a chance to mark the
    /// snapshot's local file for retry. That file is deleted only when every
    /// attempted upload succeeded.
    pub async fn dispatch(&self, snapshot: CoverageSnapshot) {
        let targets = self.snapshot_targets();
        if targets.is_empty() {
            debug!("No application has a commit yet, skipping coverage upload");
            return;
        }

        let span = obs::dispatch_span(targets.len());
        self.fan_out(&targets, &snapshot).instrument(span).await;
    }

    async fn fan_out(
        &self,
        targets: &[(Application, Arc<dyn UploadTarget>)],
        snapshot: &CoverageSnapshot,
    ) {
        obs::emit_dispatch_started(targets.len(), snapshot.report().len());

        let outcomes: Vec<UploadOutcome> = join_all(
            targets
                .iter()
                .map(|(_, target)| target.upload(snapshot)),
        )
        .await;

        let mut failed = 0;
        for ((application, target), outcome) in targets.iter().zip(&outcomes) {
            if outcome.success {
                debug!("Coverage for {} delivered: {}", application, outcome.diagnostic);
                continue;
            }
            failed += 1;
            warn!(
                "Upload for {} failed ({}): {}",
                application,
                target.describe(),
                outcome.diagnostic
            );
            if let Some(file) = snapshot.source_file() {
                target.mark_for_retry(file);
            }
        }

        if failed == 0 {
            if let Some(file) = snapshot.source_file() {
                if let Err(e) = std::fs::remove_file(file) {
                    warn!("Failed to delete uploaded coverage file {}: {}", file.display(), e);
                }
            }
        } else if let Some(file) = snapshot.source_file() {
            warn!("Keeping {} after failed upload", file.display());
        }

        obs::emit_dispatch_finished(outcomes.len(), failed);
    }

    /// Register the final flush on process termination (SIGINT, SIGTERM).
    ///
    /// Only the first call per registry registers a hook; later calls return
    /// `None`.
    pub fn register_shutdown_flush<S>(self: &Arc<Self>, source: S) -> Option<ShutdownRegistration>
    where
        S: Fn() -> Option<CoverageSnapshot> + Send + Sync + 'static,
    {
        self.register_shutdown_flush_on(source, shutdown::shutdown_signal())
    }

    /// Like [`Self::register_shutdown_flush`], triggered by `trigger`.
    pub fn register_shutdown_flush_on<S, T>(
        self: &Arc<Self>,
        source: S,
        trigger: T,
    ) -> Option<ShutdownRegistration>
    where
        S: Fn() -> Option<CoverageSnapshot> + Send + Sync + 'static,
        T: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown_registered.swap(true, Ordering::SeqCst) {
            warn!("Shutdown flush already registered for this registry");
            return None;
        }
        let hook = Arc::new(ShutdownFlushHook::new(Arc::clone(self), source));
        Some(ShutdownRegistration::spawn(hook, trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutcomeKind;
    use crate::fakes::{FailingTarget, RecordingTarget};
    use std::sync::Mutex;

    fn recording_registry() -> (DelayedUploadRegistry, Arc<Mutex<Vec<Arc<RecordingTarget>>>>) {
        let built = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&built);
        let registry = DelayedUploadRegistry::from_fn(move |commit, application| {
            let target = Arc::new(RecordingTarget::for_commit(
                application.marker(),
                commit.clone(),
            ));
            sink.lock().unwrap().push(Arc::clone(&target));
            target as Arc<dyn UploadTarget>
        });
        (registry, built)
    }

    #[tokio::test]
    async fn dispatch_without_resolved_applications_uploads_nothing() {
        let (registry, built) = recording_registry();
        registry.dispatch(CoverageSnapshot::new(b"<report/>".to_vec())).await;
        assert!(built.lock().unwrap().is_empty());
        assert!(registry.resolved_applications().is_empty());
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let (registry, built) = recording_registry();
        let app = Application::new("com.example.A");

        assert!(registry.resolve(app.clone(), CommitDescriptor::new("main", 1)));
        assert!(!registry.resolve(app.clone(), CommitDescriptor::new("hotfix", 2)));

        registry.dispatch(CoverageSnapshot::new(b"<report/>".to_vec())).await;

        let built = built.lock().unwrap();
        assert_eq!(built.len(), 1, "second commit must not build a target");
        assert_eq!(built[0].commit(), Some(&CommitDescriptor::new("main", 1)));
        assert_eq!(built[0].upload_count(), 1);
    }

    #[tokio::test]
    async fn failed_target_marks_retry_and_keeps_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let coverage = dir.path().join("coverage.xml");
        std::fs::write(&coverage, b"<report/>").unwrap();

        let failing = Arc::new(FailingTarget::new(OutcomeKind::Network));
        let handle = Arc::clone(&failing);
        let registry = DelayedUploadRegistry::from_fn(move |_, _| {
            Arc::clone(&handle) as Arc<dyn UploadTarget>
        });
        registry.resolve(Application::new("app"), CommitDescriptor::new("main", 1));

        registry
            .dispatch(CoverageSnapshot::new(b"<report/>".to_vec()).with_source_file(&coverage))
            .await;

        assert_eq!(failing.attempts(), 1);
        assert_eq!(failing.retry_marks(), vec![coverage.clone()]);
        assert!(coverage.exists());
    }

    #[tokio::test]
    async fn successful_dispatch_deletes_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let coverage = dir.path().join("coverage.xml");
        std::fs::write(&coverage, b"<report/>").unwrap();

        let (registry, _built) = recording_registry();
        registry.resolve(Application::new("app"), CommitDescriptor::new("main", 1));
        registry
            .dispatch(CoverageSnapshot::new(b"<report/>".to_vec()).with_source_file(&coverage))
            .await;

        assert!(!coverage.exists());
    }

    #[tokio::test]
    async fn unresolved_dispatch_keeps_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let coverage = dir.path().join("coverage.xml");
        std::fs::write(&coverage, b"<report/>").unwrap();

        let (registry, _built) = recording_registry();
        registry
            .dispatch(CoverageSnapshot::new(b"<report/>".to_vec()).with_source_file(&coverage))
            .await;

        assert!(coverage.exists());
    }

    #[test]
    fn resolved_applications_are_sorted() {
        let (registry, _built) = recording_registry();
        registry.resolve(Application::new("b"), CommitDescriptor::new("main", 1));
        registry.resolve(Application::new("a"), CommitDescriptor::new("main", 1));
        assert_eq!(
            registry.resolved_applications(),
            vec![Application::new("a"), Application::new("b")]
        );
        assert!(registry.is_resolved(&Application::new("a")));
        assert!(!registry.is_resolved(&Application::new("c")));
    }
}
