//! Final coverage flush on process termination.
//!
//! The hook performs at most one flush no matter how often it is triggered.
//! The flush is an ordinary [`DelayedUploadRegistry::dispatch`], so it may
//! overlap with a dispatch that is already running.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::CoverageSnapshot;
use crate::obs;
use crate::registry::DelayedUploadRegistry;

/// Produces the most recent coverage at flush time, if any.
pub type SnapshotSource = Box<dyn Fn() -> Option<CoverageSnapshot> + Send + Sync>;

pub struct ShutdownFlushHook {
    registry: Arc<DelayedUploadRegistry>,
    source: SnapshotSource,
    flushed: AtomicBool,
}

impl ShutdownFlushHook {
    pub fn new<S>(registry: Arc<DelayedUploadRegistry>, source: S) -> Self
    where
        S: Fn() -> Option<CoverageSnapshot> + Send + Sync + 'static,
    {
        Self {
            registry,
            source: Box::new(source),
            flushed: AtomicBool::new(false),
        }
    }

    /// Run the final flush. Returns `false` if it already ran.
    pub async fn flush(&self) -> bool {
        if self.flushed.swap(true, Ordering::SeqCst) {
            obs::emit_shutdown_flush(false);
            return false;
        }

        match (self.source)() {
            Some(snapshot) => self.registry.dispatch(snapshot).await,
            None => info!("No coverage available for the final flush"),
        }
        obs::emit_shutdown_flush(true);
        true
    }

    pub fn has_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }
}

/// A registered hook and the task waiting for its trigger.
pub struct ShutdownRegistration {
    hook: Arc<ShutdownFlushHook>,
    task: JoinHandle<()>,
}

impl ShutdownRegistration {
    pub(crate) fn spawn<T>(hook: Arc<ShutdownFlushHook>, trigger: T) -> Self
    where
        T: Future<Output = ()> + Send + 'static,
    {
        let waiting = Arc::clone(&hook);
        let task = tokio::spawn(async move {
            trigger.await;
            info!("Shutdown requested, flushing coverage");
            waiting.flush().await;
        });
        Self { hook, task }
    }

    pub fn hook(&self) -> &Arc<ShutdownFlushHook> {
        &self.hook
    }

    /// Wait until the trigger fired and the flush finished.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!("Shutdown flush task failed: {}", e);
        }
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Application, CommitDescriptor};
    use crate::fakes::RecordingTarget;
    use crate::target::UploadTarget;

    fn registry_with(target: Arc<RecordingTarget>) -> Arc<DelayedUploadRegistry> {
        let registry = Arc::new(DelayedUploadRegistry::from_fn(move |_, _| {
            Arc::clone(&target) as Arc<dyn UploadTarget>
        }));
        registry.resolve(Application::new("app"), CommitDescriptor::new("main", 1));
        registry
    }

    #[tokio::test]
    async fn flush_runs_only_once() {
        let target = Arc::new(RecordingTarget::new("final"));
        let hook = ShutdownFlushHook::new(registry_with(Arc::clone(&target)), || {
            Some(CoverageSnapshot::new(b"<last/>".to_vec()))
        });

        assert!(hook.flush().await);
        assert!(!hook.flush().await);
        assert!(hook.has_flushed());
        assert_eq!(target.received(), vec![b"<last/>".to_vec()]);
    }

    #[tokio::test]
    async fn flush_without_coverage_uploads_nothing() {
        let target = Arc::new(RecordingTarget::new("final"));
        let hook = ShutdownFlushHook::new(registry_with(Arc::clone(&target)), || None);

        assert!(hook.flush().await);
        assert_eq!(target.upload_count(), 0);
    }
}
