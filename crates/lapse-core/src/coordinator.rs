//! Runs encode jobs against the active backend, one at a time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::{error, info};

use crate::encode::{EncodeBackend, EncodeError, EncodeJob, OutputKind};

/// Progress of the most recent encode job
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EncodeStatus {
    #[default]
    Idle,
    Processing,
    Complete { path: PathBuf },
    Failed { message: String },
}

struct Inner {
    backend: RwLock<Arc<dyn EncodeBackend>>,
    busy: AtomicBool,
    status_tx: watch::Sender<EncodeStatus>,
}

/// Clears the busy flag when dropped, including when the job future is
/// cancelled.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, EncodeError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EncodeError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct EncodeCoordinator {
    inner: Arc<Inner>,
}

impl EncodeCoordinator {
    pub fn new(backend: Arc<dyn EncodeBackend>) -> Self {
        let (status_tx, _) = watch::channel(EncodeStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                backend: RwLock::new(backend),
                busy: AtomicBool::new(false),
                status_tx,
            }),
        }
    }

    fn backend(&self) -> Arc<dyn EncodeBackend> {
        self.inner
            .backend
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend().name()
    }

    pub fn supported_kinds(&self) -> Vec<OutputKind> {
        self.backend().supported_kinds()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn status(&self) -> EncodeStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EncodeStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Replace the active backend. Refused while a job is running.
    pub fn set_backend(&self, backend: Arc<dyn EncodeBackend>) -> Result<(), EncodeError> {
        let _guard = BusyGuard::acquire(&self.inner.busy)?;
        info!("switching encode backend to {}", backend.name());
        *self
            .inner
            .backend
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = backend;
        Ok(())
    }

    /// Encode the frames in `input_dir` into `output_base` plus the kind's
    /// extension. Status is published on the watch channel; failures are
    /// also returned.
    pub async fn encode(
        &self,
        input_dir: impl Into<PathBuf>,
        output_base: impl Into<PathBuf>,
        kind: OutputKind,
        frame_rate: f64,
    ) -> Result<PathBuf, EncodeError> {
        let _guard = BusyGuard::acquire(&self.inner.busy)?;

        let backend = self.backend();
        if !backend.supports(kind) {
            return Err(EncodeError::UnsupportedKind {
                kind,
                backend: backend.name(),
            });
        }

        let job = EncodeJob {
            input_dir: input_dir.into(),
            output_base: output_base.into(),
            kind,
            frame_rate,
        };

        info!(
            "encoding {} into {} with {}",
            job.input_dir.display(),
            job.output_path().display(),
            backend.name()
        );
        self.inner.status_tx.send_replace(EncodeStatus::Processing);

        match backend.encode(&job).await {
            Ok(path) => {
                info!("encode complete: {}", path.display());
                self.inner
                    .status_tx
                    .send_replace(EncodeStatus::Complete { path: path.clone() });
                Ok(path)
            }
            Err(e) => {
                error!("encode failed: {}", e);
                self.inner.status_tx.send_replace(EncodeStatus::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
