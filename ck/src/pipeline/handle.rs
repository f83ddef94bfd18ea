//! KernelHandle - client interface to the pipeline controller

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use super::messages::KernelRequest;
use super::state::PipelineState;
use crate::domain::{ExportFormat, Parameters, SourceFile};
use crate::error::KernelError;
use crate::events::{KernelEvent, Reporter};

/// Cloneable handle for driving the kernel
///
/// Requests return as soon as they are queued. Results arrive as
/// [`KernelEvent`]s on [`KernelHandle::subscribe`].
#[derive(Clone)]
pub struct KernelHandle {
    tx: mpsc::Sender<KernelRequest>,
    state: watch::Receiver<PipelineState>,
    reporter: Reporter,
}

impl KernelHandle {
    pub(crate) fn new(tx: mpsc::Sender<KernelRequest>, state: watch::Receiver<PipelineState>, reporter: Reporter) -> Self {
        debug!("KernelHandle::new: called");
        Self { tx, state, reporter }
    }

    async fn send(&self, request: KernelRequest) -> Result<(), KernelError> {
        debug!(request = request.name(), "KernelHandle::send: called");
        self.tx.send(request).await.map_err(|_| KernelError::ControllerClosed)
    }

    /// Create (or recreate) every configured engine
    pub async fn initialize(&self) -> Result<(), KernelError> {
        self.send(KernelRequest::Initialize).await
    }

    /// Compute `file` with `overrides` applied on top of the engine's defaults
    pub async fn compute(&self, file: SourceFile, overrides: Parameters) -> Result<(), KernelError> {
        debug!(filename = %file.filename, overrides = overrides.len(), "KernelHandle::compute: called");
        self.send(KernelRequest::Compute { file, overrides }).await
    }

    /// Export the most recent geometry in `format`
    pub async fn export(&self, format: ExportFormat) -> Result<(), KernelError> {
        debug!(%format, "KernelHandle::export: called");
        self.send(KernelRequest::Export { format }).await
    }

    /// Destroy all engines and wait for the controller to stop
    pub async fn shutdown(&self) -> Result<(), KernelError> {
        debug!("KernelHandle::shutdown: called");
        let (reply, reply_rx) = oneshot::channel();
        self.send(KernelRequest::Shutdown { reply }).await?;
        reply_rx.await.map_err(|_| KernelError::ControllerClosed)
    }

    /// Subscribe to outbound events
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.reporter.subscribe()
    }

    /// Latest controller state
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Wait until the controller reaches `target`
    pub async fn wait_for_state(&self, target: PipelineState) -> Result<(), KernelError> {
        debug!(%target, "KernelHandle::wait_for_state: called");
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| KernelError::ControllerClosed)
    }

    /// Check if the controller has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
