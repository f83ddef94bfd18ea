//! EngineStub - message-passing proxy to an isolated engine
//!
//! Each engine lives on its own task and is driven through an mpsc queue of
//! [`EngineCommand`]s, one oneshot reply per command. A panic inside the engine
//! is caught and returned as [`EngineError::Internal`]; a vanished actor reads
//! as [`EngineError::Unreachable`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::error::EngineError;
use super::traits::{Engine, EngineContext, EngineResult};
use crate::domain::{EngineKind, ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile};

/// Default queue depth for an engine actor
pub const DEFAULT_ENGINE_BUFFER: usize = 16;

type Reply<T> = oneshot::Sender<EngineResult<T>>;

/// Commands understood by an engine actor
pub enum EngineCommand {
    Initialize {
        ctx: EngineContext,
        reply: Reply<()>,
    },
    CanHandle {
        file: SourceFile,
        reply: Reply<bool>,
    },
    ExtractParameters {
        file: SourceFile,
        reply: Reply<ExtractedParameters>,
    },
    ComputeGeometry {
        file: SourceFile,
        parameters: Parameters,
        reply: Reply<Vec<Geometry>>,
    },
    SupportedExportFormats {
        reply: Reply<Vec<ExportFormat>>,
    },
    ExportGeometry {
        format: ExportFormat,
        reply: Reply<Vec<ExportedBlob>>,
    },
    /// Release resources; the actor stops after replying
    Cleanup {
        reply: Reply<()>,
    },
}

impl EngineCommand {
    fn name(&self) -> &'static str {
        match self {
            EngineCommand::Initialize { .. } => "initialize",
            EngineCommand::CanHandle { .. } => "can_handle",
            EngineCommand::ExtractParameters { .. } => "extract_parameters",
            EngineCommand::ComputeGeometry { .. } => "compute_geometry",
            EngineCommand::SupportedExportFormats { .. } => "supported_export_formats",
            EngineCommand::ExportGeometry { .. } => "export_geometry",
            EngineCommand::Cleanup { .. } => "cleanup",
        }
    }
}

/// Handle for calling an engine that runs on its own task
#[derive(Clone)]
pub struct EngineStub {
    kind: EngineKind,
    tx: mpsc::Sender<EngineCommand>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for EngineStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineStub")
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Move `engine` onto its own task and return the stub that drives it
pub fn spawn_engine(
    kind: EngineKind,
    engine: Box<dyn Engine>,
    buffer: usize,
    timeout: Option<Duration>,
) -> (EngineStub, JoinHandle<()>) {
    debug!(%kind, buffer, ?timeout, "spawn_engine: called");
    let (tx, rx) = mpsc::channel(buffer);
    let handle = tokio::spawn(run_actor(kind, engine, rx));
    (EngineStub { kind, tx, timeout }, handle)
}

impl EngineStub {
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Check if the actor has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> EngineCommand) -> EngineResult<T> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::Unreachable)?;

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(result) => result.map_err(|_| EngineError::Unreachable)?,
                Err(_) => {
                    error!(kind = %self.kind, ?limit, "Engine call timed out");
                    Err(EngineError::Timeout(limit))
                }
            },
            None => reply_rx.await.map_err(|_| EngineError::Unreachable)?,
        }
    }

    pub async fn initialize(&self, ctx: EngineContext) -> EngineResult<()> {
        debug!(kind = %self.kind, "EngineStub::initialize: called");
        self.call(|reply| EngineCommand::Initialize { ctx, reply }).await
    }

    pub async fn can_handle(&self, file: &SourceFile) -> EngineResult<bool> {
        debug!(kind = %self.kind, filename = %file.filename, "EngineStub::can_handle: called");
        let file = file.clone();
        self.call(|reply| EngineCommand::CanHandle { file, reply }).await
    }

    pub async fn extract_parameters(&self, file: &SourceFile) -> EngineResult<ExtractedParameters> {
        debug!(kind = %self.kind, filename = %file.filename, "EngineStub::extract_parameters: called");
        let file = file.clone();
        self.call(|reply| EngineCommand::ExtractParameters { file, reply })
            .await
    }

    pub async fn compute_geometry(&self, file: &SourceFile, parameters: &Parameters) -> EngineResult<Vec<Geometry>> {
        debug!(kind = %self.kind, filename = %file.filename, "EngineStub::compute_geometry: called");
        let file = file.clone();
        let parameters = parameters.clone();
        self.call(|reply| EngineCommand::ComputeGeometry {
            file,
            parameters,
            reply,
        })
        .await
    }

    pub async fn supported_export_formats(&self) -> EngineResult<Vec<ExportFormat>> {
        debug!(kind = %self.kind, "EngineStub::supported_export_formats: called");
        self.call(|reply| EngineCommand::SupportedExportFormats { reply })
            .await
    }

    pub async fn export_geometry(&self, format: ExportFormat) -> EngineResult<Vec<ExportedBlob>> {
        debug!(kind = %self.kind, %format, "EngineStub::export_geometry: called");
        self.call(|reply| EngineCommand::ExportGeometry { format, reply })
            .await
    }

    pub async fn cleanup(&self) -> EngineResult<()> {
        debug!(kind = %self.kind, "EngineStub::cleanup: called");
        self.call(|reply| EngineCommand::Cleanup { reply }).await
    }
}

/// Actor loop: owns the engine, serves one command at a time
async fn run_actor(kind: EngineKind, mut engine: Box<dyn Engine>, mut rx: mpsc::Receiver<EngineCommand>) {
    info!(%kind, "Engine actor started");

    while let Some(command) = rx.recv().await {
        debug!(%kind, command = command.name(), "Engine actor: received command");
        match command {
            EngineCommand::Initialize { ctx, reply } => {
                let _ = reply.send(guarded(kind, engine.initialize(ctx)).await);
            }
            EngineCommand::CanHandle { file, reply } => {
                let _ = reply.send(guarded(kind, engine.can_handle(&file)).await);
            }
            EngineCommand::ExtractParameters { file, reply } => {
                let _ = reply.send(guarded(kind, engine.extract_parameters(&file)).await);
            }
            EngineCommand::ComputeGeometry {
                file,
                parameters,
                reply,
            } => {
                let _ = reply.send(guarded(kind, engine.compute_geometry(&file, &parameters)).await);
            }
            EngineCommand::SupportedExportFormats { reply } => {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| engine.supported_export_formats()))
                    .map_err(|panic| panicked(kind, panic.as_ref()));
                let _ = reply.send(result);
            }
            EngineCommand::ExportGeometry { format, reply } => {
                let _ = reply.send(guarded(kind, engine.export_geometry(format)).await);
            }
            EngineCommand::Cleanup { reply } => {
                let _ = reply.send(guarded(kind, engine.cleanup()).await);
                break;
            }
        }
    }

    info!(%kind, "Engine actor stopped");
}

/// Await an engine future, turning a panic into `EngineError::Internal`
async fn guarded<T>(kind: EngineKind, fut: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(panicked(kind, panic.as_ref())),
    }
}

fn panicked(kind: EngineKind, panic: &(dyn Any + Send)) -> EngineError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!(%kind, %message, "Engine panicked");
    EngineError::Internal(format!("engine panicked: {message}"))
}
