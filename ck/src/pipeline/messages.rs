//! Message types for the pipeline controller

use tokio::sync::oneshot;

use crate::domain::{EngineKind, ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile};
use crate::engine::EngineResult;
use crate::error::KernelError;

/// Requests consumed by the controller task
#[derive(Debug)]
pub enum KernelRequest {
    /// (Re)create every configured engine
    Initialize,

    /// Start a compute pass, superseding whatever is in flight
    Compute { file: SourceFile, overrides: Parameters },

    /// Start an export pass against the selected engine
    Export { format: ExportFormat },

    /// Destroy all engines and stop the controller
    Shutdown { reply: oneshot::Sender<()> },

    /// Result of a remote call started by pass `pass`
    StageCompleted { pass: u64, outcome: StageOutcome },
}

impl KernelRequest {
    pub fn name(&self) -> &'static str {
        match self {
            KernelRequest::Initialize => "initialize",
            KernelRequest::Compute { .. } => "compute",
            KernelRequest::Export { .. } => "export",
            KernelRequest::Shutdown { .. } => "shutdown",
            KernelRequest::StageCompleted { .. } => "stage-completed",
        }
    }
}

/// Outcome of one stage's remote call
#[derive(Debug)]
pub enum StageOutcome {
    EngineDetermined(Result<EngineKind, KernelError>),
    ParametersExtracted(EngineResult<ExtractedParameters>),
    GeometryEvaluated(EngineResult<Vec<Geometry>>),
    FormatsListed(EngineResult<Vec<ExportFormat>>),
    Exported(EngineResult<Vec<ExportedBlob>>),
}

impl StageOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            StageOutcome::EngineDetermined(_) => "engine-determined",
            StageOutcome::ParametersExtracted(_) => "parameters-extracted",
            StageOutcome::GeometryEvaluated(_) => "geometry-evaluated",
            StageOutcome::FormatsListed(_) => "formats-listed",
            StageOutcome::Exported(_) => "exported",
        }
    }
}
