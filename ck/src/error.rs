//! Kernel error taxonomy
//!
//! Every failure a pipeline stage can surface to the coordinator. None of them is
//! fatal: the controller reports the error and returns to `Ready`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EngineKind, ExportFormat, format_list};
use crate::engine::EngineError;

/// Errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("No engine available to process {filename}")]
    NoEngineAvailable { filename: String },

    #[error("Engine {kind} is not initialized")]
    EngineNotInitialized { kind: EngineKind },

    #[error("Kernel has not been initialized")]
    NotInitialized,

    #[error("Parameter extraction failed in {kind}: {source}")]
    ParameterExtraction {
        kind: EngineKind,
        #[source]
        source: EngineError,
    },

    #[error("Geometry evaluation failed in {kind}: {source}")]
    GeometryEvaluation {
        kind: EngineKind,
        #[source]
        source: EngineError,
    },

    #[error("Export format {format} is not supported by {kind} (supported: {})", format_list(.supported))]
    UnsupportedExportFormat {
        kind: EngineKind,
        format: ExportFormat,
        supported: Vec<ExportFormat>,
    },

    #[error("Export failed: {message}")]
    Export { kind: Option<EngineKind>, message: String },

    #[error("Engine {kind} failed to initialize: {source}")]
    EngineInitialization {
        kind: EngineKind,
        #[source]
        source: EngineError,
    },

    #[error("Kernel controller is not running")]
    ControllerClosed,
}

/// Serializable discriminant of [`KernelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NoEngineAvailable,
    EngineNotInitialized,
    ParameterExtractionFailure,
    GeometryEvaluationFailure,
    UnsupportedExportFormat,
    ExportFailure,
    EngineInitializationFailure,
    ControllerClosed,
}

impl KernelError {
    /// Error with the "nothing has been computed yet" message
    pub fn no_geometry(kind: Option<EngineKind>) -> Self {
        KernelError::Export {
            kind,
            message: "no geometry to export".to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::NoEngineAvailable { .. } => ErrorKind::NoEngineAvailable,
            KernelError::EngineNotInitialized { .. } | KernelError::NotInitialized => ErrorKind::EngineNotInitialized,
            KernelError::ParameterExtraction { .. } => ErrorKind::ParameterExtractionFailure,
            KernelError::GeometryEvaluation { .. } => ErrorKind::GeometryEvaluationFailure,
            KernelError::UnsupportedExportFormat { .. } => ErrorKind::UnsupportedExportFormat,
            KernelError::Export { .. } => ErrorKind::ExportFailure,
            KernelError::EngineInitialization { .. } => ErrorKind::EngineInitializationFailure,
            KernelError::ControllerClosed => ErrorKind::ControllerClosed,
        }
    }

    /// Engine the error is attributed to, if any
    pub fn engine(&self) -> Option<EngineKind> {
        match self {
            KernelError::EngineNotInitialized { kind }
            | KernelError::ParameterExtraction { kind, .. }
            | KernelError::GeometryEvaluation { kind, .. }
            | KernelError::UnsupportedExportFormat { kind, .. }
            | KernelError::EngineInitialization { kind, .. } => Some(*kind),
            KernelError::Export { kind, .. } => *kind,
            KernelError::NoEngineAvailable { .. } | KernelError::NotInitialized | KernelError::ControllerClosed => None,
        }
    }

    /// Source line reported by the engine, if any
    pub fn line(&self) -> Option<u32> {
        match self {
            KernelError::ParameterExtraction { source, .. }
            | KernelError::GeometryEvaluation { source, .. }
            | KernelError::EngineInitialization { source, .. } => source.line(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_engine_message_names_file() {
        let err = KernelError::NoEngineAvailable {
            filename: "part.xyz".to_string(),
        };
        assert!(err.to_string().contains("part.xyz"));
        assert_eq!(err.kind(), ErrorKind::NoEngineAvailable);
        assert_eq!(err.engine(), None);
    }

    #[test]
    fn test_unsupported_format_message_lists_supported() {
        let err = KernelError::UnsupportedExportFormat {
            kind: EngineKind::Mesh,
            format: ExportFormat::Step,
            supported: vec![ExportFormat::Stl, ExportFormat::StlAscii],
        };
        let msg = err.to_string();
        assert!(msg.contains("step"));
        assert!(msg.contains("stl, stl-ascii"));
        assert_eq!(err.engine(), Some(EngineKind::Mesh));
    }

    #[test]
    fn test_evaluation_error_carries_line() {
        let err = KernelError::GeometryEvaluation {
            kind: EngineKind::Openscad,
            source: EngineError::failed_at("Parser error", 7),
        };
        assert_eq!(err.line(), Some(7));
        assert_eq!(err.kind(), ErrorKind::GeometryEvaluationFailure);
    }

    #[test]
    fn test_not_initialized_maps_to_engine_not_initialized() {
        assert_eq!(KernelError::NotInitialized.kind(), ErrorKind::EngineNotInitialized);
    }
}
