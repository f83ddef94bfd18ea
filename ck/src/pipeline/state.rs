//! Pipeline states

use serde::{Deserialize, Serialize};

/// The controller's single active state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    DeterminingEngine,
    ExtractingParameters,
    EvaluatingGeometry,
    Exporting,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::Initializing => "initializing",
            PipelineState::Ready => "ready",
            PipelineState::DeterminingEngine => "determining-engine",
            PipelineState::ExtractingParameters => "extracting-parameters",
            PipelineState::EvaluatingGeometry => "evaluating-geometry",
            PipelineState::Exporting => "exporting",
        }
    }

    /// Check if a pass is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            PipelineState::Initializing
                | PipelineState::DeterminingEngine
                | PipelineState::ExtractingParameters
                | PipelineState::EvaluatingGeometry
                | PipelineState::Exporting
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
