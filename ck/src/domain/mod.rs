//! Domain types shared by every layer of the orchestrator

mod geometry;
mod kind;
mod source;

pub use geometry::{ExportFormat, ExportedBlob, Geometry, format_list};
pub use kind::EngineKind;
pub use source::{
    ExtractedParameters, Parameters, SourceFile, empty_schema, merge_parameters, schema_from_defaults,
};
