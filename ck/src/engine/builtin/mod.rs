//! Builtin engines, one per [`EngineKind`]

mod cadquery;
mod customizer;
mod mesh;
mod openscad;
mod staging;
mod stl;

pub use cadquery::{CADQUERY_FORMATS, CadqueryEngine, DEFAULT_PYTHON};
pub use customizer::{extract_customizer, to_scad_literal};
pub use mesh::{MESH_FORMATS, MeshEngine};
pub use openscad::{DEFAULT_OPENSCAD_BINARY, OPENSCAD_FORMATS, OpenscadEngine, parse_failure};
pub use stl::{Mesh, StlError, parse_stl, to_ascii_stl, to_binary_stl};

use tracing::debug;

use super::Engine;
use crate::domain::{EngineKind, ExportFormat};

/// Fresh, uninitialized instance of the builtin engine for `kind`
pub fn create_engine(kind: EngineKind) -> Box<dyn Engine> {
    debug!(%kind, "create_engine: called");
    match kind {
        EngineKind::Mesh => Box::new(MeshEngine::new()),
        EngineKind::Openscad => Box::new(OpenscadEngine::new()),
        EngineKind::Cadquery => Box::new(CadqueryEngine::new()),
    }
}

/// One-line description for listings
pub fn describe(kind: EngineKind) -> &'static str {
    match kind {
        EngineKind::Mesh => "Imports existing STL meshes",
        EngineKind::Openscad => "Declarative OpenSCAD sources (.scad)",
        EngineKind::Cadquery => "Python scripts built on CadQuery (.py)",
    }
}

/// Export formats without starting the engine
pub fn builtin_formats(kind: EngineKind) -> &'static [ExportFormat] {
    match kind {
        EngineKind::Mesh => &MESH_FORMATS,
        EngineKind::Openscad => &OPENSCAD_FORMATS,
        EngineKind::Cadquery => &CADQUERY_FORMATS,
    }
}
