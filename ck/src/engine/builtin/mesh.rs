//! Mesh engine - imports existing STL files
//!
//! The lightest engine: the source already is geometry, so there are no
//! parameters and evaluation only validates and normalizes the mesh.

use async_trait::async_trait;
use tracing::debug;

use super::stl::{Mesh, StlError, looks_like_stl, parse_stl, to_ascii_stl, to_binary_stl};
use crate::domain::{ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile};
use crate::engine::{Engine, EngineContext, EngineError, EngineResult};

/// Formats the mesh engine can write
pub const MESH_FORMATS: [ExportFormat; 2] = [ExportFormat::Stl, ExportFormat::StlAscii];

#[derive(Default)]
pub struct MeshEngine {
    ctx: Option<EngineContext>,
    last: Option<(String, Mesh)>,
}

impl MeshEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Engine for MeshEngine {
    async fn initialize(&mut self, ctx: EngineContext) -> EngineResult<()> {
        debug!("MeshEngine::initialize: called");
        ctx.logger.debug("mesh engine ready");
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn can_handle(&mut self, file: &SourceFile) -> EngineResult<bool> {
        debug!(filename = %file.filename, "MeshEngine::can_handle: called");
        Ok(file.extension().as_deref() == Some("stl") && looks_like_stl(&file.content))
    }

    async fn extract_parameters(&mut self, file: &SourceFile) -> EngineResult<ExtractedParameters> {
        debug!(filename = %file.filename, "MeshEngine::extract_parameters: called");
        Ok(ExtractedParameters::empty())
    }

    async fn compute_geometry(&mut self, file: &SourceFile, parameters: &Parameters) -> EngineResult<Vec<Geometry>> {
        debug!(filename = %file.filename, params = parameters.len(), "MeshEngine::compute_geometry: called");
        let mesh = parse_stl(&file.content).map_err(|e| match e {
            StlError::Malformed { line, message } => EngineError::failed_at(message, line),
            other => EngineError::failed(other.to_string()),
        })?;

        if !parameters.is_empty()
            && let Some(ctx) = &self.ctx
        {
            ctx.logger.warn("mesh files take no parameters; overrides ignored");
        }

        let name = file.stem();
        let geometry = Geometry {
            name: name.clone(),
            format: ExportFormat::Stl,
            data: to_binary_stl(&mesh, &name),
        };
        debug!(triangles = mesh.triangles.len(), "MeshEngine::compute_geometry: parsed");
        self.last = Some((name, mesh));
        Ok(vec![geometry])
    }

    fn supported_export_formats(&self) -> Vec<ExportFormat> {
        MESH_FORMATS.to_vec()
    }

    async fn export_geometry(&mut self, format: ExportFormat) -> EngineResult<Vec<ExportedBlob>> {
        debug!(%format, "MeshEngine::export_geometry: called");
        let (name, mesh) = self
            .last
            .as_ref()
            .ok_or_else(|| EngineError::failed("no geometry has been computed"))?;

        let data = match format {
            ExportFormat::Stl => to_binary_stl(mesh, name),
            ExportFormat::StlAscii => to_ascii_stl(mesh, name).into_bytes(),
            other => return Err(EngineError::failed(format!("mesh engine cannot write {other}"))),
        };

        Ok(vec![ExportedBlob {
            name: name.clone(),
            format,
            data,
        }])
    }

    async fn cleanup(&mut self) -> EngineResult<()> {
        debug!("MeshEngine::cleanup: called");
        self.last = None;
        Ok(())
    }
}
