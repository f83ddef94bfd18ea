//! CapabilityProber - picks the engine for a source file

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, warn};

use super::cache::CapabilityCache;
use crate::domain::{EngineKind, SourceFile};
use crate::engine::EngineStub;
use crate::error::KernelError;
use crate::events::{LogLevel, Reporter};

/// How an engine will be chosen for a file
pub enum Determination {
    /// Answered from the capability cache
    Cached(EngineKind),
    /// Candidates still have to be asked; resolve this off the caller's task
    Pending(BoxFuture<'static, Result<EngineKind, KernelError>>),
}

/// Cache-first engine selection
///
/// The prober is the only writer of its cache. A miss hands back the probe as
/// a future so the controller can run it off its own task, then `record` the
/// winner if the pass that asked is still current.
#[derive(Debug, Default)]
pub struct CapabilityProber {
    cache: CapabilityCache,
}

impl CapabilityProber {
    /// Cached decision for `filename`
    pub fn cached(&self, filename: &str) -> Option<EngineKind> {
        let hit = self.cache.get(filename);
        debug!(%filename, ?hit, "CapabilityProber::cached: called");
        hit
    }

    /// Remember the engine that accepted `filename`
    pub fn record(&mut self, filename: &str, kind: EngineKind) {
        self.cache.insert(filename, kind);
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    /// Cache lookup, falling back to probing `candidates` in order
    ///
    /// Nothing is recorded here; the caller decides whether the probe result
    /// still matters.
    pub fn determine_engine(&self, file: &SourceFile, candidates: Vec<EngineStub>, reporter: &Reporter) -> Determination {
        debug!(filename = %file.filename, candidates = candidates.len(), "CapabilityProber::determine_engine: called");
        match self.cached(&file.filename) {
            Some(kind) => Determination::Cached(kind),
            None => Determination::Pending(probe_in_order(candidates, file.clone(), reporter.clone()).boxed()),
        }
    }
}

/// Ask each candidate in turn whether it can handle `file`; first yes wins
///
/// Candidates must already be in priority order. A probe that errors is logged
/// and counts as a no.
pub async fn probe_in_order(
    candidates: Vec<EngineStub>,
    file: SourceFile,
    reporter: Reporter,
) -> Result<EngineKind, KernelError> {
    debug!(filename = %file.filename, candidates = candidates.len(), "probe_in_order: called");
    for stub in candidates {
        let kind = stub.kind();
        match stub.can_handle(&file).await {
            Ok(true) => {
                debug!(%kind, "probe_in_order: engine accepted file");
                return Ok(kind);
            }
            Ok(false) => debug!(%kind, "probe_in_order: engine declined file"),
            Err(e) => {
                warn!(%kind, error = %e, "Capability probe failed; treating as declined");
                reporter.log(
                    LogLevel::Warn,
                    format!("capability probe failed: {e}"),
                    Some(kind),
                    Some(json!({"filename": file.filename})),
                );
            }
        }
    }

    Err(KernelError::NoEngineAvailable {
        filename: file.filename,
    })
}
