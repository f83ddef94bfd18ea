//! EngineRegistry - owns the engine actors and their stubs

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::definition::{EngineDefinition, EngineSlot};
use crate::channel::ChannelManager;
use crate::domain::EngineKind;
use crate::engine::{DEFAULT_ENGINE_BUFFER, Engine, EngineContext, EngineOptions, EngineStub, spawn_engine};
use crate::error::KernelError;
use crate::events::Reporter;

/// How long teardown waits for an engine's cleanup before aborting it
pub const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_secs(2);

/// Creates, tracks and tears down one engine per configured kind
pub struct EngineRegistry {
    definitions: Vec<EngineDefinition>,
    slots: BTreeMap<EngineKind, EngineSlot>,
    channels: ChannelManager,
    call_timeout: Option<Duration>,
    cleanup_grace: Duration,
    buffer: usize,
}

impl EngineRegistry {
    pub fn new(channels: ChannelManager) -> Self {
        debug!("EngineRegistry::new: called");
        Self {
            definitions: Vec::new(),
            slots: BTreeMap::new(),
            channels,
            call_timeout: None,
            cleanup_grace: DEFAULT_CLEANUP_GRACE,
            buffer: DEFAULT_ENGINE_BUFFER,
        }
    }

    /// Register an engine kind; a later registration of the same kind replaces it
    pub fn register(
        mut self,
        kind: EngineKind,
        options: EngineOptions,
        factory: impl Fn() -> Box<dyn Engine> + Send + Sync + 'static,
    ) -> Self {
        debug!(%kind, "EngineRegistry::register: called");
        self.definitions.retain(|d| d.kind != kind);
        self.definitions.push(EngineDefinition::new(kind, options, factory));
        self
    }

    /// Bound every stub call; `None` waits indefinitely
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        debug!(?timeout, "EngineRegistry::with_call_timeout: called");
        self.call_timeout = timeout;
        self
    }

    /// Bound the wait for each engine's cleanup during `destroy_all`
    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        debug!(?grace, "EngineRegistry::with_cleanup_grace: called");
        self.cleanup_grace = grace;
        self
    }

    /// Configured kinds in registration order
    pub fn configured_kinds(&self) -> Vec<EngineKind> {
        self.definitions.iter().map(|d| d.kind).collect()
    }

    /// Spawn and initialize every configured engine concurrently
    ///
    /// Any existing instance of a kind is terminated first. Engines that
    /// initialize successfully stay running even when another one fails; the
    /// first failure (in registration order) is returned.
    pub async fn create_all(&mut self, reporter: &Reporter) -> Result<(), KernelError> {
        debug!(count = self.definitions.len(), "EngineRegistry::create_all: called");

        let mut pending = Vec::with_capacity(self.definitions.len());
        for definition in &self.definitions {
            if let Some(mut existing) = self.slots.remove(&definition.kind) {
                debug!(kind = %definition.kind, "EngineRegistry::create_all: terminating existing instance");
                existing.terminate();
            }

            let (stub, handle) = spawn_engine(definition.kind, (definition.factory)(), self.buffer, self.call_timeout);
            let ctx = EngineContext {
                logger: reporter.engine_logger(definition.kind),
                files: self.channels.open_channel(),
                options: definition.options.clone(),
            };
            pending.push((stub, handle, ctx));
        }

        let results = join_all(pending.iter().map(|(stub, _, ctx)| stub.initialize(ctx.clone()))).await;

        let mut first_error = None;
        for ((stub, handle, _), result) in pending.into_iter().zip(results) {
            let kind = stub.kind();
            match result {
                Ok(()) => {
                    info!(%kind, "Engine initialized");
                    self.slots.insert(
                        kind,
                        EngineSlot {
                            kind,
                            handle: Some(handle),
                            stub: Some(stub),
                        },
                    );
                }
                Err(source) => {
                    warn!(%kind, error = %source, "Engine failed to initialize");
                    let _ = stub.cleanup().await;
                    handle.abort();
                    first_error.get_or_insert(KernelError::EngineInitialization { kind, source });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Clean up and terminate every live engine
    ///
    /// Best-effort: cleanups run concurrently, each bounded by the grace
    /// period. An engine still busy with an abandoned call, failing cleanup or
    /// already unreachable is terminated regardless.
    pub async fn destroy_all(&mut self) {
        debug!(count = self.slots.len(), grace = ?self.cleanup_grace, "EngineRegistry::destroy_all: called");
        let slots = std::mem::take(&mut self.slots);
        let grace = self.cleanup_grace;

        join_all(slots.values().filter_map(|slot| slot.stub.as_ref()).map(|stub| async move {
            let kind = stub.kind();
            match tokio::time::timeout(grace, stub.cleanup()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%kind, error = %e, "Engine cleanup failed; terminating anyway"),
                Err(_) => warn!(%kind, ?grace, "Engine cleanup timed out; terminating anyway"),
            }
        }))
        .await;

        for (kind, mut slot) in slots {
            slot.terminate();
            info!(%kind, "Engine destroyed");
        }
    }

    /// Stub for `kind`, if that engine is live
    pub fn stub(&self, kind: EngineKind) -> Option<EngineStub> {
        self.slots
            .get(&kind)
            .filter(|slot| slot.is_live())
            .and_then(|slot| slot.stub.clone())
    }

    /// Live stubs in probing priority order
    pub fn stubs_by_priority(&self) -> Vec<EngineStub> {
        EngineKind::PRIORITY.iter().filter_map(|kind| self.stub(*kind)).collect()
    }

    /// Number of live engines
    pub fn live_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.is_live()).count()
    }
}

impl Drop for EngineRegistry {
    fn drop(&mut self) {
        for slot in self.slots.values_mut() {
            slot.terminate();
        }
    }
}
