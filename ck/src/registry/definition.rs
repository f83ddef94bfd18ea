//! Engine definitions and live slots

use tokio::task::JoinHandle;

use crate::domain::EngineKind;
use crate::engine::{Engine, EngineOptions, EngineStub};

/// Produces a fresh engine instance for every (re)creation
pub type EngineFactory = Box<dyn Fn() -> Box<dyn Engine> + Send + Sync>;

/// A configured engine: what to build and which options to hand it
pub struct EngineDefinition {
    pub kind: EngineKind,
    pub options: EngineOptions,
    pub factory: EngineFactory,
}

impl EngineDefinition {
    pub fn new(
        kind: EngineKind,
        options: EngineOptions,
        factory: impl Fn() -> Box<dyn Engine> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            options,
            factory: Box::new(factory),
        }
    }
}

impl std::fmt::Debug for EngineDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDefinition")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish()
    }
}

/// Live instance of one engine kind
#[derive(Debug)]
pub struct EngineSlot {
    pub kind: EngineKind,
    pub handle: Option<JoinHandle<()>>,
    pub stub: Option<EngineStub>,
}

impl EngineSlot {
    /// Check if the actor is still running
    pub fn is_live(&self) -> bool {
        self.stub.as_ref().is_some_and(|s| !s.is_closed())
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the actor without waiting for cleanup
    pub fn terminate(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.stub = None;
    }
}
