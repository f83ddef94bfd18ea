//! Capability cache: filename to engine kind

use std::collections::HashMap;

use tracing::debug;

use crate::domain::EngineKind;

/// Memo of which engine accepted which file
///
/// Append-only for the life of the process. Entries are never invalidated when
/// a file's content changes; [`CapabilityCache::clear`] is the only reset.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCache {
    entries: HashMap<String, EngineKind>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, filename: &str) -> Option<EngineKind> {
        self.entries.get(filename).copied()
    }

    pub fn insert(&mut self, filename: impl Into<String>, kind: EngineKind) {
        let filename = filename.into();
        debug!(%filename, %kind, "CapabilityCache::insert: called");
        self.entries.insert(filename, kind);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        debug!(count = self.entries.len(), "CapabilityCache::clear: called");
        self.entries.clear();
    }
}
