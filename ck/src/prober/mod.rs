//! Capability probing and the capability cache

mod cache;
mod probe;

pub use cache::CapabilityCache;
pub use probe::{CapabilityProber, Determination, probe_in_order};
