//! Core types and the realtime marker synchronization engine for the civmap complaint map.

/// Bundles of ports forming a complaint backend.
pub mod backend;
/// Change feed subscription lifecycle.
pub mod feed;
/// Snapshot loading from a backend port.
pub mod loader;
/// In-memory backend used for demos and tests.
pub mod memory;
/// Domain models and identifiers shared by all backends.
pub mod model;
/// Status and priority presentation tables.
pub mod palette;
/// Traits describing backend and map surface interfaces.
pub mod ports;
/// Diff-and-patch marker reconciliation.
pub mod reconcile;
/// Map sync service used by clients.
pub mod service;

#[cfg(test)]
mod testing;

pub use backend::*;
pub use feed::*;
pub use loader::*;
pub use memory::*;
pub use model::*;
pub use palette::*;
pub use ports::*;
pub use reconcile::*;
pub use service::*;
