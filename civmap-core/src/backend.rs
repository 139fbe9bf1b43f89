//! Bundle of ports making up one complaint backend.

use std::sync::Arc;

use crate::memory::InMemoryComplaints;
use crate::ports::{ChangeFeedPort, SnapshotPort, TriagePort};

/// Collection of ports implementing a complaint backend.
#[derive(Clone)]
pub struct Backend {
    /// Human-friendly backend name, shown in status lines.
    pub name: String,
    /// Implementation for loading snapshots.
    pub snapshots: Arc<dyn SnapshotPort>,
    /// Implementation for change notifications.
    pub feed: Arc<dyn ChangeFeedPort>,
    /// Implementation for admin writes.
    pub triage: Arc<dyn TriagePort>,
}

impl Backend {
    /// Bundle an in-memory store as a backend.
    #[must_use]
    pub fn in_memory(store: Arc<InMemoryComplaints>) -> Self {
        Self {
            name: String::from("in-memory"),
            snapshots: Arc::clone(&store) as Arc<dyn SnapshotPort>,
            feed: Arc::clone(&store) as Arc<dyn ChangeFeedPort>,
            triage: store,
        }
    }
}
