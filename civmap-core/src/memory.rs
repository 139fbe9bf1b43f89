//! In-process complaint store implementing every backend port.
//!
//! Writes notify all open feeds synchronously, which makes it handy for
//! demos and for exercising the sync service without a network.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::model::{
    ChangeEvent, ChangeKind, ComplaintId, ComplaintRecord, DepartmentId, Priority, SnapshotFilter,
    Status,
};
use crate::ports::{
    ChangeCallback, ChangeFeedPort, FeedToken, PortError, SnapshotPort, TriagePort,
};

#[derive(Default)]
struct Inner {
    records: Vec<ComplaintRecord>,
    feeds: HashMap<u64, (String, ChangeCallback)>,
    next_token: u64,
}

/// Complaint table and change feed living in memory.
#[derive(Default)]
pub struct InMemoryComplaints {
    inner: Mutex<Inner>,
}

impl InMemoryComplaints {
    /// Create a store seeded with `records`.
    #[must_use]
    pub fn with_records(records: Vec<ComplaintRecord>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records,
                ..Inner::default()
            }),
        }
    }

    /// Insert a complaint, or replace the one with the same id.
    pub fn upsert(&self, record: ComplaintRecord) -> ChangeKind {
        let kind = {
            let mut inner = self.lock();
            match inner.records.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => {
                    *existing = record;
                    ChangeKind::Update
                }
                None => {
                    inner.records.push(record);
                    ChangeKind::Insert
                }
            }
        };
        self.notify(kind);
        kind
    }

    /// Delete a complaint, returning it if it existed.
    pub fn remove(&self, id: &ComplaintId) -> Option<ComplaintRecord> {
        let removed = {
            let mut inner = self.lock();
            let position = inner.records.iter().position(|record| &record.id == id)?;
            inner.records.remove(position)
        };
        self.notify(ChangeKind::Delete);
        Some(removed)
    }

    /// Copy of every stored complaint.
    #[must_use]
    pub fn records(&self) -> Vec<ComplaintRecord> {
        self.lock().records.clone()
    }

    /// Number of subscriptions currently open.
    #[must_use]
    pub fn open_feeds(&self) -> usize {
        self.lock().feeds.len()
    }

    fn update<F>(&self, id: &ComplaintId, apply: F) -> Result<(), PortError>
    where
        F: FnOnce(&mut ComplaintRecord),
    {
        {
            let mut inner = self.lock();
            let record = inner
                .records
                .iter_mut()
                .find(|record| &record.id == id)
                .ok_or_else(|| PortError::NotFound(id.clone()))?;
            apply(record);
        }
        self.notify(ChangeKind::Update);
        Ok(())
    }

    // callbacks run outside the lock so they may call back into the store
    fn notify(&self, kind: ChangeKind) {
        let callbacks: Vec<(String, ChangeCallback)> =
            self.lock().feeds.values().cloned().collect();
        for (channel, callback) in callbacks {
            debug!(channel = %channel, ?kind, "Notifying feed");
            callback(ChangeEvent { kind });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SnapshotPort for InMemoryComplaints {
    async fn fetch(&self, filter: &SnapshotFilter) -> Result<Vec<ComplaintRecord>, PortError> {
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|record| filter.matches_record(record))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChangeFeedPort for InMemoryComplaints {
    async fn open(
        &self,
        channel: &str,
        on_change: ChangeCallback,
    ) -> Result<FeedToken, PortError> {
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = inner.next_token;
        inner.feeds.insert(token, (channel.to_owned(), on_change));
        Ok(FeedToken(token))
    }

    fn close(&self, token: FeedToken) {
        self.lock().feeds.remove(&token.0);
    }
}

#[async_trait]
impl TriagePort for InMemoryComplaints {
    async fn set_status(&self, id: &ComplaintId, status: &Status) -> Result<(), PortError> {
        self.update(id, |record| record.status = status.clone())
    }

    async fn set_priority(&self, id: &ComplaintId, priority: &Priority) -> Result<(), PortError> {
        self.update(id, |record| record.priority = priority.clone())
    }

    async fn assign_department(
        &self,
        id: &ComplaintId,
        department: &DepartmentId,
    ) -> Result<(), PortError> {
        self.update(id, |record| {
            record.assigned_department_id = Some(department.clone());
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::GeolocatedComplaint;
    use crate::ports::SyncError;
    use crate::service::{MapSyncService, SyncConfig, SyncEvent};
    use crate::testing::RecordingSurface;

    fn record(id: &str, status: Status, latitude: f64) -> ComplaintRecord {
        ComplaintRecord {
            id: ComplaintId::from(id),
            tracking_id: None,
            title: format!("complaint {id}"),
            status,
            priority: Priority::Low,
            category: "garbage".to_owned(),
            latitude: Some(latitude),
            longitude: Some(77.2),
            assigned_department_id: None,
        }
    }

    #[tokio::test]
    async fn writes_notify_open_feeds() {
        let store = InMemoryComplaints::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let token = store
            .open(
                "admin-complaints",
                Arc::new(move |_event: ChangeEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .expect("open succeeds");

        assert_eq!(store.upsert(record("a", Status::New, 28.6)), ChangeKind::Insert);
        assert_eq!(store.upsert(record("a", Status::Closed, 28.6)), ChangeKind::Update);
        store.remove(&ComplaintId::from("a"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        store.close(token);
        store.upsert(record("b", Status::New, 28.7));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(store.open_feeds(), 0);
    }

    #[tokio::test]
    async fn triage_of_unknown_complaint_fails() {
        let store = InMemoryComplaints::default();
        let err = store
            .set_status(&ComplaintId::from("ghost"), &Status::Closed)
            .await
            .expect_err("unknown id");
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn triage_write_recolors_the_marker() {
        let store = Arc::new(InMemoryComplaints::with_records(vec![
            record("a", Status::New, 28.6),
            record("b", Status::New, 28.7),
        ]));
        let surface = RecordingSurface::default();
        let mut service = MapSyncService::attach(
            surface.clone(),
            Arc::clone(&store) as Arc<dyn SnapshotPort>,
            Arc::clone(&store) as Arc<dyn ChangeFeedPort>,
            Arc::new(|_complaint: &GeolocatedComplaint| {}),
            SyncConfig::default(),
        )
        .await
        .expect("attach succeeds");

        let event = service.next_event().await.expect("initial snapshot");
        assert!(matches!(event, SyncEvent::Applied { generation: 1, .. }));

        store
            .set_status(&ComplaintId::from("b"), &Status::InProgress)
            .await
            .expect("triage succeeds");
        let event = service.next_event().await.expect("refresh started");
        assert!(matches!(event, SyncEvent::RefreshStarted { .. }));
        let event = service.next_event().await.expect("snapshot applied");
        let SyncEvent::Applied { summary, stats, .. } = event else {
            panic!("expected an applied snapshot, got {event:?}");
        };
        assert_eq!(summary.updated, 1);
        assert_eq!(stats.by_status.in_progress, 1);

        let report = service.detach();
        assert_eq!(report.released_markers, 2);
        assert_eq!(store.open_feeds(), 0);
        assert_eq!(surface.log().removes, 2);
    }

    #[tokio::test]
    async fn status_filter_is_pushed_down() {
        let store = InMemoryComplaints::with_records(vec![
            record("a", Status::New, 28.6),
            record("b", Status::Resolved, 28.7),
        ]);
        let rows = store
            .fetch(&SnapshotFilter::all().with_status(Status::Resolved))
            .await
            .map_err(SyncError::from)
            .expect("fetch succeeds");
        assert_eq!(rows.len(), 1);
    }
}
