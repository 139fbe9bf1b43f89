//! Snapshot loading: turns backend rows into a map-ready complaint list.

use std::sync::Arc;

use tracing::debug;

use crate::model::{GeolocatedComplaint, SnapshotFilter};
use crate::ports::{SnapshotPort, SyncError};

/// Fetches the geolocated complaints matching a filter.
#[derive(Clone)]
pub struct SnapshotLoader {
    port: Arc<dyn SnapshotPort>,
}

impl SnapshotLoader {
    /// Create a loader over the given backend.
    #[must_use]
    pub fn new(port: Arc<dyn SnapshotPort>) -> Self {
        Self { port }
    }

    /// Load the current snapshot.
    ///
    /// Rows without both coordinates are dropped silently, and the filter is
    /// re-applied in case the backend ignored it. Order is not meaningful.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::FetchFailed`] when the backend query fails.
    pub async fn fetch_snapshot(
        &self,
        filter: Option<&SnapshotFilter>,
    ) -> Result<Vec<GeolocatedComplaint>, SyncError> {
        let all = SnapshotFilter::all();
        let filter = filter.unwrap_or(&all);

        let records = self.port.fetch(filter).await?;
        let fetched = records.len();

        let snapshot: Vec<GeolocatedComplaint> = records
            .into_iter()
            .filter_map(|record| record.into_geolocated())
            .filter(|complaint| filter.matches(complaint))
            .collect();

        debug!(fetched, kept = snapshot.len(), "Snapshot loaded");

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::model::{ComplaintId, ComplaintRecord, Priority, Status};
    use crate::ports::PortError;

    struct FixedRows(Vec<ComplaintRecord>);

    #[async_trait]
    impl SnapshotPort for FixedRows {
        async fn fetch(
            &self,
            _filter: &SnapshotFilter,
        ) -> Result<Vec<ComplaintRecord>, PortError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl SnapshotPort for Broken {
        async fn fetch(
            &self,
            _filter: &SnapshotFilter,
        ) -> Result<Vec<ComplaintRecord>, PortError> {
            Err(PortError::Internal("connection reset".to_owned()))
        }
    }

    fn row(id: &str, status: Status, latitude: Option<f64>) -> ComplaintRecord {
        ComplaintRecord {
            id: ComplaintId::from(id),
            tracking_id: None,
            title: id.to_owned(),
            status,
            priority: Priority::Low,
            category: "noise".to_owned(),
            latitude,
            longitude: Some(72.8),
            assigned_department_id: None,
        }
    }

    #[tokio::test]
    async fn rows_without_coordinates_are_dropped() {
        let loader = SnapshotLoader::new(Arc::new(FixedRows(vec![
            row("a", Status::New, Some(19.0)),
            row("b", Status::New, None),
        ])));

        let snapshot = loader.fetch_snapshot(None).await.expect("fetch succeeds");
        let ids: Vec<&str> = snapshot.iter().map(|complaint| complaint.id.0.as_str()).collect();
        assert_eq!(ids, ["a"]);
    }

    #[tokio::test]
    async fn filter_is_reapplied_when_backend_ignores_it() {
        let loader = SnapshotLoader::new(Arc::new(FixedRows(vec![
            row("a", Status::New, Some(19.0)),
            row("b", Status::Closed, Some(19.1)),
        ])));

        let filter = SnapshotFilter::all().with_status(Status::Closed);
        let snapshot = loader
            .fetch_snapshot(Some(&filter))
            .await
            .expect("fetch succeeds");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.first().map(|complaint| complaint.status.clone()),
            Some(Status::Closed)
        );
    }

    #[tokio::test]
    async fn backend_failure_is_tagged_as_fetch_failed() {
        let loader = SnapshotLoader::new(Arc::new(Broken));
        let err = loader.fetch_snapshot(None).await.expect_err("must fail");
        assert!(matches!(err, SyncError::FetchFailed(PortError::Internal(_))));
    }
}
