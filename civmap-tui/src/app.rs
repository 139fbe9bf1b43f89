use std::sync::Arc;

use chrono::{DateTime, Local};
use civmap_core::{
    backend::Backend,
    feed::SubscriptionState,
    model::{ComplaintId, DepartmentId, GeolocatedComplaint, SnapshotFilter, SnapshotStats, Status},
    ports::{PortError, TriagePort},
    service::{MapSyncService, SyncEvent},
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::surface::CanvasSurface;

/// Status tabs, in display order. `None` shows every complaint.
pub(crate) const TABS: [(&str, Option<Status>); 5] = [
    ("All", None),
    ("New", Some(Status::New)),
    ("In progress", Some(Status::InProgress)),
    ("Resolved", Some(Status::Resolved)),
    ("Closed", Some(Status::Closed)),
];

pub(crate) struct App {
    pub sync: MapSyncService<CanvasSurface>,
    pub triage: Arc<dyn TriagePort>,
    pub backend_name: String,
    pub department: Option<DepartmentId>,
    clicks: UnboundedReceiver<GeolocatedComplaint>,

    pub tab_index: usize,
    pub rows: Vec<GeolocatedComplaint>,
    pub list_index: usize,
    pub detail: Option<GeolocatedComplaint>,

    pub stats: SnapshotStats,
    pub last_sync: Option<DateTime<Local>>,
    pub is_loading: bool,
    pub info_message: Option<String>,
    pub error_message: Option<String>,
}

impl App {
    pub(crate) fn new(
        sync: MapSyncService<CanvasSurface>,
        backend: &Backend,
        department: Option<DepartmentId>,
        clicks: UnboundedReceiver<GeolocatedComplaint>,
    ) -> Self {
        Self {
            sync,
            triage: Arc::clone(&backend.triage),
            backend_name: backend.name.clone(),
            department,
            clicks,
            tab_index: 0,
            rows: Vec::new(),
            list_index: 0,
            detail: None,
            stats: SnapshotStats::default(),
            last_sync: None,
            is_loading: true,
            info_message: None,
            error_message: None,
        }
    }

    pub(crate) fn feed_state(&self) -> SubscriptionState {
        self.sync.subscription_state()
    }

    pub(crate) fn selected(&self) -> Option<&GeolocatedComplaint> {
        self.rows.get(self.list_index)
    }

    /// Filter for the active tab, scoped to the configured department.
    pub(crate) fn current_filter(&self) -> SnapshotFilter {
        let mut filter = SnapshotFilter::all();
        if let Some((_, Some(status))) = TABS.get(self.tab_index) {
            filter = filter.with_status(status.clone());
        }
        if let Some(department) = &self.department {
            filter = filter.with_department(department.clone());
        }
        filter
    }

    pub(crate) fn next_tab(&mut self) {
        self.tab_index = (self.tab_index + 1) % TABS.len();
    }

    pub(crate) fn previous_tab(&mut self) {
        self.tab_index = (self.tab_index + TABS.len() - 1) % TABS.len();
    }

    /// Apply one event from the sync service.
    pub(crate) fn on_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::RefreshStarted { coalesced, .. } => {
                self.is_loading = true;
                self.info_message = Some(format!("{coalesced} change(s) received, refreshing"));
            }
            SyncEvent::Applied { summary, stats, .. } => {
                self.is_loading = self.sync.pending_fetches() > 0;
                self.stats = stats;
                self.last_sync = Some(Local::now());
                self.error_message = None;
                self.info_message = if summary.failed.is_empty() {
                    None
                } else {
                    Some(format!("{} marker(s) could not be drawn", summary.failed.len()))
                };
                self.reload_rows();
            }
            SyncEvent::Superseded { .. } => {
                self.is_loading = self.sync.pending_fetches() > 0;
            }
            SyncEvent::FetchFailed { error, .. } => {
                self.is_loading = self.sync.pending_fetches() > 0;
                self.error_message = Some(format!("Refresh failed: {error}"));
            }
            SyncEvent::FeedClosed { error } => {
                self.error_message = Some(format!("{error} (press r to reconnect)"));
            }
        }
    }

    /// Pick up marker clicks reported by the surface.
    pub(crate) fn drain_clicks(&mut self) {
        while let Ok(complaint) = self.clicks.try_recv() {
            if let Some(index) = self.rows.iter().position(|row| row.id == complaint.id) {
                self.list_index = index;
            }
            self.detail = Some(complaint);
        }
    }

    /// Click the marker of the selected row.
    pub(crate) fn open_selected(&mut self) {
        let Some(id) = self.selected().map(|complaint| complaint.id.clone()) else {
            return;
        };
        let clicked = self
            .sync
            .view()
            .handle(&id)
            .is_some_and(|handle| self.sync.surface().click(handle));
        if !clicked {
            self.error_message = Some(format!("Complaint {id} is no longer on the map"));
        }
    }

    /// Report a triage write and refetch right away instead of waiting for the feed.
    pub(crate) fn triage_finished(
        &mut self,
        complaint: &GeolocatedComplaint,
        change: &str,
        res: Result<(), PortError>,
    ) {
        let label = sort_key(complaint).to_owned();
        match res {
            Ok(()) => {
                info!(complaint_id = %complaint.id, change, "Triage applied");
                self.error_message = None;
                self.info_message = Some(format!("{label}: {change}"));
                self.sync.refresh(None);
                self.is_loading = true;
            }
            Err(err) => {
                self.error_message = Some(format!("Could not update {label}: {err}"));
            }
        }
    }

    // rows mirror the markers the service rendered, sorted for a stable list
    fn reload_rows(&mut self) {
        let selected = self.selected().map(|complaint| complaint.id.clone());
        let view = self.sync.view();
        let mut rows: Vec<GeolocatedComplaint> = view
            .ids()
            .filter_map(|id| view.rendered(id))
            .cloned()
            .collect();
        rows.sort_by(|left, right| sort_key(left).cmp(sort_key(right)));
        self.rows = rows;

        self.list_index = selected
            .and_then(|id| self.position_of(&id))
            .unwrap_or(0)
            .min(self.rows.len().saturating_sub(1));

        if let Some(detail) = &self.detail {
            self.detail = self.rows.iter().find(|row| row.id == detail.id).cloned();
        }
    }

    fn position_of(&self, id: &ComplaintId) -> Option<usize> {
        self.rows.iter().position(|row| &row.id == id)
    }
}

fn sort_key(complaint: &GeolocatedComplaint) -> &str {
    complaint
        .tracking_id
        .as_deref()
        .unwrap_or(complaint.id.0.as_str())
}

#[cfg(test)]
mod tests {
    use civmap_core::{
        memory::InMemoryComplaints, model::ComplaintRecord, reconcile::MarkerClickHandler,
        service::SyncConfig,
    };
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::demo;

    async fn demo_app(store: &Arc<InMemoryComplaints>) -> App {
        let backend = Backend::in_memory(Arc::clone(store));
        let (click_sender, clicks) = unbounded_channel();
        let on_click: MarkerClickHandler = Arc::new(move |complaint: &GeolocatedComplaint| {
            let _ = click_sender.send(complaint.clone());
        });
        let sync = MapSyncService::attach(
            CanvasSurface::default(),
            Arc::clone(&backend.snapshots),
            Arc::clone(&backend.feed),
            on_click,
            SyncConfig::default(),
        )
        .await
        .expect("attach succeeds");
        App::new(sync, &backend, None, clicks)
    }

    async fn settle(app: &mut App) {
        while app.sync.pending_fetches() > 0 {
            let event = app.sync.next_event().await.expect("event while fetching");
            app.on_sync_event(event);
        }
    }

    #[tokio::test]
    async fn successful_triage_refetches_without_the_feed() {
        let records: Vec<ComplaintRecord> = demo::seed();
        let store = Arc::new(InMemoryComplaints::with_records(records));
        let mut app = demo_app(&store).await;
        settle(&mut app).await;
        let applied = app.sync.applied_generation();

        let complaint = app.selected().cloned().expect("a row is selected");
        app.triage_finished(&complaint, "status set to Closed", Ok(()));

        assert!(app.is_loading);
        assert_eq!(app.sync.pending_fetches(), 1);
        assert!(app.error_message.is_none());
        settle(&mut app).await;
        assert!(app.sync.applied_generation() > applied);
    }

    #[tokio::test]
    async fn failed_triage_reports_and_keeps_the_map() {
        let store = Arc::new(InMemoryComplaints::with_records(demo::seed()));
        let mut app = demo_app(&store).await;
        settle(&mut app).await;

        let complaint = app.selected().cloned().expect("a row is selected");
        app.triage_finished(
            &complaint,
            "status set to Closed",
            Err(PortError::NotFound(complaint.id.clone())),
        );

        assert_eq!(app.sync.pending_fetches(), 0);
        assert!(app.error_message.is_some());
    }
}
