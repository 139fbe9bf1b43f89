//! Seed data and simulated activity for running without a backend.

use std::sync::Arc;
use std::time::Duration;

use civmap_core::{
    memory::InMemoryComplaints,
    model::{ComplaintId, ComplaintRecord, DepartmentId, Priority, Status},
    ports::TriagePort,
};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

// (tracking id, title, category, status, priority, latitude, longitude, department)
type Seed = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    Option<f64>,
    Option<f64>,
    Option<&'static str>,
);

const SEEDS: [Seed; 12] = [
    (
        "CMP-1001",
        "Overflowing garbage bins near market",
        "garbage",
        "new",
        "high",
        Some(28.6562),
        Some(77.2410),
        None,
    ),
    (
        "CMP-1002",
        "Pothole on ring road",
        "road_damage",
        "in_progress",
        "critical",
        Some(28.5672),
        Some(77.2100),
        Some("roads"),
    ),
    (
        "CMP-1003",
        "Streetlight not working",
        "street_light",
        "new",
        "medium",
        Some(28.6139),
        Some(77.2090),
        None,
    ),
    (
        "CMP-1004",
        "Water leakage from main pipe",
        "water_supply",
        "resolved",
        "high",
        Some(19.0760),
        Some(72.8777),
        Some("water"),
    ),
    (
        "CMP-1005",
        "Blocked storm drain",
        "drainage",
        "in_progress",
        "medium",
        Some(19.0330),
        Some(72.8570),
        Some("water"),
    ),
    (
        "CMP-1006",
        "Illegal dumping on vacant plot",
        "garbage",
        "closed",
        "low",
        Some(12.9716),
        Some(77.5946),
        Some("sanitation"),
    ),
    (
        "CMP-1007",
        "Broken footpath tiles",
        "road_damage",
        "new",
        "low",
        Some(12.9352),
        Some(77.6245),
        None,
    ),
    (
        "CMP-1008",
        "Stray cattle on highway",
        "other",
        "new",
        "critical",
        Some(13.0827),
        Some(80.2707),
        None,
    ),
    (
        "CMP-1009",
        "Sewage overflow",
        "drainage",
        "reopened",
        "high",
        Some(22.5726),
        Some(88.3639),
        Some("water"),
    ),
    (
        "CMP-1010",
        "Noise from construction at night",
        "noise_pollution",
        "resolved",
        "medium",
        Some(18.5204),
        Some(73.8567),
        None,
    ),
    (
        "CMP-1011",
        "Fallen tree blocking lane",
        "other",
        "new",
        "high",
        Some(17.3850),
        Some(78.4867),
        None,
    ),
    (
        "CMP-1012",
        "Complaint submitted without location",
        "garbage",
        "new",
        "low",
        None,
        None,
        None,
    ),
];

/// Records the demo store starts with.
pub(crate) fn seed() -> Vec<ComplaintRecord> {
    SEEDS
        .iter()
        .enumerate()
        .map(|(index, seed)| {
            let &(tracking, title, category, status, priority, latitude, longitude, department) =
                seed;
            ComplaintRecord {
                id: ComplaintId(format!("demo-{}", index + 1)),
                tracking_id: Some(tracking.to_owned()),
                title: title.to_owned(),
                status: Status::from(status),
                priority: Priority::from(priority),
                category: category.to_owned(),
                latitude,
                longitude,
                assigned_department_id: department.map(|name| DepartmentId(name.to_owned())),
            }
        })
        .collect()
}

/// Advance one complaint's status every `period`, round-robin, so the map has changes to show.
pub(crate) fn spawn_activity(store: Arc<InMemoryComplaints>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut turn = 0_usize;
        loop {
            ticker.tick().await;
            let records = store.records();
            if records.is_empty() {
                continue;
            }
            let Some(record) = records.get(turn % records.len()) else {
                continue;
            };
            turn = turn.wrapping_add(1);

            let next = record.status.cycled();
            debug!(complaint_id = %record.id, status = %next, "Simulating triage");
            if let Err(err) = store.set_status(&record.id, &next).await {
                warn!(complaint_id = %record.id, error = %err, "Simulated triage failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use civmap_core::model::SnapshotFilter;
    use civmap_core::ports::SnapshotPort;

    use tokio::time::sleep;

    use super::*;

    #[test]
    fn seed_ids_are_unique() {
        let records = seed();
        let mut ids: Vec<_> = records.iter().map(|record| record.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), records.len());
    }

    #[test]
    fn seed_contains_unplaceable_and_unknown_rows() {
        let records = seed();
        assert!(records.iter().any(|record| record.latitude.is_none()));
        assert!(
            records
                .iter()
                .any(|record| matches!(record.status, Status::Other(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn activity_changes_statuses() {
        let store = Arc::new(InMemoryComplaints::with_records(seed()));
        let before = store.records();
        let task = spawn_activity(Arc::clone(&store), Duration::from_secs(1));

        sleep(Duration::from_millis(1500)).await;
        task.abort();

        let after = store
            .fetch(&SnapshotFilter::all())
            .await
            .expect("fetch succeeds");
        let changed = before
            .iter()
            .zip(&after)
            .filter(|(old, new)| old.status != new.status)
            .count();
        assert_eq!(changed, 1);
    }
}
