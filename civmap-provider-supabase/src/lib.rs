//! Backend implementation for a Supabase project using its PostgREST API.
//!
//! Snapshots and triage writes go through `/rest/v1/<table>`. Change
//! notifications are derived by polling a cheap fingerprint of the table
//! (row count plus newest `updated_at`) and firing whenever it moves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use civmap_core::{
    backend::Backend,
    model::{
        ChangeEvent, ChangeKind, ComplaintId, ComplaintRecord, DepartmentId, Priority,
        SnapshotFilter, Status,
    },
    ports::{ChangeCallback, ChangeFeedPort, FeedToken, PortError, SnapshotPort, TriagePort},
};

const REST_PATH: &str = "rest/v1";
const SELECT_COLUMNS: &str =
    "id,tracking_id,title,status,priority,category,latitude,longitude,assigned_department_id";

/// Default table holding complaints.
pub const DEFAULT_TABLE: &str = "complaints";
/// How often the change feed polls when not configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// Connection settings for a Supabase project.
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyzcompany.supabase.co`.
    pub url: String,
    /// Anon or service key, sent as `apikey`.
    pub api_key: String,
    /// User JWT; the API key is used as bearer token when absent.
    pub access_token: Option<String>,
    /// Complaint table name.
    pub table: String,
    /// Change feed polling period.
    pub poll_interval: Duration,
}

impl SupabaseConfig {
    /// Settings with the default table and polling period.
    #[must_use]
    pub fn new<U: Into<String>, K: Into<String>>(url: U, api_key: K) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            access_token: None,
            table: DEFAULT_TABLE.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{REST_PATH}/{}",
            self.url.trim_end_matches('/'),
            self.table
        )
    }
}

/// Single row of the fingerprint query.
#[derive(Debug, Deserialize)]
struct UpdatedAtRow {
    updated_at: Option<DateTime<Utc>>,
}

/// Cheap summary of the table; any write changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    count: Option<u64>,
    latest: Option<DateTime<Utc>>,
}

#[derive(Clone)]
struct RestClient {
    client: Client,
    config: Arc<SupabaseConfig>,
}

impl RestClient {
    fn request(&self, method: Method) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        self.client
            .request(method, self.config.table_url())
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
    }

    async fn fingerprint(&self) -> Result<Fingerprint, PortError> {
        let resp = self
            .request(Method::GET)
            .query(&[
                ("select", "updated_at"),
                ("order", "updated_at.desc.nullslast"),
                ("limit", "1"),
            ])
            .header("Prefer", "count=exact")
            .send()
            .await?
            .error_for_status()?;

        let count = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_total);
        let rows: Vec<UpdatedAtRow> = decode(&resp.text().await?)?;

        Ok(Fingerprint {
            count,
            latest: rows.into_iter().next().and_then(|row| row.updated_at),
        })
    }

    async fn patch(&self, id: &ComplaintId, change: Value) -> Result<(), PortError> {
        let body = stamped(change, Utc::now());
        let req = self
            .request(Method::PATCH)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&body);

        let updated = fetch_json::<Vec<Value>>(req).await?;
        if updated.is_empty() {
            return Err(PortError::NotFound(id.clone()));
        }

        info!(complaint_id = %id, change = %body, "Complaint updated");
        Ok(())
    }
}

/// Snapshot query against the complaint table.
pub struct SupabaseSnapshotPort {
    rest: RestClient,
}

impl SupabaseSnapshotPort {
    /// Create a new snapshot port bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client, config: Arc<SupabaseConfig>) -> Self {
        Self {
            rest: RestClient { client, config },
        }
    }
}

#[async_trait]
impl SnapshotPort for SupabaseSnapshotPort {
    async fn fetch(&self, filter: &SnapshotFilter) -> Result<Vec<ComplaintRecord>, PortError> {
        let req = self
            .rest
            .request(Method::GET)
            .query(&snapshot_query(filter));

        let records = fetch_json::<Vec<ComplaintRecord>>(req).await?;
        debug!(rows = records.len(), "Fetched complaint rows");
        Ok(records)
    }
}

/// Change feed that polls the table fingerprint.
pub struct SupabaseChangeFeed {
    rest: RestClient,
    pollers: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_token: AtomicU64,
}

impl SupabaseChangeFeed {
    /// Create a new change feed bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client, config: Arc<SupabaseConfig>) -> Self {
        Self {
            rest: RestClient { client, config },
            pollers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.pollers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ChangeFeedPort for SupabaseChangeFeed {
    async fn open(
        &self,
        channel: &str,
        on_change: ChangeCallback,
    ) -> Result<FeedToken, PortError> {
        // the first fingerprint doubles as the subscription acknowledgement
        let baseline = self.rest.fingerprint().await?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let poller = tokio::spawn(poll_changes(
            self.rest.clone(),
            channel.to_owned(),
            on_change,
            baseline,
        ));
        self.pollers().insert(token, poller);

        info!(
            channel,
            poll_interval = ?self.rest.config.poll_interval,
            "Polling complaint changes"
        );
        Ok(FeedToken(token))
    }

    fn close(&self, token: FeedToken) {
        if let Some(poller) = self.pollers().remove(&token.0) {
            poller.abort();
            debug!(token = token.0, "Stopped polling complaint changes");
        }
    }
}

impl Drop for SupabaseChangeFeed {
    fn drop(&mut self) {
        for (_, poller) in self.pollers().drain() {
            poller.abort();
        }
    }
}

/// Admin writes against the complaint table.
pub struct SupabaseTriagePort {
    rest: RestClient,
}

impl SupabaseTriagePort {
    /// Create a new triage port bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client, config: Arc<SupabaseConfig>) -> Self {
        Self {
            rest: RestClient { client, config },
        }
    }
}

#[async_trait]
impl TriagePort for SupabaseTriagePort {
    async fn set_status(&self, id: &ComplaintId, status: &Status) -> Result<(), PortError> {
        self.rest
            .patch(id, json!({ "status": status.as_str() }))
            .await
    }

    async fn set_priority(&self, id: &ComplaintId, priority: &Priority) -> Result<(), PortError> {
        self.rest
            .patch(id, json!({ "priority": priority.as_str() }))
            .await
    }

    async fn assign_department(
        &self,
        id: &ComplaintId,
        department: &DepartmentId,
    ) -> Result<(), PortError> {
        self.rest
            .patch(id, json!({ "assigned_department_id": department.0 }))
            .await
    }
}

/// Build the backend bundle for a Supabase project.
#[must_use]
pub fn backend(client: Client, config: SupabaseConfig) -> Backend {
    let config = Arc::new(config);
    let name = format!("supabase ({})", config.url);

    Backend {
        name,
        snapshots: Arc::new(SupabaseSnapshotPort::new(
            client.clone(),
            Arc::clone(&config),
        )),
        feed: Arc::new(SupabaseChangeFeed::new(client.clone(), Arc::clone(&config))),
        triage: Arc::new(SupabaseTriagePort::new(client, config)),
    }
}

async fn poll_changes(
    rest: RestClient,
    channel: String,
    on_change: ChangeCallback,
    mut last: Fingerprint,
) {
    let mut ticker = interval(rest.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match rest.fingerprint().await {
            Ok(current) if current != last => {
                let kind = change_kind(&last, &current);
                debug!(channel = %channel, ?kind, "Complaint table changed");
                last = current;
                on_change(ChangeEvent { kind });
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    channel = %channel,
                    error = %err,
                    "Change poll failed, retrying on next tick"
                );
            }
        }
    }
}

/// PostgREST query parameters for a snapshot.
fn snapshot_query(filter: &SnapshotFilter) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", SELECT_COLUMNS.to_owned()),
        ("latitude", "not.is.null".to_owned()),
        ("longitude", "not.is.null".to_owned()),
    ];
    if let Some(status) = &filter.status {
        params.push(("status", format!("eq.{status}")));
    }
    if let Some(department) = &filter.assigned_department_id {
        params.push(("assigned_department_id", format!("eq.{department}")));
    }
    params
}

/// Add `updated_at` to a PATCH body so the change feed fingerprint moves.
fn stamped(mut change: Value, now: DateTime<Utc>) -> Value {
    if let Value::Object(fields) = &mut change {
        fields.insert("updated_at".to_owned(), json!(now));
    }
    change
}

/// Total row count from a `Content-Range` header such as `0-0/42`.
fn parse_total(content_range: &str) -> Option<u64> {
    content_range
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
}

/// Best guess at what kind of write moved the fingerprint.
fn change_kind(previous: &Fingerprint, current: &Fingerprint) -> ChangeKind {
    match (previous.count, current.count) {
        (Some(before), Some(after)) if after > before => ChangeKind::Insert,
        (Some(before), Some(after)) if after < before => ChangeKind::Delete,
        (Some(_), Some(_)) => ChangeKind::Update,
        _ => ChangeKind::Unknown,
    }
}

// Non-2xx answers are errors; the body is decoded separately so bad JSON maps to `Decode`.
async fn fetch_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, PortError> {
    let body = req.send().await?.error_for_status()?.text().await?;
    decode(&body)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, PortError> {
    serde_json::from_str(body).map_err(|err| PortError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(count: Option<u64>) -> Fingerprint {
        Fingerprint {
            count,
            latest: None,
        }
    }

    #[test]
    fn unfiltered_query_only_asks_for_located_rows() {
        let params = snapshot_query(&SnapshotFilter::all());
        assert_eq!(
            params,
            vec![
                ("select", SELECT_COLUMNS.to_owned()),
                ("latitude", "not.is.null".to_owned()),
                ("longitude", "not.is.null".to_owned()),
            ]
        );
    }

    #[test]
    fn filters_become_equality_operators() {
        let filter = SnapshotFilter::all()
            .with_status(Status::InProgress)
            .with_department(DepartmentId("dept-7".to_owned()));
        let params = snapshot_query(&filter);
        assert!(params.contains(&("status", "eq.in_progress".to_owned())));
        assert!(params.contains(&("assigned_department_id", "eq.dept-7".to_owned())));
    }

    #[test]
    fn content_range_total_is_parsed() {
        assert_eq!(parse_total("0-0/42"), Some(42));
        assert_eq!(parse_total("*/0"), Some(0));
        assert_eq!(parse_total("0-24/*"), None);
        assert_eq!(parse_total("garbage"), None);
    }

    #[test]
    fn change_kind_follows_the_row_count() {
        assert_eq!(
            change_kind(&fingerprint(Some(3)), &fingerprint(Some(4))),
            ChangeKind::Insert
        );
        assert_eq!(
            change_kind(&fingerprint(Some(3)), &fingerprint(Some(2))),
            ChangeKind::Delete
        );
        assert_eq!(
            change_kind(&fingerprint(Some(3)), &fingerprint(Some(3))),
            ChangeKind::Update
        );
        assert_eq!(
            change_kind(&fingerprint(None), &fingerprint(Some(3))),
            ChangeKind::Unknown
        );
    }

    #[test]
    fn table_url_tolerates_trailing_slash() {
        let config = SupabaseConfig::new("https://demo.supabase.co/", "anon");
        assert_eq!(
            config.table_url(),
            "https://demo.supabase.co/rest/v1/complaints"
        );
    }

    #[test]
    fn postgres_timestamps_decode() {
        let rows: Vec<UpdatedAtRow> =
            serde_json::from_str(r#"[{"updated_at": "2024-05-01T10:00:00.123456+00:00"}]"#)
                .expect("valid rows");
        let latest = rows.first().and_then(|row| row.updated_at);
        assert_eq!(
            latest.map(|stamp| stamp.to_rfc3339()),
            Some("2024-05-01T10:00:00.123456+00:00".to_owned())
        );
    }

    #[test]
    fn patch_bodies_carry_updated_at() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let body = stamped(json!({ "status": "in_progress" }), now);
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["updated_at"], json!(now));

        let before = Fingerprint {
            count: Some(3),
            latest: None,
        };
        let rows: Vec<UpdatedAtRow> =
            serde_json::from_value(json!([{ "updated_at": body["updated_at"] }]))
                .expect("valid rows");
        let after = Fingerprint {
            count: Some(3),
            latest: rows.into_iter().next().and_then(|row| row.updated_at),
        };
        assert_ne!(before, after);
        assert_eq!(change_kind(&before, &after), ChangeKind::Update);
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let err = decode::<Vec<ComplaintRecord>>(r#"{"message": "JWT expired"}"#)
            .expect_err("not a row list");
        assert!(matches!(err, PortError::Decode(_)));
    }

    #[test]
    fn postgrest_rows_decode_into_records() {
        let body = r#"[{
            "id": "5d1c",
            "tracking_id": "CMP-2024-0001",
            "title": "Overflowing bin",
            "status": "new",
            "priority": "critical",
            "category": "garbage",
            "latitude": 28.61,
            "longitude": 77.21,
            "assigned_department_id": null
        }]"#;
        let records: Vec<ComplaintRecord> = serde_json::from_str(body).expect("valid rows");
        let located = records
            .into_iter()
            .next()
            .and_then(ComplaintRecord::into_geolocated)
            .expect("row has coordinates");
        assert_eq!(located.priority, Priority::Critical);
        assert_eq!(located.tracking_id.as_deref(), Some("CMP-2024-0001"));
    }
}
