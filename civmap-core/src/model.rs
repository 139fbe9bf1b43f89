//! Domain data structures for complaints, coordinates, filters, and snapshot statistics.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier for a complaint, stable across updates.
pub struct ComplaintId(pub String);

impl fmt::Display for ComplaintId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ComplaintId {
    fn from(raw: &str) -> Self {
        ComplaintId(raw.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier for the department a complaint is assigned to.
pub struct DepartmentId(pub String);

impl fmt::Display for DepartmentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
/// Workflow status of a complaint.
pub enum Status {
    /// Filed, not yet triaged.
    New,
    /// Assigned and being worked on.
    InProgress,
    /// Fixed, awaiting closure.
    Resolved,
    /// Closed for good.
    Closed,
    /// Backend value this client does not know about.
    Other(String),
}

impl Status {
    /// Every status the backend is known to emit, in workflow order.
    pub const KNOWN: [Status; 4] = [
        Status::New,
        Status::InProgress,
        Status::Resolved,
        Status::Closed,
    ];

    /// Wire representation used by the backend.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Status::New => "new",
            Status::InProgress => "in_progress",
            Status::Resolved => "resolved",
            Status::Closed => "closed",
            Status::Other(raw) => raw.as_str(),
        }
    }

    /// Next status in the triage cycle; unknown values restart at `New`.
    #[must_use]
    pub fn cycled(&self) -> Status {
        match self {
            Status::New => Status::InProgress,
            Status::InProgress => Status::Resolved,
            Status::Resolved => Status::Closed,
            Status::Closed | Status::Other(_) => Status::New,
        }
    }
}

impl From<&str> for Status {
    fn from(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "new" => Status::New,
            "in_progress" => Status::InProgress,
            "resolved" => Status::Resolved,
            "closed" => Status::Closed,
            _ => Status::Other(raw.to_owned()),
        }
    }
}

impl From<String> for Status {
    fn from(raw: String) -> Self {
        Status::from(raw.as_str())
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
/// Urgency of a complaint.
pub enum Priority {
    /// Can wait.
    Low,
    /// Default urgency.
    Medium,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
    /// Backend value this client does not know about.
    Other(String),
}

impl Priority {
    /// Every priority the backend is known to emit, lowest first.
    pub const KNOWN: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    /// Wire representation used by the backend.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
            Priority::Other(raw) => raw.as_str(),
        }
    }

    /// Next priority in the triage cycle; unknown values restart at `Low`.
    #[must_use]
    pub fn cycled(&self) -> Priority {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium => Priority::High,
            Priority::High => Priority::Critical,
            Priority::Critical | Priority::Other(_) => Priority::Low,
        }
    }
}

impl From<&str> for Priority {
    fn from(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low" => Priority::Low,
            "medium" => Priority::Medium,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => Priority::Other(raw.to_owned()),
        }
    }
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        Priority::from(raw.as_str())
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// WGS84 position in degrees.
pub struct Coordinates {
    /// Latitude, -90 to 90.
    pub latitude: f64,
    /// Longitude, -180 to 180.
    pub longitude: f64,
}

impl Coordinates {
    /// Construct a position from latitude and longitude.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and inside the WGS84 range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Axis-aligned region covering a set of positions.
pub struct Bounds {
    /// Smallest latitude.
    pub south: f64,
    /// Smallest longitude.
    pub west: f64,
    /// Largest latitude.
    pub north: f64,
    /// Largest longitude.
    pub east: f64,
}

impl Bounds {
    /// Smallest region covering every position, or `None` for an empty input.
    pub fn covering<I>(positions: I) -> Option<Bounds>
    where
        I: IntoIterator<Item = Coordinates>,
    {
        positions.into_iter().fold(None, |acc, pos| {
            Some(match acc {
                None => Bounds {
                    south: pos.latitude,
                    west: pos.longitude,
                    north: pos.latitude,
                    east: pos.longitude,
                },
                Some(bounds) => Bounds {
                    south: bounds.south.min(pos.latitude),
                    west: bounds.west.min(pos.longitude),
                    north: bounds.north.max(pos.latitude),
                    east: bounds.east.max(pos.longitude),
                },
            })
        })
    }

    /// Whether the position lies inside or on the edge of the region.
    #[must_use]
    pub fn contains(&self, position: Coordinates) -> bool {
        (self.south..=self.north).contains(&position.latitude)
            && (self.west..=self.east).contains(&position.longitude)
    }

    /// Midpoint of the region.
    #[must_use]
    pub fn center(&self) -> Coordinates {
        Coordinates::new(
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Complaint row as returned by a snapshot backend, coordinates possibly missing.
pub struct ComplaintRecord {
    /// Unique identifier.
    pub id: ComplaintId,
    /// Tracking number handed out to the reporter.
    #[serde(default)]
    pub tracking_id: Option<String>,
    /// Short display label.
    pub title: String,
    /// Workflow status.
    pub status: Status,
    /// Urgency.
    pub priority: Priority,
    /// Free-text classification such as `road_damage`.
    #[serde(default)]
    pub category: String,
    /// Latitude, if the reporter shared a location.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Longitude, if the reporter shared a location.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Department currently handling the complaint.
    #[serde(default)]
    pub assigned_department_id: Option<DepartmentId>,
}

impl ComplaintRecord {
    /// Convert into a map-ready complaint; `None` when either coordinate is missing or not finite.
    #[must_use]
    pub fn into_geolocated(self) -> Option<GeolocatedComplaint> {
        let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
            return None;
        };
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }

        Some(GeolocatedComplaint {
            id: self.id,
            tracking_id: self.tracking_id,
            title: self.title,
            status: self.status,
            priority: self.priority,
            category: self.category,
            position: Coordinates::new(latitude, longitude),
            assigned_department_id: self.assigned_department_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Complaint that has both coordinates and can be rendered on a map.
pub struct GeolocatedComplaint {
    /// Unique identifier.
    pub id: ComplaintId,
    /// Tracking number handed out to the reporter.
    pub tracking_id: Option<String>,
    /// Short display label.
    pub title: String,
    /// Workflow status, drives the marker color.
    pub status: Status,
    /// Urgency, drives the marker glyph.
    pub priority: Priority,
    /// Free-text classification shown in the popup.
    pub category: String,
    /// Where the complaint was reported.
    pub position: Coordinates,
    /// Department currently handling the complaint.
    pub assigned_department_id: Option<DepartmentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Predicate restricting which complaints a snapshot contains.
pub struct SnapshotFilter {
    /// Only complaints with this status.
    pub status: Option<Status>,
    /// Only complaints assigned to this department.
    pub assigned_department_id: Option<DepartmentId>,
}

impl SnapshotFilter {
    /// Filter that accepts every complaint.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a single status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to a single department.
    #[must_use]
    pub fn with_department(mut self, department: DepartmentId) -> Self {
        self.assigned_department_id = Some(department);
        self
    }

    /// Whether the filter accepts everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.assigned_department_id.is_none()
    }

    /// Check a map-ready complaint against the filter.
    #[must_use]
    pub fn matches(&self, complaint: &GeolocatedComplaint) -> bool {
        self.accepts(&complaint.status, complaint.assigned_department_id.as_ref())
    }

    /// Check a raw record against the filter.
    #[must_use]
    pub fn matches_record(&self, record: &ComplaintRecord) -> bool {
        self.accepts(&record.status, record.assigned_department_id.as_ref())
    }

    fn accepts(&self, status: &Status, department: Option<&DepartmentId>) -> bool {
        let status_ok = self.status.as_ref().is_none_or(|wanted| wanted == status);
        let department_ok = self
            .assigned_department_id
            .as_ref()
            .is_none_or(|wanted| department == Some(wanted));
        status_ok && department_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What happened to a complaint row, when the feed says so.
pub enum ChangeKind {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
    /// Feed did not say.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Signal that the complaint set changed; carries no row payload.
pub struct ChangeEvent {
    /// Kind of change, informational only.
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Complaint counts per status bucket.
pub struct StatusCounts {
    /// `new` complaints.
    pub new: usize,
    /// `in_progress` complaints.
    pub in_progress: usize,
    /// `resolved` complaints.
    pub resolved: usize,
    /// `closed` complaints.
    pub closed: usize,
    /// Complaints with an unrecognized status.
    pub other: usize,
}

impl StatusCounts {
    /// Count for the bucket the status falls into.
    #[must_use]
    pub fn get(&self, status: &Status) -> usize {
        match status {
            Status::New => self.new,
            Status::InProgress => self.in_progress,
            Status::Resolved => self.resolved,
            Status::Closed => self.closed,
            Status::Other(_) => self.other,
        }
    }

    fn bump(&mut self, status: &Status) {
        let slot = match status {
            Status::New => &mut self.new,
            Status::InProgress => &mut self.in_progress,
            Status::Resolved => &mut self.resolved,
            Status::Closed => &mut self.closed,
            Status::Other(_) => &mut self.other,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Complaint counts per priority bucket.
pub struct PriorityCounts {
    /// `low` complaints.
    pub low: usize,
    /// `medium` complaints.
    pub medium: usize,
    /// `high` complaints.
    pub high: usize,
    /// `critical` complaints.
    pub critical: usize,
    /// Complaints with an unrecognized priority.
    pub other: usize,
}

impl PriorityCounts {
    /// Count for the bucket the priority falls into.
    #[must_use]
    pub fn get(&self, priority: &Priority) -> usize {
        match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
            Priority::Critical => self.critical,
            Priority::Other(_) => self.other,
        }
    }

    fn bump(&mut self, priority: &Priority) {
        let slot = match priority {
            Priority::Low => &mut self.low,
            Priority::Medium => &mut self.medium,
            Priority::High => &mut self.high,
            Priority::Critical => &mut self.critical,
            Priority::Other(_) => &mut self.other,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Status and priority buckets for one snapshot.
pub struct SnapshotStats {
    /// Number of complaints in the snapshot.
    pub total: usize,
    /// Per-status counts.
    pub by_status: StatusCounts,
    /// Per-priority counts.
    pub by_priority: PriorityCounts,
}

impl SnapshotStats {
    /// Bucket every complaint of a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &[GeolocatedComplaint]) -> Self {
        snapshot
            .iter()
            .fold(SnapshotStats::default(), |mut stats, complaint| {
                stats.total += 1;
                stats.by_status.bump(&complaint.status);
                stats.by_priority.bump(&complaint.priority);
                stats
            })
    }
}
