//! Traits describing the backend and map surface capabilities, plus shared error types.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Error as ReqwestError;

use crate::model::{
    Bounds, ChangeEvent, ComplaintId, ComplaintRecord, Coordinates, DepartmentId, Priority,
    SnapshotFilter, Status,
};
use crate::palette::MarkerStyle;

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to a complaint backend.
pub enum PortError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// Backend answered with something we could not decode.
    #[error("Decode error: {0}")]
    Decode(String),
    /// Complaint does not exist.
    #[error("Complaint not found: {0}")]
    NotFound(ComplaintId),
    /// The feed channel is gone.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    /// Internal backend error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Errors a map surface reports for a single call.
pub enum SurfaceError {
    /// Position outside the WGS84 range or not finite.
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate {
        /// Offending latitude.
        latitude: f64,
        /// Offending longitude.
        longitude: f64,
    },
    /// The surface is not attached.
    #[error("map surface is detached")]
    Detached,
    /// Any other refusal.
    #[error("map surface rejected the call: {0}")]
    Rejected(String),
}

impl SurfaceError {
    /// Error for a position that cannot be rendered.
    #[must_use]
    pub fn invalid(position: Coordinates) -> Self {
        SurfaceError::InvalidCoordinate {
            latitude: position.latitude,
            longitude: position.longitude,
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Failures surfaced by the synchronization layer.
pub enum SyncError {
    /// Snapshot query could not complete; the map keeps its last state.
    #[error("snapshot fetch failed: {0}")]
    FetchFailed(#[from] PortError),
    /// Change feed could not be opened or went away.
    #[error("subscription to {channel} dropped: {reason}")]
    SubscriptionDropped {
        /// Logical channel name.
        channel: String,
        /// What the feed reported.
        reason: String,
    },
    /// One marker could not be rendered; the rest of the pass continued.
    #[error("could not render marker {id}: {source}")]
    MarkerCreateFailed {
        /// Complaint whose marker was skipped.
        id: ComplaintId,
        /// What the surface reported.
        #[source]
        source: SurfaceError,
    },
    /// Surface refused to attach.
    #[error("map surface could not be attached: {0}")]
    AttachFailed(#[source] SurfaceError),
}

#[async_trait]
/// Query capability returning the current complaint rows.
pub trait SnapshotPort: Send + Sync {
    /// Fetch every complaint matching the filter.
    ///
    /// Implementations may push the filter down to the backend or ignore it;
    /// callers re-check it. Rows without coordinates may be returned.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the backend request fails.
    async fn fetch(&self, filter: &SnapshotFilter) -> Result<Vec<ComplaintRecord>, PortError>;
}

/// Callback a feed invokes for every change it observes.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Token identifying one open feed subscription inside a [`ChangeFeedPort`].
pub struct FeedToken(pub u64);

#[async_trait]
/// Push channel signalling inserts, updates, and deletes of complaints.
pub trait ChangeFeedPort: Send + Sync {
    /// Start delivering change events for `channel` to `on_change`.
    ///
    /// Reconnecting after transport failures is the implementation's job.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the subscription cannot be established.
    async fn open(&self, channel: &str, on_change: ChangeCallback)
    -> Result<FeedToken, PortError>;

    /// Stop delivering events for the token. Unknown tokens are ignored.
    fn close(&self, token: FeedToken);
}

#[async_trait]
/// Admin mutations on complaints. Every successful write shows up on the change feed.
pub trait TriagePort: Send + Sync {
    /// Move a complaint to another status.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the write fails or the complaint is unknown.
    async fn set_status(&self, id: &ComplaintId, status: &Status) -> Result<(), PortError>;

    /// Change the urgency of a complaint.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the write fails or the complaint is unknown.
    async fn set_priority(&self, id: &ComplaintId, priority: &Priority) -> Result<(), PortError>;

    /// Hand a complaint to a department.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the write fails or the complaint is unknown.
    async fn assign_department(
        &self,
        id: &ComplaintId,
        department: &DepartmentId,
    ) -> Result<(), PortError>;
}

#[derive(Debug, Clone, PartialEq)]
/// Everything a surface needs to draw one marker.
pub struct MarkerSpec {
    /// Where to place the marker.
    pub position: Coordinates,
    /// Color and badge.
    pub style: MarkerStyle,
    /// Popup body.
    pub popup: String,
}

/// Callback a surface invokes when the user activates a marker.
pub type ClickCallback = Arc<dyn Fn() + Send + Sync>;

/// Interactive map that can host markers.
///
/// Handles are moved into [`MapSurface::remove_marker`], so each one is released at most once.
pub trait MapSurface {
    /// Opaque reference to one rendered marker.
    type Handle;

    /// Make the surface ready to host markers.
    ///
    /// # Errors
    ///
    /// Returns a [`SurfaceError`] when the surface cannot be mounted.
    fn attach(&mut self) -> Result<(), SurfaceError>;

    /// Unmount the surface. Called after every marker was removed.
    fn detach(&mut self);

    /// Draw a new marker.
    ///
    /// # Errors
    ///
    /// Returns a [`SurfaceError`] when the marker cannot be drawn, e.g. for an invalid position.
    fn create_marker(
        &mut self,
        spec: &MarkerSpec,
        on_click: ClickCallback,
    ) -> Result<Self::Handle, SurfaceError>;

    /// Restyle, move, or rebind an existing marker in place.
    ///
    /// # Errors
    ///
    /// Returns a [`SurfaceError`] when the new values cannot be applied.
    fn update_marker(
        &mut self,
        handle: &Self::Handle,
        spec: &MarkerSpec,
        on_click: ClickCallback,
    ) -> Result<(), SurfaceError>;

    /// Remove a marker and release its handle.
    fn remove_marker(&mut self, handle: Self::Handle);

    /// Move the viewport so the region is visible, keeping `padding` pixels of margin.
    ///
    /// Called only when the region covering the rendered markers changes, so a
    /// viewport the user panned stays put while the marker set is stable.
    fn fit_bounds(&mut self, bounds: &Bounds, padding: u32);
}
