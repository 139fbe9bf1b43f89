//! Incremental marker reconciliation.
//!
//! Each pass diffs a fresh snapshot against the markers already on the
//! surface: stale markers are removed, changed ones are patched in place, new
//! ones are created. Markers whose complaint did not change are not touched,
//! so repeated passes over the same snapshot cause no flicker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::{Bounds, ComplaintId, GeolocatedComplaint};
use crate::palette::{MarkerStyle, popup_text};
use crate::ports::{ClickCallback, MapSurface, MarkerSpec, SyncError};

/// Margin kept around the markers when the viewport is fitted, in pixels.
pub const DEFAULT_FIT_PADDING: u32 = 50;

/// Receives the full complaint when its marker is activated.
pub type MarkerClickHandler = Arc<dyn Fn(&GeolocatedComplaint) + Send + Sync>;

struct RenderedMarker<H> {
    handle: H,
    rendered: GeolocatedComplaint,
}

/// Markers currently on the surface and the last fitted viewport.
pub struct MapViewState<H> {
    rendered: HashMap<ComplaintId, RenderedMarker<H>>,
    viewport: Option<Bounds>,
}

impl<H> MapViewState<H> {
    fn new() -> Self {
        Self {
            rendered: HashMap::new(),
            viewport: None,
        }
    }

    /// Number of rendered markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    /// Whether no marker is rendered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    /// Whether a marker exists for the complaint.
    #[must_use]
    pub fn contains(&self, id: &ComplaintId) -> bool {
        self.rendered.contains_key(id)
    }

    /// Ids with a rendered marker, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &ComplaintId> {
        self.rendered.keys()
    }

    /// Complaint as it was last drawn.
    #[must_use]
    pub fn rendered(&self, id: &ComplaintId) -> Option<&GeolocatedComplaint> {
        self.rendered.get(id).map(|marker| &marker.rendered)
    }

    /// Surface handle of a rendered marker.
    #[must_use]
    pub fn handle(&self, id: &ComplaintId) -> Option<&H> {
        self.rendered.get(id).map(|marker| &marker.handle)
    }

    /// Last region the surface was asked to fit.
    #[must_use]
    pub fn viewport(&self) -> Option<Bounds> {
        self.viewport
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// What one reconciliation pass did to the surface.
pub struct ReconcileSummary {
    /// Markers created.
    pub created: usize,
    /// Markers patched in place.
    pub updated: usize,
    /// Markers removed.
    pub removed: usize,
    /// Markers left alone.
    pub unchanged: usize,
    /// Complaints whose marker could not be rendered.
    pub failed: Vec<ComplaintId>,
    /// Whether the viewport was refitted.
    pub viewport_fitted: bool,
}

impl ReconcileSummary {
    /// Whether the pass touched any marker.
    #[must_use]
    pub fn changed_markers(&self) -> bool {
        self.created + self.updated + self.removed > 0
    }
}

/// Keeps a [`MapSurface`] in step with complaint snapshots.
///
/// The reconciler exclusively owns every marker handle it creates. Handles
/// are released when their complaint leaves the snapshot, on
/// [`MarkerReconciler::teardown`], or when the reconciler is dropped.
pub struct MarkerReconciler<S: MapSurface> {
    surface: S,
    state: MapViewState<S::Handle>,
    on_click: MarkerClickHandler,
    padding: u32,
}

impl<S: MapSurface> MarkerReconciler<S> {
    /// Create a reconciler drawing on `surface` and reporting clicks to `on_click`.
    pub fn new(surface: S, on_click: MarkerClickHandler) -> Self {
        Self {
            surface,
            state: MapViewState::new(),
            on_click,
            padding: DEFAULT_FIT_PADDING,
        }
    }

    /// Use a different viewport padding.
    #[must_use]
    pub fn with_padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }

    /// The surface being drawn on.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Mutable access to the surface, e.g. to forward user input.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Current view state.
    pub fn state(&self) -> &MapViewState<S::Handle> {
        &self.state
    }

    /// Run one diff-and-patch pass against `next`.
    ///
    /// Duplicate ids in `next` are tolerated; the last occurrence wins. A
    /// marker the surface refuses is skipped and listed in
    /// [`ReconcileSummary::failed`]. An empty snapshot leaves the viewport alone.
    pub fn reconcile(&mut self, next: &[GeolocatedComplaint]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let latest = last_occurrence_wins(next);
        let next_ids: HashSet<&ComplaintId> =
            latest.iter().map(|complaint| &complaint.id).collect();

        let stale: Vec<ComplaintId> = self
            .state
            .rendered
            .keys()
            .filter(|id| !next_ids.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(marker) = self.state.rendered.remove(&id) {
                debug!(complaint_id = %id, "Removing marker");
                self.surface.remove_marker(marker.handle);
                summary.removed += 1;
            }
        }

        for complaint in latest {
            if let Some(marker) = self.state.rendered.get_mut(&complaint.id) {
                if marker.rendered == *complaint {
                    summary.unchanged += 1;
                    continue;
                }

                let spec = marker_spec(complaint);
                let on_click = click_binding(&self.on_click, complaint);
                match self.surface.update_marker(&marker.handle, &spec, on_click) {
                    Ok(()) => {
                        marker.rendered = complaint.clone();
                        summary.updated += 1;
                        continue;
                    }
                    Err(source) => {
                        let error = SyncError::MarkerCreateFailed {
                            id: complaint.id.clone(),
                            source,
                        };
                        warn!(
                            complaint_id = %complaint.id,
                            error = %error,
                            "Dropping marker that could not be updated"
                        );
                    }
                }

                // a marker we cannot update would show stale colors
                if let Some(stale) = self.state.rendered.remove(&complaint.id) {
                    self.surface.remove_marker(stale.handle);
                    summary.removed += 1;
                }
                summary.failed.push(complaint.id.clone());
                continue;
            }

            let spec = marker_spec(complaint);
            let on_click = click_binding(&self.on_click, complaint);
            match self.surface.create_marker(&spec, on_click) {
                Ok(handle) => {
                    self.state.rendered.insert(
                        complaint.id.clone(),
                        RenderedMarker {
                            handle,
                            rendered: complaint.clone(),
                        },
                    );
                    summary.created += 1;
                }
                Err(source) => {
                    let error = SyncError::MarkerCreateFailed {
                        id: complaint.id.clone(),
                        source,
                    };
                    warn!(complaint_id = %complaint.id, error = %error, "Skipping marker");
                    summary.failed.push(complaint.id.clone());
                }
            }
        }

        if !next.is_empty() {
            let covering = Bounds::covering(
                self.state
                    .rendered
                    .values()
                    .map(|marker| marker.rendered.position),
            );
            if let Some(bounds) = covering
                && self.state.viewport != Some(bounds)
            {
                self.surface.fit_bounds(&bounds, self.padding);
                self.state.viewport = Some(bounds);
                summary.viewport_fitted = true;
            }
        }

        summary
    }

    /// Remove every marker and release its handle. Returns how many were released.
    pub fn teardown(&mut self) -> usize {
        let released = self.state.rendered.len();
        for (id, marker) in self.state.rendered.drain() {
            debug!(complaint_id = %id, "Releasing marker");
            self.surface.remove_marker(marker.handle);
        }
        self.state.viewport = None;
        released
    }
}

impl<S: MapSurface> Drop for MarkerReconciler<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Build the surface description for a complaint.
#[must_use]
pub fn marker_spec(complaint: &GeolocatedComplaint) -> MarkerSpec {
    MarkerSpec {
        position: complaint.position,
        style: MarkerStyle::for_complaint(complaint),
        popup: popup_text(complaint),
    }
}

fn click_binding(handler: &MarkerClickHandler, complaint: &GeolocatedComplaint) -> ClickCallback {
    let handler = Arc::clone(handler);
    let complaint = complaint.clone();
    Arc::new(move || handler(&complaint))
}

/// Collapse duplicate ids, keeping the first position and the last value.
fn last_occurrence_wins(next: &[GeolocatedComplaint]) -> Vec<&GeolocatedComplaint> {
    let mut slots: HashMap<&ComplaintId, usize> = HashMap::with_capacity(next.len());
    let mut latest: Vec<&GeolocatedComplaint> = Vec::with_capacity(next.len());

    for complaint in next {
        if let Some(&slot) = slots.get(&complaint.id) {
            warn!(
                complaint_id = %complaint.id,
                "Duplicate complaint in snapshot, keeping the last one"
            );
            if let Some(entry) = latest.get_mut(slot) {
                *entry = complaint;
            }
        } else {
            slots.insert(&complaint.id, latest.len());
            latest.push(complaint);
        }
    }

    latest
}
