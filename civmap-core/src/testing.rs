//! Recording fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::model::{
    Bounds, ChangeEvent, ChangeKind, ComplaintId, Coordinates, GeolocatedComplaint, Priority,
    Status,
};
use crate::ports::{
    ChangeCallback, ChangeFeedPort, ClickCallback, FeedToken, MapSurface, MarkerSpec, PortError,
    SurfaceError,
};

pub(crate) fn complaint(
    id: &str,
    status: Status,
    latitude: f64,
    longitude: f64,
) -> GeolocatedComplaint {
    GeolocatedComplaint {
        id: ComplaintId::from(id),
        tracking_id: Some(format!("CMP-{id}")),
        title: format!("complaint {id}"),
        status,
        priority: Priority::Medium,
        category: "road_damage".to_owned(),
        position: Coordinates::new(latitude, longitude),
        assigned_department_id: None,
    }
}

#[derive(Debug)]
pub(crate) struct TestMarker(pub(crate) u64);

#[derive(Default)]
pub(crate) struct SurfaceLog {
    pub(crate) attached: bool,
    pub(crate) attach_calls: usize,
    pub(crate) detach_calls: usize,
    pub(crate) creates: usize,
    pub(crate) updates: usize,
    pub(crate) removes: usize,
    pub(crate) fits: Vec<Bounds>,
    pub(crate) markers: HashMap<u64, (MarkerSpec, ClickCallback)>,
    next_id: u64,
}

impl SurfaceLog {
    pub(crate) fn marker_at(&self, position: Coordinates) -> Option<&(MarkerSpec, ClickCallback)> {
        self.markers
            .values()
            .find(|(spec, _)| spec.position == position)
    }
}

/// Map surface that records every call and rejects invalid coordinates.
#[derive(Clone, Default)]
pub(crate) struct RecordingSurface {
    log: Arc<Mutex<SurfaceLog>>,
}

impl RecordingSurface {
    pub(crate) fn log(&self) -> MutexGuard<'_, SurfaceLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MapSurface for RecordingSurface {
    type Handle = TestMarker;

    fn attach(&mut self) -> Result<(), SurfaceError> {
        let mut log = self.log();
        log.attached = true;
        log.attach_calls += 1;
        Ok(())
    }

    fn detach(&mut self) {
        let mut log = self.log();
        log.attached = false;
        log.detach_calls += 1;
    }

    fn create_marker(
        &mut self,
        spec: &MarkerSpec,
        on_click: ClickCallback,
    ) -> Result<TestMarker, SurfaceError> {
        if !spec.position.is_valid() {
            return Err(SurfaceError::invalid(spec.position));
        }
        let mut log = self.log();
        log.creates += 1;
        log.next_id += 1;
        let id = log.next_id;
        log.markers.insert(id, (spec.clone(), on_click));
        Ok(TestMarker(id))
    }

    fn update_marker(
        &mut self,
        handle: &TestMarker,
        spec: &MarkerSpec,
        on_click: ClickCallback,
    ) -> Result<(), SurfaceError> {
        if !spec.position.is_valid() {
            return Err(SurfaceError::invalid(spec.position));
        }
        let mut log = self.log();
        log.updates += 1;
        log.markers.insert(handle.0, (spec.clone(), on_click));
        Ok(())
    }

    fn remove_marker(&mut self, handle: TestMarker) {
        let mut log = self.log();
        log.removes += 1;
        log.markers.remove(&handle.0);
    }

    fn fit_bounds(&mut self, bounds: &Bounds, _padding: u32) {
        self.log().fits.push(*bounds);
    }
}

#[derive(Default)]
pub(crate) struct FeedLog {
    pub(crate) opens: usize,
    pub(crate) closes: Vec<FeedToken>,
    pub(crate) callbacks: HashMap<u64, ChangeCallback>,
    pub(crate) fail_open: bool,
    next_token: u64,
}

/// Change feed whose events are fired by hand.
#[derive(Clone, Default)]
pub(crate) struct ManualFeed {
    log: Arc<Mutex<FeedLog>>,
}

impl ManualFeed {
    pub(crate) fn log(&self) -> MutexGuard<'_, FeedLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, kind: ChangeKind) {
        let callbacks: Vec<ChangeCallback> = self.log().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback(ChangeEvent { kind });
        }
    }

    /// Forget every callback, as a dropped transport would.
    pub(crate) fn sever(&self) {
        self.log().callbacks.clear();
    }
}

#[async_trait]
impl ChangeFeedPort for ManualFeed {
    async fn open(
        &self,
        channel: &str,
        on_change: ChangeCallback,
    ) -> Result<FeedToken, PortError> {
        let mut log = self.log();
        if log.fail_open {
            return Err(PortError::ChannelClosed(channel.to_owned()));
        }
        log.opens += 1;
        log.next_token += 1;
        let token = log.next_token;
        log.callbacks.insert(token, on_change);
        Ok(FeedToken(token))
    }

    fn close(&self, token: FeedToken) {
        let mut log = self.log();
        log.closes.push(token);
        log.callbacks.remove(&token.0);
    }
}
