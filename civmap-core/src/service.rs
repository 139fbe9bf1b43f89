//! Map sync service: wires the loader, the change feed, and the reconciler
//! together for one attached map surface.

use std::future;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::feed::{ChangeFeedSubscriber, DEFAULT_CHANNEL, SubscriptionHandle, SubscriptionState};
use crate::loader::SnapshotLoader;
use crate::model::{GeolocatedComplaint, SnapshotFilter, SnapshotStats};
use crate::ports::{ChangeFeedPort, MapSurface, SnapshotPort, SyncError};
use crate::reconcile::{
    DEFAULT_FIT_PADDING, MapViewState, MarkerClickHandler, MarkerReconciler, ReconcileSummary,
};

#[derive(Debug, Clone)]
/// Settings for one map sync service.
pub struct SyncConfig {
    /// Change feed channel to listen on.
    pub channel: String,
    /// Viewport padding in pixels.
    pub fit_padding: u32,
    /// Filter used until [`MapSyncService::refresh`] picks another.
    pub initial_filter: SnapshotFilter,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_owned(),
            fit_padding: DEFAULT_FIT_PADDING,
            initial_filter: SnapshotFilter::all(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why a snapshot fetch was started.
pub enum RefreshCause {
    /// First load after attaching.
    Initial,
    /// The change feed reported a change.
    ChangeFeed,
    /// A caller asked for it, e.g. after switching filters.
    Requested,
}

#[derive(Debug)]
/// Progress reported by [`MapSyncService::next_event`].
pub enum SyncEvent {
    /// A fetch was queued because the feed reported changes.
    RefreshStarted {
        /// Generation of the new fetch.
        generation: u64,
        /// Feed events folded into this fetch.
        coalesced: usize,
    },
    /// A snapshot was reconciled onto the surface.
    Applied {
        /// Generation of the applied fetch.
        generation: u64,
        /// What changed on the surface.
        summary: ReconcileSummary,
        /// Buckets of the applied snapshot.
        stats: SnapshotStats,
    },
    /// A fetch finished after a newer one was applied and was dropped.
    Superseded {
        /// Generation of the dropped fetch.
        generation: u64,
    },
    /// A fetch failed; the surface keeps its previous markers.
    FetchFailed {
        /// Generation of the failed fetch.
        generation: u64,
        /// Why it failed.
        error: SyncError,
    },
    /// The change feed went away. Call [`MapSyncService::resubscribe`] to recreate it.
    FeedClosed {
        /// Always [`SyncError::SubscriptionDropped`].
        error: SyncError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Resources released by [`MapSyncService::detach`].
pub struct DetachReport {
    /// Marker handles released.
    pub released_markers: usize,
    /// Whether an active subscription was closed.
    pub unsubscribed: bool,
    /// Fetches whose results will never be applied.
    pub cancelled_fetches: usize,
}

type FetchOutcome = (u64, Result<Vec<GeolocatedComplaint>, SyncError>);

/// Keeps one map surface synchronized with the complaint backend.
///
/// Reconciliation passes run on the caller's task inside
/// [`MapSyncService::next_event`], one at a time and in generation order;
/// a fetch that completes after a newer snapshot was applied is dropped.
/// Detaching, explicitly or by dropping the service, cancels in-flight
/// fetches, closes the subscription, and releases every marker handle.
pub struct MapSyncService<S: MapSurface> {
    loader: SnapshotLoader,
    subscriber: ChangeFeedSubscriber,
    subscription: Option<SubscriptionHandle>,
    changes: Option<UnboundedReceiver<()>>,
    reconciler: MarkerReconciler<S>,
    filter: SnapshotFilter,
    in_flight: JoinSet<FetchOutcome>,
    next_generation: u64,
    applied_generation: u64,
    stats: SnapshotStats,
    shut_down: bool,
}

impl<S: MapSurface> MapSyncService<S> {
    /// Attach `surface`, subscribe to the feed, and queue the first snapshot fetch.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AttachFailed`] when the surface cannot be attached
    /// and [`SyncError::SubscriptionDropped`] when the feed refuses the
    /// subscription. In the latter case the surface is detached again.
    pub async fn attach(
        mut surface: S,
        snapshots: Arc<dyn SnapshotPort>,
        feed: Arc<dyn ChangeFeedPort>,
        on_marker_click: MarkerClickHandler,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        surface.attach().map_err(SyncError::AttachFailed)?;

        let mut service = Self {
            loader: SnapshotLoader::new(snapshots),
            subscriber: ChangeFeedSubscriber::new(feed, config.channel),
            subscription: None,
            changes: None,
            reconciler: MarkerReconciler::new(surface, on_marker_click)
                .with_padding(config.fit_padding),
            filter: config.initial_filter,
            in_flight: JoinSet::new(),
            next_generation: 0,
            applied_generation: 0,
            stats: SnapshotStats::default(),
            shut_down: false,
        };

        service.resubscribe().await?;
        service.spawn_fetch(RefreshCause::Initial);
        Ok(service)
    }

    /// Force a fetch outside the change feed cadence, optionally switching filters.
    ///
    /// Switching to a different filter cancels fetches still running for the
    /// old one. Returns the generation of the new fetch.
    pub fn refresh(&mut self, filter: Option<SnapshotFilter>) -> u64 {
        if let Some(filter) = filter
            && filter != self.filter
        {
            let cancelled = self.in_flight.len();
            self.in_flight.abort_all();
            self.in_flight.detach_all();
            debug!(cancelled, ?filter, "Filter changed");
            self.filter = filter;
        }
        self.spawn_fetch(RefreshCause::Requested)
    }

    /// Drop the current subscription, if any, and open a new one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SubscriptionDropped`] when the feed refuses the subscription.
    pub async fn resubscribe(&mut self) -> Result<(), SyncError> {
        if let Some(handle) = self.subscription.take() {
            self.subscriber.unsubscribe(&handle);
        }
        self.changes = None;

        let (sender, receiver) = unbounded_channel();
        let handle = self
            .subscriber
            .subscribe(move || {
                if sender.send(()).is_err() {
                    debug!("Change received after the map sync service went away");
                }
            })
            .await?;

        self.subscription = Some(handle);
        self.changes = Some(receiver);
        Ok(())
    }

    /// Wait for the next thing that happens and apply it.
    ///
    /// Change notifications start a fetch; finished fetches are reconciled
    /// onto the surface. Returns `None` once there is no feed and no fetch
    /// left to wait for. Cancel safe: dropping the future loses nothing.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        loop {
            let feed_open = self.changes.is_some();
            let fetching = !self.in_flight.is_empty();
            if !feed_open && !fetching {
                return None;
            }

            tokio::select! {
                change = recv_change(&mut self.changes), if feed_open => {
                    if change.is_some() {
                        let coalesced = 1 + self.drain_pending_changes();
                        let generation = self.spawn_fetch(RefreshCause::ChangeFeed);
                        return Some(SyncEvent::RefreshStarted { generation, coalesced });
                    }
                    return Some(self.feed_closed());
                }
                Some(joined) = self.in_flight.join_next(), if fetching => {
                    match joined {
                        Ok((generation, outcome)) => {
                            return Some(self.complete(generation, outcome));
                        }
                        Err(err) if err.is_cancelled() => {}
                        Err(err) => warn!(error = %err, "Snapshot fetch task failed"),
                    }
                }
                else => return None,
            }
        }
    }

    /// Tear the map down: cancel fetches, unsubscribe, release every marker, detach the surface.
    pub fn detach(mut self) -> DetachReport {
        self.shutdown()
    }

    /// Filter used for fetches.
    #[must_use]
    pub fn filter(&self) -> &SnapshotFilter {
        &self.filter
    }

    /// Buckets of the last applied snapshot.
    #[must_use]
    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    /// Markers currently rendered.
    #[must_use]
    pub fn view(&self) -> &MapViewState<S::Handle> {
        self.reconciler.state()
    }

    /// Lifecycle state of the change feed subscription.
    #[must_use]
    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscriber.state()
    }

    /// Generation of the snapshot currently shown, `0` before the first one.
    #[must_use]
    pub fn applied_generation(&self) -> u64 {
        self.applied_generation
    }

    /// Number of fetches still running.
    #[must_use]
    pub fn pending_fetches(&self) -> usize {
        self.in_flight.len()
    }

    /// The surface being drawn on.
    pub fn surface(&self) -> &S {
        self.reconciler.surface()
    }

    /// Mutable access to the surface, e.g. to forward user input.
    pub fn surface_mut(&mut self) -> &mut S {
        self.reconciler.surface_mut()
    }

    fn spawn_fetch(&mut self, cause: RefreshCause) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let loader = self.loader.clone();
        let filter = self.filter.clone();

        debug!(generation, ?cause, "Fetching complaint snapshot");
        self.in_flight.spawn(async move {
            let outcome = loader.fetch_snapshot(Some(&filter)).await;
            (generation, outcome)
        });
        generation
    }

    fn drain_pending_changes(&mut self) -> usize {
        let Some(changes) = self.changes.as_mut() else {
            return 0;
        };
        let mut drained = 0;
        while changes.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    fn feed_closed(&mut self) -> SyncEvent {
        self.changes = None;
        if let Some(handle) = self.subscription.take() {
            self.subscriber.unsubscribe(&handle);
        }
        let channel = self.subscriber.channel().to_owned();
        warn!(channel = %channel, "Complaint change feed closed");
        SyncEvent::FeedClosed {
            error: SyncError::SubscriptionDropped {
                channel,
                reason: "feed closed".to_owned(),
            },
        }
    }

    fn complete(
        &mut self,
        generation: u64,
        outcome: Result<Vec<GeolocatedComplaint>, SyncError>,
    ) -> SyncEvent {
        if generation <= self.applied_generation {
            debug!(
                generation,
                applied = self.applied_generation,
                "Dropping stale snapshot"
            );
            return SyncEvent::Superseded { generation };
        }

        match outcome {
            Ok(snapshot) => {
                self.applied_generation = generation;
                let summary = self.reconciler.reconcile(&snapshot);
                self.stats = SnapshotStats::from_snapshot(&snapshot);
                info!(
                    generation,
                    markers = self.reconciler.state().len(),
                    created = summary.created,
                    updated = summary.updated,
                    removed = summary.removed,
                    failed = summary.failed.len(),
                    "Snapshot applied"
                );
                SyncEvent::Applied {
                    generation,
                    summary,
                    stats: self.stats.clone(),
                }
            }
            Err(error) => {
                warn!(
                    generation,
                    error = %error,
                    "Snapshot refresh failed, keeping current markers"
                );
                SyncEvent::FetchFailed { generation, error }
            }
        }
    }

    fn shutdown(&mut self) -> DetachReport {
        if self.shut_down {
            return DetachReport::default();
        }
        self.shut_down = true;

        let cancelled_fetches = self.in_flight.len();
        self.in_flight.abort_all();
        self.changes = None;

        let unsubscribed = match self.subscription.take() {
            Some(handle) => {
                self.subscriber.unsubscribe(&handle);
                true
            }
            None => false,
        };

        let released_markers = self.reconciler.teardown();
        self.reconciler.surface_mut().detach();

        info!(
            released_markers,
            unsubscribed, cancelled_fetches, "Map surface detached"
        );
        DetachReport {
            released_markers,
            unsubscribed,
            cancelled_fetches,
        }
    }
}

impl<S: MapSurface> Drop for MapSyncService<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn recv_change(changes: &mut Option<UnboundedReceiver<()>>) -> Option<()> {
    match changes {
        Some(receiver) => receiver.recv().await,
        None => future::pending().await,
    }
}
