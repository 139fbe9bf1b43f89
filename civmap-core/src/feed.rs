//! Change feed subscription with an explicit lifecycle.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::model::ChangeEvent;
use crate::ports::{ChangeCallback, ChangeFeedPort, FeedToken, SyncError};

/// Channel the admin dashboard listens on unless configured otherwise.
pub const DEFAULT_CHANNEL: &str = "admin-complaints";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Where a [`ChangeFeedSubscriber`] is in its lifecycle.
pub enum SubscriptionState {
    /// No subscription held.
    Unsubscribed,
    /// Waiting for the feed to acknowledge.
    Subscribing,
    /// Events are being delivered.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Proof of an active subscription, consumed by [`ChangeFeedSubscriber::unsubscribe`].
pub struct SubscriptionHandle {
    token: FeedToken,
}

/// Holds at most one subscription on a named channel.
///
/// Every event is forwarded to the `on_change` callback as a bare trigger,
/// whatever row or field it concerns. Dropping the subscriber closes any
/// active subscription.
pub struct ChangeFeedSubscriber {
    port: Arc<dyn ChangeFeedPort>,
    channel: String,
    state: SubscriptionState,
    active: Option<FeedToken>,
}

impl ChangeFeedSubscriber {
    /// Create an unsubscribed subscriber for `channel`.
    #[must_use]
    pub fn new<C: Into<String>>(port: Arc<dyn ChangeFeedPort>, channel: C) -> Self {
        Self {
            port,
            channel: channel.into(),
            state: SubscriptionState::Unsubscribed,
            active: None,
        }
    }

    /// Logical channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Open the subscription. An already active subscription is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SubscriptionDropped`] when the feed refuses the
    /// subscription; the subscriber is then back to `Unsubscribed`.
    pub async fn subscribe<F>(&mut self, on_change: F) -> Result<SubscriptionHandle, SyncError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Some(token) = self.active.take() {
            debug!(channel = %self.channel, "Replacing active subscription");
            self.port.close(token);
        }

        self.state = SubscriptionState::Subscribing;
        let channel = self.channel.clone();
        let callback: ChangeCallback = Arc::new(move |event: ChangeEvent| {
            trace!(channel = %channel, kind = ?event.kind, "Complaint change received");
            on_change();
        });

        match self.port.open(&self.channel, callback).await {
            Ok(token) => {
                self.state = SubscriptionState::Active;
                self.active = Some(token);
                info!(channel = %self.channel, "Subscribed to complaint changes");
                Ok(SubscriptionHandle { token })
            }
            Err(err) => {
                self.state = SubscriptionState::Unsubscribed;
                warn!(
                    channel = %self.channel,
                    error = %err,
                    "Could not subscribe to complaint changes"
                );
                Err(SyncError::SubscriptionDropped {
                    channel: self.channel.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Close the subscription. Calling it again, or with a stale handle, does nothing.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        if self.active != Some(handle.token) {
            debug!(channel = %self.channel, "Subscription already closed");
            return;
        }
        self.active = None;
        self.state = SubscriptionState::Unsubscribed;
        self.port.close(handle.token);
        info!(channel = %self.channel, "Unsubscribed from complaint changes");
    }
}

impl Drop for ChangeFeedSubscriber {
    fn drop(&mut self) {
        if let Some(token) = self.active.take() {
            self.port.close(token);
        }
    }
}
