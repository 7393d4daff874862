use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::Config;
use crate::error::SmsGraphError;
use crate::graph::{GraphApi, NewSubscription};
use crate::store::{SubscriptionRecord, SubscriptionStore};

/// Inbox messages, the one resource this assistant watches.
pub const INBOX_RESOURCE: &str = "me/mailFolders('Inbox')/messages";

/// Drives the mail-notification subscription lifecycle: creation on demand,
/// renewal when the confirmed expiry enters the renewal window.
pub struct SubscriptionManager {
    graph: Arc<dyn GraphApi>,
    store: Arc<dyn SubscriptionStore>,
    notification_url: String,
    client_state: String,
    ttl_minutes: i64,
    renewal_window: chrono::Duration,
}

impl SubscriptionManager {
    pub fn new(config: &Config, graph: Arc<dyn GraphApi>, store: Arc<dyn SubscriptionStore>) -> Self {
        SubscriptionManager {
            graph,
            store,
            notification_url: config.notification_url(),
            client_state: config.client_state.clone(),
            ttl_minutes: config.subscription_ttl_minutes,
            renewal_window: config.renewal_window(),
        }
    }

    pub async fn create(&self) -> Result<SubscriptionRecord, SmsGraphError> {
        self.graph
            .create_subscription(NewSubscription {
                resource: INBOX_RESOURCE.into(),
                notification_url: self.notification_url.clone(),
                change_type: "created".into(),
                ttl_minutes: self.ttl_minutes,
                client_state: self.client_state.clone(),
            })
            .await
    }

    pub async fn renew(&self, subscription_id: &str) -> Result<SubscriptionRecord, SmsGraphError> {
        self.graph
            .renew_subscription(subscription_id, self.ttl_minutes)
            .await
    }

    pub fn list(&self) -> Result<Vec<SubscriptionRecord>, SmsGraphError> {
        self.store.list()
    }

    /// Subscriptions whose confirmed expiry falls inside the renewal window,
    /// including any already past it.
    pub fn renew_due(&self) -> Result<Vec<SubscriptionRecord>, SmsGraphError> {
        self.store.renew_due(self.renewal_window)
    }

    /// Renews everything due, isolating per-subscription failures so one bad
    /// subscription does not starve the rest. Returns the renewed count.
    pub async fn renew_all_due(&self) -> Result<usize, SmsGraphError> {
        let due = self.renew_due()?;
        let mut renewed = 0;
        for record in due {
            match self.renew(&record.subscription_id).await {
                Ok(updated) => {
                    info!(
                        "renewed subscription {} until {}",
                        updated.subscription_id, updated.expires_at
                    );
                    renewed += 1;
                }
                Err(e) => {
                    error!(
                        "failed to renew subscription {}: {e}",
                        record.subscription_id
                    );
                }
            }
        }
        Ok(renewed)
    }
}

/// Background loop that sweeps for due subscriptions at a fixed interval.
pub fn spawn_renewal_worker(
    manager: Arc<SubscriptionManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; catches anything that expired
        // while the process was down.
        loop {
            ticker.tick().await;
            match manager.renew_all_due().await {
                Ok(0) => {}
                Ok(n) => info!("renewal sweep renewed {n} subscription(s)"),
                Err(e) => error!("renewal sweep failed: {e}"),
            }
        }
    })
}
