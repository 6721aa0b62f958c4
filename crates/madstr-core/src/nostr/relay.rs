use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::{broadcast, mpsc, watch, RwLock};

use crate::constants::PROFILE_FETCH_TIMEOUT_SECS;
use crate::error::TransportError;

use super::transport::{SubscribeOptions, Subscription, SubscriptionNotice, Transport};

/// EOSE and CLOSED reports of the individual relays a REQ went to.
///
/// End-of-stored-events is forwarded once every relay has sent EOSE or
/// closed; `Closed` only once every relay has closed.
#[derive(Debug, Default)]
struct RelayTally {
    /// Relays that accepted the REQ; unknown until subscribe returns
    expected: Option<HashSet<RelayUrl>>,
    eose: HashSet<RelayUrl>,
    closed: HashMap<RelayUrl, String>,
    eose_forwarded: bool,
}

impl RelayTally {
    fn set_expected(&mut self, relays: HashSet<RelayUrl>) -> Vec<SubscriptionNotice> {
        self.expected = Some(relays);
        self.due()
    }

    fn record_eose(&mut self, relay: RelayUrl) -> Vec<SubscriptionNotice> {
        self.eose.insert(relay);
        self.due()
    }

    fn record_closed(&mut self, relay: RelayUrl, reason: String) -> Vec<SubscriptionNotice> {
        self.closed.insert(relay, reason);
        self.due()
    }

    fn due(&mut self) -> Vec<SubscriptionNotice> {
        let Some(expected) = &self.expected else {
            return Vec::new();
        };

        if expected.iter().all(|relay| self.closed.contains_key(relay)) {
            let mut reasons: Vec<&str> = expected
                .iter()
                .filter_map(|relay| self.closed.get(relay))
                .map(String::as_str)
                .collect();
            reasons.sort_unstable();
            reasons.dedup();
            return vec![SubscriptionNotice::Closed(reasons.join("; "))];
        }

        let finished = expected
            .iter()
            .all(|relay| self.eose.contains(relay) || self.closed.contains_key(relay));
        if !self.eose_forwarded && finished {
            self.eose_forwarded = true;
            return vec![SubscriptionNotice::EndOfStoredEvents];
        }
        Vec::new()
    }
}

/// Per-subscription delivery channel
struct Route {
    tx: mpsc::UnboundedSender<SubscriptionNotice>,
    tally: RelayTally,
}

type Routes = Arc<RwLock<HashMap<SubscriptionId, Route>>>;

/// [`Transport`] backed by a `nostr_sdk::Client` relay pool.
///
/// A single notification handler task demultiplexes pool notifications onto
/// the channel of the subscription they belong to.
pub struct RelayTransport {
    client: Client,
    routes: Routes,
    cancel_tx: watch::Sender<bool>,
    fetch_timeout: Duration,
}

impl RelayTransport {
    /// Add `relay_urls`, connect, and wait until at least one relay is up.
    pub async fn connect(relay_urls: &[String], connect_timeout: Duration) -> Result<Self> {
        let client = Client::default();
        for url in relay_urls {
            client.add_relay(url).await?;
        }

        tracing::info!(relays = relay_urls.len(), "Starting relay connect...");
        let connect_start = Instant::now();
        if tokio::time::timeout(connect_timeout, client.connect())
            .await
            .is_err()
        {
            tracing::warn!(elapsed = ?connect_start.elapsed(), "Connect TIMED OUT");
            return Err(anyhow::anyhow!(
                "Connection timed out after {:?}",
                connect_start.elapsed()
            ));
        }

        // Relay status transitions asynchronously after connect() returns
        let verify_start = Instant::now();
        let verify_timeout = Duration::from_secs(5);
        let poll_interval = Duration::from_millis(100);

        loop {
            let relays = client.relays().await;
            let connected_count = relays
                .values()
                .filter(|r| r.status() == RelayStatus::Connected)
                .count();

            if connected_count > 0 {
                tracing::info!(
                    connected = connected_count,
                    elapsed = ?verify_start.elapsed(),
                    "Verified relay connection"
                );
                break;
            }

            if verify_start.elapsed() >= verify_timeout {
                return Err(anyhow::anyhow!(
                    "No relays connected after {:?} verification timeout",
                    verify_timeout
                ));
            }

            tokio::time::sleep(poll_interval).await;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));
        spawn_notification_handler(client.clone(), routes.clone(), cancel_rx);

        Ok(Self {
            client,
            routes,
            cancel_tx,
            fetch_timeout: Duration::from_secs(PROFILE_FETCH_TIMEOUT_SECS),
        })
    }

    /// Stop the notification handler and disconnect from every relay
    pub async fn shutdown(&self) {
        let _ = self.cancel_tx.send(true);
        self.routes.write().await.clear();
        let _ = self.client.shutdown().await;
        tracing::info!("Relay transport shut down");
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn subscribe(
        &self,
        filter: Filter,
        options: SubscribeOptions,
    ) -> Result<Subscription, TransportError> {
        let id = SubscriptionId::generate();
        let (tx, notices) = mpsc::unbounded_channel();

        // Route first so nothing delivered right after the REQ is lost
        self.routes.write().await.insert(
            id.clone(),
            Route {
                tx,
                tally: RelayTally::default(),
            },
        );

        let auto_close = options.close_on_eose.then(|| {
            SubscribeAutoCloseOptions::default().exit_policy(ReqExitPolicy::ExitOnEOSE)
        });

        let output = match self
            .client
            .subscribe_with_id(id.clone(), filter.clone(), auto_close)
            .await
        {
            Ok(output) if !output.success.is_empty() => output,
            Ok(output) => {
                self.routes.write().await.remove(&id);
                return Err(TransportError::Subscribe(format!(
                    "no relay accepted the subscription ({} failed)",
                    output.failed.len()
                )));
            }
            Err(e) => {
                // Rollback on failure
                self.routes.write().await.remove(&id);
                return Err(TransportError::Subscribe(e.to_string()));
            }
        };

        tracing::debug!(
            subscription = %id,
            relays = output.success.len(),
            failed = output.failed.len(),
            filter = %serde_json::to_string(&filter).unwrap_or_default(),
            "Subscribed"
        );

        // Relays may have answered before the count was known
        let due = match self.routes.write().await.get_mut(&id) {
            Some(route) => route.tally.set_expected(output.success.clone()),
            None => Vec::new(),
        };
        forward(&self.routes, &id, due).await;

        Ok(Subscription { id, notices })
    }

    /// Always sends CLOSE to the pool, even when the route is already gone,
    /// so relays that kept the REQ open after others closed it release it.
    async fn unsubscribe(&self, id: &SubscriptionId) {
        self.routes.write().await.remove(id);
        let _ = self.client.unsubscribe(id).await;
        tracing::debug!(subscription = %id, "Unsubscribed");
    }

    async fn fetch_profile(&self, author: PublicKey) -> Result<Option<Event>, TransportError> {
        let filter = Filter::new().kind(Kind::Metadata).author(author).limit(1);
        let events = self
            .client
            .fetch_events(filter, self.fetch_timeout)
            .await
            .map_err(|e| TransportError::Fetch(e.to_string()))?;

        Ok(events.into_iter().max_by_key(|event| event.created_at))
    }
}

fn spawn_notification_handler(client: Client, routes: Routes, mut cancel_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut notifications = client.notifications();
        tracing::debug!("Notification handler started, waiting for events...");

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        tracing::debug!("Notification handler received cancellation signal, exiting");
                        break;
                    }
                }
                result = notifications.recv() => {
                    match result {
                        Ok(RelayPoolNotification::Event { relay_url, subscription_id, event }) => {
                            tracing::trace!(
                                kind = event.kind.as_u16(),
                                id = %event.id,
                                relay = %relay_url,
                                "Received event"
                            );
                            deliver(&routes, &subscription_id, SubscriptionNotice::Event(event)).await;
                        }
                        Ok(RelayPoolNotification::Message { relay_url, message }) => match message {
                            RelayMessage::EndOfStoredEvents(sub_id) => {
                                let sub_id = SubscriptionId::clone(&sub_id);
                                tracing::debug!(subscription = %sub_id, relay = %relay_url, "EOSE");
                                let due = match routes.write().await.get_mut(&sub_id) {
                                    Some(route) => route.tally.record_eose(relay_url),
                                    None => Vec::new(),
                                };
                                forward(&routes, &sub_id, due).await;
                            }
                            RelayMessage::Closed { subscription_id, message } => {
                                let sub_id = SubscriptionId::clone(&subscription_id);
                                tracing::warn!(subscription = %sub_id, relay = %relay_url, reason = %message, "Subscription closed by relay");
                                let due = match routes.write().await.get_mut(&sub_id) {
                                    Some(route) => route.tally.record_closed(relay_url, message.to_string()),
                                    None => Vec::new(),
                                };
                                forward(&routes, &sub_id, due).await;
                            }
                            _ => {}
                        },
                        Ok(RelayPoolNotification::Shutdown) => {
                            tracing::debug!("Notification handler received relay pool shutdown, exiting");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Notification handler lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Notification channel closed, handler exiting");
                            break;
                        }
                    }
                }
            }
        }

        // Wake every remaining subscriber with a closed channel
        routes.write().await.clear();
        tracing::debug!("Notification handler stopped");
    });
}

async fn deliver(routes: &Routes, id: &SubscriptionId, notice: SubscriptionNotice) {
    let receiver_gone = match routes.read().await.get(id) {
        Some(route) => route.tx.send(notice).is_err(),
        None => false,
    };
    if receiver_gone {
        routes.write().await.remove(id);
    }
}

/// Deliver notices released by the tally; the route ends with `Closed`
async fn forward(routes: &Routes, id: &SubscriptionId, notices: Vec<SubscriptionNotice>) {
    for notice in notices {
        let finished = matches!(notice, SubscriptionNotice::Closed(_));
        deliver(routes, id, notice).await;
        if finished {
            routes.write().await.remove(id);
        }
    }
}
