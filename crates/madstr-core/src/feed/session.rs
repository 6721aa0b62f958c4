//! Session lifecycle.
//!
//! A [`FeedSession`] owns the reply subscription, the profile-update
//! subscription and the per-session state behind them. Any change of
//! transport, anchor or author set tears the current session down completely
//! before a new one is built, so nothing from an old session can reach the
//! new one.

use std::collections::BTreeSet;
use std::sync::Arc;

use nostr_sdk::prelude::*;
use tokio::sync::{mpsc, watch};

use crate::config::FeedConfig;
use crate::constants::kinds;
use crate::error::FeedError;
use crate::nostr::{decode_anchor, SubscribeOptions, Subscription, SubscriptionNotice, Transport};
use crate::store::ProfileCache;

use super::replies::{profile_update_filter, reply_filter, ReplyFeed};
use super::resolver::{ProfileResolver, ResolverEvent};
use super::snapshot::{FeedSnapshot, FeedStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session: missing transport or anchor, or stopped
    #[default]
    Idle,
    /// Decoding the anchor and opening subscriptions
    Resolving,
    Active,
    /// The anchor could not be used; waits for a new anchor
    Invalid(FeedError),
}

/// Inputs accepted by [`FeedSession::run`]
pub enum FeedCommand {
    AttachTransport(Arc<dyn Transport>),
    DetachTransport,
    /// Raw anchor reference, an `nevent` with or without `nostr:` prefix
    SetAnchor(String),
    SetAuthors(Vec<String>),
    Stop,
    Shutdown,
}

impl std::fmt::Debug for FeedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedCommand::AttachTransport(_) => write!(f, "AttachTransport"),
            FeedCommand::DetachTransport => write!(f, "DetachTransport"),
            FeedCommand::SetAnchor(anchor) => write!(f, "SetAnchor({anchor})"),
            FeedCommand::SetAuthors(authors) => write!(f, "SetAuthors({} authors)", authors.len()),
            FeedCommand::Stop => write!(f, "Stop"),
            FeedCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// State that only exists while a session is active. Dropped as a whole on
/// teardown.
struct ActiveSession {
    epoch: u64,
    anchor_id: EventId,
    feed: ReplyFeed,
    resolver: ProfileResolver,
    /// Set once every relay closed the reply subscription
    replies_closed: Option<String>,
}

struct ProfileUpdates {
    subscription: Subscription,
    authors: BTreeSet<String>,
}

pub struct FeedSession {
    config: FeedConfig,
    cache: Arc<dyn ProfileCache>,
    transport: Option<Arc<dyn Transport>>,
    anchor_input: Option<String>,
    authors: BTreeSet<String>,
    phase: SessionPhase,
    next_epoch: u64,
    active: Option<ActiveSession>,
    reply_sub: Option<Subscription>,
    profile_sub: Option<ProfileUpdates>,
    resolver_tx: mpsc::UnboundedSender<ResolverEvent>,
    resolver_rx: mpsc::UnboundedReceiver<ResolverEvent>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    dirty: bool,
}

impl FeedSession {
    pub fn new(
        config: FeedConfig,
        cache: Arc<dyn ProfileCache>,
    ) -> (Self, watch::Receiver<FeedSnapshot>) {
        let (resolver_tx, resolver_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::default());
        let session = Self {
            config,
            cache,
            transport: None,
            anchor_input: None,
            authors: BTreeSet::new(),
            phase: SessionPhase::Idle,
            next_epoch: 1,
            active: None,
            reply_sub: None,
            profile_sub: None,
            resolver_tx,
            resolver_rx,
            snapshot_tx,
            dirty: false,
        };
        (session, snapshot_rx)
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn anchor_id(&self) -> Option<EventId> {
        self.active.as_ref().map(|a| a.anchor_id)
    }

    pub fn status(&self) -> FeedStatus {
        match &self.phase {
            SessionPhase::Idle if self.transport.is_none() => FeedStatus::WaitingForTransport,
            SessionPhase::Idle if self.anchor_input.is_none() => FeedStatus::InvalidAnchor,
            SessionPhase::Idle => FeedStatus::Stopped,
            SessionPhase::Invalid(_) => FeedStatus::InvalidAnchor,
            SessionPhase::Resolving => FeedStatus::Loading,
            SessionPhase::Active => match &self.active {
                Some(active) if active.replies_closed.is_some() => {
                    FeedStatus::Disconnected(active.feed.len())
                }
                Some(active) if !active.feed.is_empty() => FeedStatus::Showing(active.feed.len()),
                Some(active) if active.feed.reached_end_of_stored() => FeedStatus::NoReplies,
                _ => FeedStatus::Loading,
            },
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let mut snapshot = FeedSnapshot {
            phase: self.phase.clone(),
            status: self.status(),
            ..Default::default()
        };
        if let Some(active) = &self.active {
            snapshot.replies = active.feed.replies().iter().cloned().collect();
            snapshot.profiles = active.resolver.profiles().clone();
            snapshot.in_flight = active.resolver.in_flight_count();
            snapshot.end_of_stored = active.feed.reached_end_of_stored();
        }
        snapshot
    }

    pub async fn attach_transport(&mut self, transport: Arc<dyn Transport>) {
        if self
            .transport
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &transport))
        {
            return;
        }
        // Unsubscribe through the transport that opened the subscriptions
        self.teardown().await;
        self.transport = Some(transport);
        self.reconcile().await;
    }

    pub async fn detach_transport(&mut self) {
        self.teardown().await;
        self.transport = None;
        self.set_phase(SessionPhase::Idle);
    }

    pub async fn set_anchor(&mut self, input: impl Into<String>) {
        let input = input.into();
        if self.anchor_input.as_deref() == Some(input.as_str()) && self.phase != SessionPhase::Idle {
            return;
        }
        self.anchor_input = Some(input);
        self.reconcile().await;
    }

    pub async fn set_authors<I, S>(&mut self, authors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let authors: BTreeSet<String> = authors.into_iter().map(Into::into).collect();
        if authors == self.authors && self.phase != SessionPhase::Idle {
            return;
        }
        self.authors = authors;
        self.reconcile().await;
    }

    /// Set anchor and author set together and (re)start the session
    pub async fn start<I, S>(&mut self, anchor: impl Into<String>, authors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.anchor_input = Some(anchor.into());
        self.authors = authors.into_iter().map(Into::into).collect();
        self.reconcile().await;
    }

    /// Tear the session down. Inputs are kept; any later input change
    /// starts a new session.
    pub async fn stop(&mut self) {
        self.teardown().await;
        self.set_phase(SessionPhase::Idle);
    }

    pub async fn handle_command(&mut self, command: FeedCommand) {
        tracing::debug!(?command, "Feed command");
        match command {
            FeedCommand::AttachTransport(transport) => self.attach_transport(transport).await,
            FeedCommand::DetachTransport => self.detach_transport().await,
            FeedCommand::SetAnchor(anchor) => self.set_anchor(anchor).await,
            FeedCommand::SetAuthors(authors) => self.set_authors(authors).await,
            FeedCommand::Stop | FeedCommand::Shutdown => self.stop().await,
        }
        self.publish();
    }

    /// Drive the session until `Shutdown` or until every command sender is
    /// gone. Subscriptions are closed before returning.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<FeedCommand>) {
        self.publish();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(FeedCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                notice = next_notice(self.reply_sub.as_mut()) => {
                    self.on_reply_notice(notice).await;
                }
                notice = next_notice(self.profile_sub.as_mut().map(|p| &mut p.subscription)) => {
                    self.on_profile_notice(notice).await;
                }
                Some(event) = self.resolver_rx.recv() => {
                    self.on_resolver_event(event);
                }
            }
            self.publish();
        }

        self.stop().await;
        self.publish();
        tracing::info!("Feed session finished");
    }

    /// Rebuild the session from the current inputs
    async fn reconcile(&mut self) {
        self.teardown().await;

        let Some(transport) = self.transport.clone() else {
            tracing::info!("No transport yet, feed waits");
            self.set_phase(SessionPhase::Idle);
            return;
        };
        let Some(input) = self.anchor_input.clone() else {
            tracing::info!("No anchor set, feed waits");
            self.set_phase(SessionPhase::Idle);
            return;
        };

        // Observers see Resolving while the subscribe round-trip is pending
        self.set_phase(SessionPhase::Resolving);
        self.publish();
        let anchor_id = match decode_anchor(&input) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot follow anchor");
                self.set_phase(SessionPhase::Invalid(e));
                return;
            }
        };

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let mut resolver = ProfileResolver::new(
            epoch,
            transport.clone(),
            self.cache.clone(),
            self.resolver_tx.clone(),
        );
        resolver.preload();

        let mut feed = ReplyFeed::new(anchor_id, self.config.max_replies);
        match reply_filter(anchor_id, &self.authors, self.config.reply_limit) {
            Some(filter) => match transport.subscribe(filter, SubscribeOptions::live()).await {
                Ok(subscription) => {
                    tracing::info!(
                        anchor = %anchor_id.to_hex(),
                        authors = self.authors.len(),
                        subscription = %subscription.id,
                        epoch,
                        "Subscribed to replies"
                    );
                    self.reply_sub = Some(subscription);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to subscribe to replies");
                }
            },
            None => {
                tracing::info!(anchor = %anchor_id.to_hex(), "Author set is empty, nothing to subscribe to");
                feed.mark_end_of_stored();
            }
        }

        self.active = Some(ActiveSession {
            epoch,
            anchor_id,
            feed,
            resolver,
            replies_closed: None,
        });
        self.set_phase(SessionPhase::Active);
    }

    /// Close both subscriptions and drop every piece of session state.
    ///
    /// The state goes first, before any await, so results that land while
    /// unsubscribing find no session to write into.
    async fn teardown(&mut self) {
        let active = self.active.take();
        let reply_sub = self.reply_sub.take();
        let profile_sub = self.profile_sub.take();

        if let Some(active) = &active {
            tracing::debug!(
                epoch = active.epoch,
                replies = active.feed.len(),
                in_flight = active.resolver.in_flight_count(),
                "Tearing down feed session"
            );
        }
        if active.is_some() || reply_sub.is_some() || profile_sub.is_some() {
            self.dirty = true;
        }
        drop(active);

        let Some(transport) = self.transport.clone() else {
            return;
        };
        if let Some(subscription) = reply_sub {
            transport.unsubscribe(&subscription.id).await;
        }
        if let Some(updates) = profile_sub {
            transport.unsubscribe(&updates.subscription.id).await;
        }
    }

    async fn on_reply_notice(&mut self, notice: SubscriptionNotice) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match notice {
            SubscriptionNotice::Event(event) => {
                if !active.feed.ingest(&event) {
                    return;
                }
                self.dirty = true;
                for author_id in active.feed.authors() {
                    if active.resolver.needs_resolution(&author_id) {
                        active.resolver.resolve(&author_id);
                    }
                }
                self.sync_profile_subscription().await;
            }
            SubscriptionNotice::EndOfStoredEvents => {
                if active.feed.mark_end_of_stored() {
                    tracing::info!(replies = active.feed.len(), "Stored replies loaded");
                    self.dirty = true;
                }
            }
            SubscriptionNotice::Closed(reason) => {
                tracing::warn!(%reason, "Reply subscription closed by every relay");
                active.replies_closed = Some(reason);
                self.dirty = true;
                if let Some(subscription) = self.reply_sub.take() {
                    self.release(subscription).await;
                }
            }
        }
    }

    /// Keep the profile-update subscription on exactly the feed's authors
    async fn sync_profile_subscription(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let Some(transport) = self.transport.clone() else {
            return;
        };

        let authors = active.feed.authors();
        if self
            .profile_sub
            .as_ref()
            .is_some_and(|current| current.authors == authors)
        {
            return;
        }

        if let Some(old) = self.profile_sub.take() {
            transport.unsubscribe(&old.subscription.id).await;
        }
        let Some(filter) = profile_update_filter(&authors) else {
            return;
        };

        match transport.subscribe(filter, SubscribeOptions::live()).await {
            Ok(subscription) => {
                tracing::debug!(
                    authors = authors.len(),
                    subscription = %subscription.id,
                    "Subscribed to profile updates"
                );
                self.profile_sub = Some(ProfileUpdates {
                    subscription,
                    authors,
                });
            }
            Err(e) => {
                // Retried on the next author set change
                tracing::warn!(error = %e, "Failed to subscribe to profile updates");
            }
        }
    }

    async fn on_profile_notice(&mut self, notice: SubscriptionNotice) {
        match notice {
            SubscriptionNotice::Event(event) => {
                let Some(active) = self.active.as_mut() else {
                    return;
                };
                if event.kind != Kind::from(kinds::METADATA) {
                    return;
                }
                let author_id = event.pubkey.to_hex();
                let tracked = self
                    .profile_sub
                    .as_ref()
                    .is_some_and(|p| p.authors.contains(&author_id));
                if !tracked {
                    return;
                }
                if active
                    .resolver
                    .apply_incoming_profile_document(&author_id, &event.content)
                {
                    self.dirty = true;
                }
            }
            SubscriptionNotice::EndOfStoredEvents => {}
            SubscriptionNotice::Closed(reason) => {
                // Re-issued on the next author set change
                tracing::warn!(%reason, "Profile update subscription closed");
                if let Some(updates) = self.profile_sub.take() {
                    self.release(updates.subscription).await;
                }
            }
        }
    }

    /// Send CLOSE for a subscription the relays already ended, so none of
    /// them keeps the REQ alive
    async fn release(&self, subscription: Subscription) {
        if let Some(transport) = &self.transport {
            transport.unsubscribe(&subscription.id).await;
        }
    }

    fn on_resolver_event(&mut self, event: ResolverEvent) {
        match self.active.as_mut() {
            Some(active) => {
                if active.resolver.handle_event(event) {
                    self.dirty = true;
                }
            }
            None => {
                tracing::debug!(epoch = event.epoch, "Dropping resolver result, no active session");
            }
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "Feed phase");
            self.phase = phase;
        }
        self.dirty = true;
    }

    fn publish(&mut self) {
        if std::mem::take(&mut self.dirty) {
            self.snapshot_tx.send_replace(self.snapshot());
        }
    }
}

async fn next_notice(subscription: Option<&mut Subscription>) -> SubscriptionNotice {
    match subscription {
        Some(subscription) => subscription.next_notice().await,
        None => std::future::pending().await,
    }
}
