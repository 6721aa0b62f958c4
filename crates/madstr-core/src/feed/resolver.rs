//! Per-session profile resolution.
//!
//! The resolver lives inside the session task and is only touched from there.
//! Cache reads and network fetches run on spawned tasks that report back
//! through a [`ResolverEvent`] channel; each event carries the epoch of the
//! session that started it so results for a torn-down session are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nostr_sdk::prelude::*;
use tokio::sync::mpsc;

use crate::error::{CacheError, TransportError};
use crate::models::{now_secs, ProfileDocument, ProfileRecord};
use crate::nostr::Transport;
use crate::store::ProfileCache;

/// Result of background resolver work
#[derive(Debug)]
pub enum ResolverOutcome {
    Preloaded(Result<Vec<ProfileRecord>, CacheError>),
    CacheLookup {
        author_id: String,
        result: Result<Option<ProfileRecord>, CacheError>,
    },
    Fetched {
        author_id: String,
        result: Result<Option<Event>, TransportError>,
    },
}

#[derive(Debug)]
pub struct ResolverEvent {
    pub epoch: u64,
    pub outcome: ResolverOutcome,
}

pub struct ProfileResolver {
    epoch: u64,
    profiles: HashMap<String, ProfileRecord>,
    /// Authors with a cache read or network fetch outstanding
    in_flight: HashSet<String>,
    /// False until the startup preload finished
    warm: bool,
    /// Resolves requested before the preload finished
    deferred: Vec<String>,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn ProfileCache>,
    events_tx: mpsc::UnboundedSender<ResolverEvent>,
}

impl ProfileResolver {
    pub fn new(
        epoch: u64,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn ProfileCache>,
        events_tx: mpsc::UnboundedSender<ResolverEvent>,
    ) -> Self {
        Self {
            epoch,
            profiles: HashMap::new(),
            in_flight: HashSet::new(),
            warm: true,
            deferred: Vec::new(),
            transport,
            cache,
            events_tx,
        }
    }

    pub fn profile(&self, author_id: &str) -> Option<&ProfileRecord> {
        self.profiles.get(author_id)
    }

    pub fn profiles(&self) -> &HashMap<String, ProfileRecord> {
        &self.profiles
    }

    pub fn is_in_flight(&self, author_id: &str) -> bool {
        self.in_flight.contains(author_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }

    /// True when `author_id` has no resolved name and nothing outstanding
    pub fn needs_resolution(&self, author_id: &str) -> bool {
        !self.profiles.get(author_id).is_some_and(|p| p.has_name())
            && !self.in_flight.contains(author_id)
            && !self.deferred.iter().any(|a| a == author_id)
    }

    /// Load every unexpired cached record before the first resolve runs.
    pub fn preload(&mut self) {
        self.warm = false;
        let cache = self.cache.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = cache.get_all().await;
            let _ = tx.send(ResolverEvent {
                epoch,
                outcome: ResolverOutcome::Preloaded(result),
            });
        });
    }

    /// Make sure a name for `author_id` is known or on its way.
    ///
    /// The author is marked in-flight before the cache is consulted, so any
    /// number of calls while a lookup or fetch is pending start no new work.
    /// Returns `true` when new work was started.
    pub fn resolve(&mut self, author_id: &str) -> bool {
        if !self.needs_resolution(author_id) {
            return false;
        }

        if !self.warm {
            self.deferred.push(author_id.to_string());
            return false;
        }

        self.in_flight.insert(author_id.to_string());

        let cache = self.cache.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        let author_id = author_id.to_string();
        tokio::spawn(async move {
            let result = cache.get(&author_id).await;
            let _ = tx.send(ResolverEvent {
                epoch,
                outcome: ResolverOutcome::CacheLookup { author_id, result },
            });
        });
        true
    }

    /// Merge a kind:0 document pushed by the profile-update subscription.
    ///
    /// Not gated by the in-flight set. Returns `true` if anything changed.
    pub fn apply_incoming_profile_document(&mut self, author_id: &str, content: &str) -> bool {
        let Some(doc) = ProfileDocument::parse(content) else {
            tracing::debug!(author = %author_id, "Ignoring unparseable profile update");
            return false;
        };
        let record = self.merge_document(author_id, doc);
        tracing::debug!(author = %author_id, name = ?record.name, "Applied live profile update");
        self.persist(record);
        true
    }

    /// Apply the outcome of background work. Returns `true` if profiles changed.
    pub fn handle_event(&mut self, event: ResolverEvent) -> bool {
        if event.epoch != self.epoch {
            tracing::debug!(
                event_epoch = event.epoch,
                epoch = self.epoch,
                "Dropping resolver result from a previous session"
            );
            return false;
        }

        match event.outcome {
            ResolverOutcome::Preloaded(result) => self.on_preloaded(result),
            ResolverOutcome::CacheLookup { author_id, result } => {
                self.on_cache_lookup(author_id, result)
            }
            ResolverOutcome::Fetched { author_id, result } => self.on_fetched(author_id, result),
        }
    }

    fn on_preloaded(&mut self, result: Result<Vec<ProfileRecord>, CacheError>) -> bool {
        let mut changed = false;
        match result {
            Ok(records) => {
                let count = records.len();
                for record in records.into_iter().filter(|r| r.has_name()) {
                    if !self.profiles.get(&record.author_id).is_some_and(|p| p.has_name()) {
                        self.profiles.insert(record.author_id.clone(), record.settled());
                        changed = true;
                    }
                }
                tracing::info!(count, "Preloaded cached profiles");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to preload profile cache");
            }
        }

        self.warm = true;
        for author_id in std::mem::take(&mut self.deferred) {
            self.resolve(&author_id);
        }
        changed
    }

    fn on_cache_lookup(
        &mut self,
        author_id: String,
        result: Result<Option<ProfileRecord>, CacheError>,
    ) -> bool {
        if !self.in_flight.contains(&author_id) {
            return false;
        }

        match result {
            Ok(Some(record)) if record.has_name() => {
                self.in_flight.remove(&author_id);
                if self.profiles.get(&author_id).is_some_and(|p| p.has_name()) {
                    return false;
                }
                tracing::debug!(author = %author_id, "Using cached profile");
                self.profiles.insert(author_id, record.settled());
                return true;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(author = %author_id, error = %e, "Error checking profile cache");
            }
        }

        self.profiles
            .entry(author_id.clone())
            .or_insert_with(|| ProfileRecord::unknown(&author_id))
            .is_loading = true;
        self.spawn_fetch(author_id);
        true
    }

    fn on_fetched(
        &mut self,
        author_id: String,
        result: Result<Option<Event>, TransportError>,
    ) -> bool {
        self.in_flight.remove(&author_id);

        let doc = match result {
            Ok(Some(event)) => {
                let doc = ProfileDocument::parse(&event.content);
                if doc.is_none() {
                    tracing::debug!(author = %author_id, "Fetched profile has no usable content");
                }
                doc
            }
            Ok(None) => {
                tracing::debug!(author = %author_id, "No profile found on relays");
                None
            }
            Err(e) => {
                tracing::warn!(author = %author_id, error = %e, "Error fetching profile");
                None
            }
        };

        match doc {
            Some(doc) => {
                let record = self.merge_document(&author_id, doc);
                tracing::debug!(author = %author_id, name = ?record.name, "Resolved profile");
                self.persist(record);
            }
            None => {
                self.profiles
                    .entry(author_id.clone())
                    .or_insert_with(|| ProfileRecord::unknown(&author_id))
                    .is_loading = false;
            }
        }
        true
    }

    fn merge_document(&mut self, author_id: &str, doc: ProfileDocument) -> ProfileRecord {
        let record = self
            .profiles
            .entry(author_id.to_string())
            .or_insert_with(|| ProfileRecord::unknown(author_id));
        record.merge(doc, now_secs());
        record.clone()
    }

    fn spawn_fetch(&self, author_id: String) {
        let transport = self.transport.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = match PublicKey::from_hex(&author_id) {
                Ok(pubkey) => transport.fetch_profile(pubkey).await,
                Err(e) => Err(TransportError::Fetch(format!("invalid author id: {e}"))),
            };
            let _ = tx.send(ResolverEvent {
                epoch,
                outcome: ResolverOutcome::Fetched { author_id, result },
            });
        });
    }

    /// Fire-and-forget cache write; failures are logged only
    fn persist(&self, record: ProfileRecord) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.put(&record).await {
                tracing::warn!(author = %record.author_id, error = %e, "Failed to cache profile");
            }
        });
    }
}
