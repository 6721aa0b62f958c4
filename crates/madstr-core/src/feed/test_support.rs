//! In-memory transport and cache used by the feed tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{CacheError, TransportError};
use crate::models::ProfileRecord;
use crate::nostr::{SubscribeOptions, Subscription, SubscriptionNotice, Transport};
use crate::store::ProfileCache;

pub struct OpenSubscription {
    pub id: SubscriptionId,
    pub filter: Filter,
    pub tx: mpsc::UnboundedSender<SubscriptionNotice>,
}

#[derive(Default)]
pub struct MockTransport {
    next_id: AtomicUsize,
    pub open: Mutex<Vec<OpenSubscription>>,
    pub unsubscribed: Mutex<Vec<SubscriptionId>>,
    profiles: Mutex<HashMap<PublicKey, Event>>,
    fetch_failures: Mutex<Vec<PublicKey>>,
    fetches: AtomicUsize,
    /// When set, every fetch waits for a permit
    fetch_gate: Option<Arc<Semaphore>>,
    /// When set, every subscribe waits for a permit
    subscribe_gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose fetches block until `gate` hands out permits
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            fetch_gate: Some(gate),
            ..Default::default()
        })
    }

    /// Transport whose subscribes block until `gate` hands out permits
    pub fn with_subscribe_gate(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            subscribe_gate: Some(gate),
            ..Default::default()
        })
    }

    pub fn set_profile(&self, event: Event) {
        self.profiles.lock().unwrap().insert(event.pubkey, event);
    }

    pub fn fail_fetch(&self, author: PublicKey) {
        self.fetch_failures.lock().unwrap().push(author);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().unwrap().len()
    }

    /// Filter of the most recent still-open subscription matching `kind`
    pub fn open_filter(&self, kind: Kind) -> Option<Filter> {
        self.open
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.filter.kinds.as_ref().is_some_and(|k| k.contains(&kind)))
            .map(|s| s.filter.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn subscribe(
        &self,
        filter: Filter,
        _options: SubscribeOptions,
    ) -> Result<Subscription, TransportError> {
        if let Some(gate) = &self.subscribe_gate {
            let permit = gate.acquire().await.unwrap();
            permit.forget();
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = SubscriptionId::new(format!("mock-{n}"));
        let (tx, notices) = mpsc::unbounded_channel();
        self.open.lock().unwrap().push(OpenSubscription {
            id: id.clone(),
            filter,
            tx,
        });
        Ok(Subscription { id, notices })
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        self.open.lock().unwrap().retain(|s| &s.id != id);
        self.unsubscribed.lock().unwrap().push(id.clone());
    }

    async fn fetch_profile(&self, author: PublicKey) -> Result<Option<Event>, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.fetch_gate {
            let permit = gate.acquire().await.unwrap();
            permit.forget();
        }
        if self.fetch_failures.lock().unwrap().contains(&author) {
            return Err(TransportError::Fetch("relay unreachable".to_string()));
        }
        Ok(self.profiles.lock().unwrap().get(&author).cloned())
    }
}

#[derive(Default)]
pub struct MockCache {
    records: Mutex<HashMap<String, ProfileRecord>>,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub fail_get: AtomicBool,
    pub fail_get_all: AtomicBool,
    pub fail_put: AtomicBool,
}

impl MockCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, record: ProfileRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.author_id.clone(), record);
    }

    pub fn stored(&self, author_id: &str) -> Option<ProfileRecord> {
        self.records.lock().unwrap().get(author_id).cloned()
    }
}

fn unavailable() -> CacheError {
    CacheError::Lock {
        resource: "mock cache".to_string(),
    }
}

#[async_trait]
impl ProfileCache for MockCache {
    async fn get(&self, author_id: &str) -> Result<Option<ProfileRecord>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.stored(author_id))
    }

    async fn get_all(&self) -> Result<Vec<ProfileRecord>, CacheError> {
        if self.fail_get_all.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn put(&self, record: &ProfileRecord) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.insert(record.settled());
        Ok(())
    }

    async fn delete_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

pub fn metadata(keys: &Keys, content: &str) -> Event {
    EventBuilder::new(Kind::Metadata, content)
        .sign_with_keys(keys)
        .unwrap()
}

pub fn text_note(keys: &Keys, content: &str, tags: Vec<Tag>) -> Event {
    EventBuilder::new(Kind::TextNote, content)
        .tags(tags)
        .sign_with_keys(keys)
        .unwrap()
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
