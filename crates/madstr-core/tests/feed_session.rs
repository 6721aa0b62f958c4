use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use madstr_core::config::FeedConfig;
use madstr_core::error::TransportError;
use madstr_core::nostr::{SubscribeOptions, Subscription, SubscriptionNotice, Transport};
use madstr_core::store::{ProfileCache, SqliteProfileCache};
use madstr_core::{FeedCommand, FeedSession, FeedSnapshot, FeedStatus, SessionPhase};
use nostr_sdk::prelude::*;
use tokio::sync::{mpsc, watch};

/// Relay stand-in: hands out channels and serves kind:0 from a map
#[derive(Default)]
struct FakeRelay {
    subs: Mutex<Vec<(SubscriptionId, Filter, mpsc::UnboundedSender<SubscriptionNotice>)>>,
    closed: Mutex<Vec<SubscriptionId>>,
    profiles: Mutex<HashMap<PublicKey, Event>>,
}

impl FakeRelay {
    fn send(&self, kind: Kind, notice: SubscriptionNotice) {
        let subs = self.subs.lock().unwrap();
        let (_, _, tx) = subs
            .iter()
            .rev()
            .find(|(_, f, _)| f.kinds.as_ref().is_some_and(|k| k.contains(&kind)))
            .expect("open subscription for kind");
        tx.send(notice).unwrap();
    }

    fn open_count(&self) -> usize {
        self.subs.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeRelay {
    async fn subscribe(
        &self,
        filter: Filter,
        _options: SubscribeOptions,
    ) -> Result<Subscription, TransportError> {
        let id = SubscriptionId::generate();
        let (tx, notices) = mpsc::unbounded_channel();
        self.subs.lock().unwrap().push((id.clone(), filter, tx));
        Ok(Subscription { id, notices })
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        self.subs.lock().unwrap().retain(|(sub_id, _, _)| sub_id != id);
        self.closed.lock().unwrap().push(id.clone());
    }

    async fn fetch_profile(&self, author: PublicKey) -> Result<Option<Event>, TransportError> {
        Ok(self.profiles.lock().unwrap().get(&author).cloned())
    }
}

async fn wait_for<F>(snapshots: &mut watch::Receiver<FeedSnapshot>, condition: F) -> FeedSnapshot
where
    F: FnMut(&FeedSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(condition))
        .await
        .expect("snapshot condition timed out")
        .expect("session dropped the snapshot channel")
        .clone()
}

fn note(keys: &Keys, content: &str, anchor: EventId) -> Event {
    EventBuilder::new(Kind::TextNote, content)
        .tag(Tag::event(anchor))
        .sign_with_keys(keys)
        .unwrap()
}

#[tokio::test]
async fn test_feed_session_end_to_end() {
    let relay = Arc::new(FakeRelay::default());
    let alice = Keys::generate();
    let bob = Keys::generate();
    relay.profiles.lock().unwrap().insert(
        alice.public_key(),
        EventBuilder::new(Kind::Metadata, r#"{"name":"alice","picture":"https://x/a.png"}"#)
            .sign_with_keys(&alice)
            .unwrap(),
    );

    let anchor = EventBuilder::new(Kind::TextNote, "anchor")
        .sign_with_keys(&alice)
        .unwrap();
    let nevent = Nip19Event::new(anchor.id).to_bech32().unwrap();

    let cache = Arc::new(SqliteProfileCache::in_memory(86_400).unwrap());
    let (session, mut snapshots) = FeedSession::new(FeedConfig::default(), cache.clone());
    let (commands, command_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(session.run(command_rx));

    commands
        .send(FeedCommand::SetAuthors(vec![
            alice.public_key().to_hex(),
            bob.public_key().to_hex(),
        ]))
        .unwrap();
    commands.send(FeedCommand::SetAnchor(nevent)).unwrap();
    wait_for(&mut snapshots, |s| s.status == FeedStatus::WaitingForTransport).await;

    commands
        .send(FeedCommand::AttachTransport(relay.clone()))
        .unwrap();
    wait_for(&mut snapshots, |s| s.phase == SessionPhase::Active).await;

    let from_alice = note(&alice, "first", anchor.id);
    let from_bob = note(&bob, "second", anchor.id);
    relay.send(Kind::TextNote, SubscriptionNotice::Event(Box::new(from_alice.clone())));
    relay.send(Kind::TextNote, SubscriptionNotice::Event(Box::new(from_bob.clone())));
    relay.send(Kind::TextNote, SubscriptionNotice::Event(Box::new(from_alice.clone())));
    relay.send(Kind::TextNote, SubscriptionNotice::EndOfStoredEvents);

    let snapshot = wait_for(&mut snapshots, |s| {
        s.status == FeedStatus::Showing(2)
            && s.profiles
                .get(&alice.public_key().to_hex())
                .is_some_and(|p| p.name.is_some())
    })
    .await;
    let bob_id = from_bob.id.to_hex();
    let alice_id = from_alice.id.to_hex();
    assert_eq!(snapshot.reply_ids(), vec![bob_id.as_str(), alice_id.as_str()]);
    let entries = snapshot.entries();
    assert_eq!(entries[1].label, "alice");
    assert_eq!(entries[1].picture_url, Some("https://x/a.png"));

    // Bob has no profile anywhere: shortened id, not loading forever
    let snapshot = wait_for(&mut snapshots, |s| s.in_flight == 0).await;
    let entries = snapshot.entries();
    let bob_entry = &entries[0];
    assert!(bob_entry.label.ends_with("..."));
    assert!(!bob_entry.loading);

    // Live profile update for bob
    relay.send(
        Kind::Metadata,
        SubscriptionNotice::Event(Box::new(
            EventBuilder::new(Kind::Metadata, r#"{"name":"bob"}"#)
                .sign_with_keys(&bob)
                .unwrap(),
        )),
    );
    wait_for(&mut snapshots, |s| {
        s.entries().first().is_some_and(|e| e.label == "bob")
    })
    .await;

    commands.send(FeedCommand::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("session did not shut down")
        .unwrap();

    assert_eq!(relay.open_count(), 0);
    // Replies, the first profile subscription (replaced when bob showed up)
    // and its replacement
    assert_eq!(relay.closed.lock().unwrap().len(), 3);

    // Resolved profiles reach the persistent cache
    let stored = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(record) = cache.get(&alice.public_key().to_hex()).await.unwrap() {
                break record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("profile was not cached");
    assert_eq!(stored.name.as_deref(), Some("alice"));
}
