use std::collections::{BTreeSet, HashSet, VecDeque};

use nostr_sdk::prelude::*;

use crate::constants::kinds;
use crate::models::Reply;

/// Parse hex author ids, skipping (and logging) anything that is not a pubkey
fn author_keys(authors: &BTreeSet<String>) -> Vec<PublicKey> {
    authors
        .iter()
        .filter_map(|hex| match PublicKey::from_hex(hex) {
            Ok(pk) => Some(pk),
            Err(e) => {
                tracing::warn!(author = %hex, error = %e, "Skipping invalid author id");
                None
            }
        })
        .collect()
}

/// Filter for kind:1 notes by `authors` that reference `anchor`.
///
/// `None` when there is no valid author: the feed opens no subscription then.
pub fn reply_filter(anchor: EventId, authors: &BTreeSet<String>, limit: usize) -> Option<Filter> {
    let keys = author_keys(authors);
    if keys.is_empty() {
        return None;
    }
    Some(
        Filter::new()
            .kind(Kind::from(kinds::TEXT_NOTE))
            .event(anchor)
            .authors(keys)
            .limit(limit),
    )
}

/// Filter for live kind:0 updates of the authors currently in the feed
pub fn profile_update_filter(authors: &BTreeSet<String>) -> Option<Filter> {
    let keys = author_keys(authors);
    if keys.is_empty() {
        return None;
    }
    let limit = keys.len();
    Some(
        Filter::new()
            .kind(Kind::from(kinds::METADATA))
            .authors(keys)
            .limit(limit),
    )
}

/// Deduplicated replies to one anchor, newest arrival first.
///
/// Ordering is by arrival, not by `created_at`: relays deliver stored events
/// in no guaranteed order and the feed never reorders what it has shown.
#[derive(Debug)]
pub struct ReplyFeed {
    anchor_hex: String,
    replies: VecDeque<Reply>,
    /// Every id ever accepted, including ones trimmed off the tail
    seen: HashSet<String>,
    end_of_stored: bool,
    max_replies: Option<usize>,
}

impl ReplyFeed {
    pub fn new(anchor: EventId, max_replies: Option<usize>) -> Self {
        Self {
            anchor_hex: anchor.to_hex(),
            replies: VecDeque::new(),
            seen: HashSet::new(),
            end_of_stored: false,
            max_replies,
        }
    }

    /// Accept `event` if it is a new kind:1 reply to the anchor.
    ///
    /// Returns `true` when the feed changed.
    pub fn ingest(&mut self, event: &Event) -> bool {
        let Some(reply) = Reply::from_event(event) else {
            tracing::trace!(kind = event.kind.as_u16(), id = %event.id, "Ignoring non-note event");
            return false;
        };

        if self.seen.contains(&reply.id) {
            tracing::trace!(id = %reply.id, "Duplicate reply");
            return false;
        }

        if !reply.references(&self.anchor_hex) {
            tracing::debug!(id = %reply.id, "Event does not reference the anchor");
            return false;
        }

        self.seen.insert(reply.id.clone());
        self.replies.push_front(reply);

        if let Some(max) = self.max_replies {
            self.replies.truncate(max);
        }
        true
    }

    /// Record end-of-stored-events. Returns `true` the first time only.
    pub fn mark_end_of_stored(&mut self) -> bool {
        !std::mem::replace(&mut self.end_of_stored, true)
    }

    pub fn reached_end_of_stored(&self) -> bool {
        self.end_of_stored
    }

    pub fn replies(&self) -> &VecDeque<Reply> {
        &self.replies
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Distinct authors of the replies currently held
    pub fn authors(&self) -> BTreeSet<String> {
        self.replies.iter().map(|r| r.author_id.clone()).collect()
    }
}
