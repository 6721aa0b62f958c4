use nostr_sdk::prelude::*;

use crate::constants::kinds;

/// A kind:1 note that references the anchor event.
///
/// Copied out of the transport's `Event` once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: String,
    pub author_id: String,
    pub created_at: u64,
    pub content: String,
    /// Event ids referenced through `e` tags
    pub referenced_ids: Vec<String>,
}

impl Reply {
    /// Create a Reply from a kind:1 event. Any other kind yields `None`.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != Kind::from(kinds::TEXT_NOTE) {
            return None;
        }

        let mut referenced_ids: Vec<String> = Vec::new();
        for id in event.tags.event_ids() {
            let hex = id.to_hex();
            if !referenced_ids.contains(&hex) {
                referenced_ids.push(hex);
            }
        }

        Some(Self {
            id: event.id.to_hex(),
            author_id: event.pubkey.to_hex(),
            created_at: event.created_at.as_secs(),
            content: event.content.clone(),
            referenced_ids,
        })
    }

    pub fn references(&self, event_id: &str) -> bool {
        self.referenced_ids.iter().any(|id| id == event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_from_text_note_collects_e_tags() {
        let keys = Keys::generate();
        let anchor = EventId::all_zeros();
        let event = EventBuilder::new(Kind::from(1), "great stream")
            .tag(Tag::event(anchor))
            .tag(Tag::event(anchor))
            .sign_with_keys(&keys)
            .unwrap();

        let reply = Reply::from_event(&event).expect("kind:1 should parse");
        assert_eq!(reply.id, event.id.to_hex());
        assert_eq!(reply.author_id, keys.public_key().to_hex());
        assert_eq!(reply.content, "great stream");
        assert_eq!(reply.referenced_ids, vec![anchor.to_hex()]);
        assert!(reply.references(&anchor.to_hex()));
    }

    #[test]
    fn test_reply_rejects_other_kinds() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::Metadata, r#"{"name":"alice"}"#)
            .sign_with_keys(&keys)
            .unwrap();

        assert!(Reply::from_event(&event).is_none());
    }
}
