use nostr_sdk::prelude::*;

use crate::constants::NOSTR_URI_PREFIX;
use crate::error::FeedError;

/// Decode the anchor reference (an `nevent`, optionally `nostr:`-prefixed)
/// into the id of the event whose replies are shown.
pub fn decode_anchor(input: &str) -> Result<EventId, FeedError> {
    let trimmed = input.trim();
    let clean = trimmed.strip_prefix(NOSTR_URI_PREFIX).unwrap_or(trimmed);
    if clean.is_empty() {
        return Err(FeedError::InvalidAnchor("empty reference".to_string()));
    }

    match Nip19::from_bech32(clean) {
        Ok(Nip19::Event(event)) => Ok(event.event_id),
        Ok(Nip19::EventId(_)) => Err(FeedError::UnexpectedAnchorKind("note".to_string())),
        Ok(Nip19::Pubkey(_)) => Err(FeedError::UnexpectedAnchorKind("npub".to_string())),
        Ok(Nip19::Profile(_)) => Err(FeedError::UnexpectedAnchorKind("nprofile".to_string())),
        Ok(_) => Err(FeedError::UnexpectedAnchorKind("other entity".to_string())),
        Err(e) => Err(FeedError::InvalidAnchor(e.to_string())),
    }
}
