use std::time::Duration;

use nostr_sdk::prelude::*;
use tokio::time::Instant;

use crate::constants::kinds;
use crate::error::TransportError;

use super::transport::{SubscribeOptions, SubscriptionNotice, Transport};

/// Author set defined by a contact list: the owner first, then every followed
/// pubkey, without duplicates.
pub fn authors_from_contact_list(owner: &PublicKey, contact_list: &Event) -> Vec<String> {
    let mut authors = vec![owner.to_hex()];
    for followed in contact_list.tags.public_keys() {
        let hex = followed.to_hex();
        if !authors.contains(&hex) {
            authors.push(hex);
        }
    }
    authors
}

/// Fetch the owner's kind:3 contact list and derive the author set from it.
///
/// The first matching event wins. After end-of-stored-events the
/// subscription stays open for `grace` so a list held only by slower relays
/// still arrives; if nothing shows up by then (or every relay closes the
/// subscription) the set is empty.
pub async fn fetch_author_set(
    transport: &dyn Transport,
    owner: PublicKey,
    grace: Duration,
) -> Result<Vec<String>, TransportError> {
    let filter = Filter::new()
        .kind(Kind::from(kinds::CONTACT_LIST))
        .author(owner)
        .limit(1);
    let mut subscription = transport.subscribe(filter, SubscribeOptions::live()).await?;

    let mut deadline: Option<Instant> = None;
    let authors = loop {
        let notice = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, subscription.next_notice()).await {
                Ok(notice) => notice,
                Err(_) => {
                    tracing::warn!(owner = %owner.to_hex(), "No contact list found, author set is empty");
                    break Vec::new();
                }
            },
            None => subscription.next_notice().await,
        };

        match notice {
            SubscriptionNotice::Event(event) => {
                if event.kind != Kind::from(kinds::CONTACT_LIST) || event.pubkey != owner {
                    continue;
                }
                let authors = authors_from_contact_list(&owner, &event);
                tracing::info!(
                    owner = %owner.to_hex(),
                    authors = authors.len(),
                    "Author set derived from contact list"
                );
                break authors;
            }
            SubscriptionNotice::EndOfStoredEvents => {
                if deadline.is_none() {
                    tracing::debug!(
                        owner = %owner.to_hex(),
                        ?grace,
                        "Stored events exhausted without a contact list, waiting for late delivery"
                    );
                    deadline = Some(Instant::now() + grace);
                }
            }
            SubscriptionNotice::Closed(reason) => {
                tracing::warn!(owner = %owner.to_hex(), %reason, "Contact list subscription closed before any event");
                break Vec::new();
            }
        }
    };

    transport.unsubscribe(&subscription.id).await;
    Ok(authors)
}
