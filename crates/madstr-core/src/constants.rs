//! Application-wide constants
//!
//! Centralized location for relay defaults, event kinds and the tuning
//! values shared between the feed core and the CLI.

/// Relays used when neither the config file nor the command line names any
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

/// Owner whose contact list defines the default author set
pub const DEFAULT_OWNER_NPUB: &str =
    "npub1a5ve7g6q34lepmrns7c6jcrat93w4cd6lzayy89cvjsfzzwnyc4s6a66d8";

/// Result-count limit on the reply subscription
pub const DEFAULT_REPLY_LIMIT: usize = 50;

/// Profiles older than this are treated as missing and swept by `delete_expired`
pub const PROFILE_CACHE_TTL_SECS: u64 = 24 * 60 * 60; // 1 day

/// Seconds to wait for relays to connect before giving up
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Seconds to wait for a single kind:0 fetch
pub const PROFILE_FETCH_TIMEOUT_SECS: u64 = 10;

/// Seconds a contact list may still arrive after end-of-stored-events
pub const CONTACT_LIST_GRACE_SECS: u64 = 3;

/// Number of author-id characters shown when no profile name is known
pub const AUTHOR_LABEL_PREFIX_LEN: usize = 10;

/// URI scheme that may prefix a bech32 anchor reference
pub const NOSTR_URI_PREFIX: &str = "nostr:";

// Nostr event kinds used by the feed
pub mod kinds {
    /// Metadata (profiles)
    pub const METADATA: u16 = 0;
    /// Text note (replies)
    pub const TEXT_NOTE: u16 = 1;
    /// Contact list (author set)
    pub const CONTACT_LIST: u16 = 3;
}
