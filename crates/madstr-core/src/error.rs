use thiserror::Error;

/// Configuration errors. These are terminal for a session: no subscription is
/// attempted until the offending input changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Invalid anchor reference: {0}")]
    InvalidAnchor(String),

    #[error("Anchor reference is a {0}, expected an nevent")]
    UnexpectedAnchorKind(String),
}

/// Failures reported by the relay transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Profile fetch failed: {0}")]
    Fetch(String),
}

/// Failures reported by the persistent profile cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock error: failed to acquire lock on {resource}")]
    Lock { resource: String },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
