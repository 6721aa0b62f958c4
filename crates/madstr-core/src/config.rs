use std::path::{Path, PathBuf};

use crate::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_RELAYS, DEFAULT_REPLY_LIMIT, PROFILE_CACHE_TTL_SECS,
};

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub relay_urls: Vec<String>,
    pub feed: FeedConfig,
    /// Staleness horizon of the persistent profile cache
    pub profile_ttl_secs: u64,
    pub connect_timeout_secs: u64,
}

/// Tuning knobs of a single feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// `limit` on the reply subscription filter
    pub reply_limit: usize,
    /// Optional cap on the number of replies kept; oldest are dropped first.
    /// `None` keeps everything for the lifetime of the session.
    pub max_replies: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reply_limit: DEFAULT_REPLY_LIMIT,
            max_replies: None,
        }
    }
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            relay_urls: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            feed: FeedConfig::default(),
            profile_ttl_secs: PROFILE_CACHE_TTL_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
        }
    }

    /// `~/.madstr` (falls back to `./.madstr` when no home directory is known)
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".madstr")
    }

    pub fn with_relays(mut self, relay_urls: Vec<String>) -> Self {
        if !relay_urls.is_empty() {
            self.relay_urls = relay_urls;
        }
        self
    }

    /// Location of the SQLite profile cache inside `data_dir`
    pub fn profile_cache_path(&self) -> PathBuf {
        self.data_dir.join("profiles.db")
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new(Self::default_data_dir())
    }
}
