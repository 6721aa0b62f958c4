use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use madstr_core::constants::DEFAULT_OWNER_NPUB;
use madstr_core::CoreConfig;
use nostr_sdk::prelude::*;
use serde::Deserialize;

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Relay URLs; the built-in defaults are used when empty
    #[serde(default)]
    pub relays: Vec<String>,

    /// nevent of the post whose replies are followed
    pub nevent: Option<String>,

    /// npub or hex pubkey whose contact list defines the author set
    pub owner: Option<String>,

    /// Explicit author set (npub or hex); skips the contact list lookup
    #[serde(default)]
    pub authors: Vec<String>,

    pub data_dir: Option<PathBuf>,

    pub reply_limit: Option<usize>,

    pub max_replies: Option<usize>,
}

/// Where the author set comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorSource {
    Explicit(Vec<String>),
    ContactList(PublicKey),
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub core: CoreConfig,
    pub nevent: String,
    pub authors: AuthorSource,
    /// Exit once stored replies are loaded instead of following live
    pub once: bool,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    /// Values set in `other` win over the ones in `self`
    pub fn overlay(mut self, other: CliConfig) -> Self {
        if !other.relays.is_empty() {
            self.relays = other.relays;
        }
        if !other.authors.is_empty() {
            self.authors = other.authors;
        }
        self.nevent = other.nevent.or(self.nevent);
        self.owner = other.owner.or(self.owner);
        self.data_dir = other.data_dir.or(self.data_dir);
        self.reply_limit = other.reply_limit.or(self.reply_limit);
        self.max_replies = other.max_replies.or(self.max_replies);
        self
    }

    pub fn into_run_options(self, once: bool) -> Result<RunOptions> {
        let nevent = self
            .nevent
            .context("No nevent to follow; pass one as argument or set \"nevent\" in the config")?;

        let authors = if self.authors.is_empty() {
            let owner = self.owner.as_deref().unwrap_or(DEFAULT_OWNER_NPUB);
            let owner = PublicKey::parse(owner)
                .with_context(|| format!("Invalid owner pubkey: {}", owner))?;
            AuthorSource::ContactList(owner)
        } else {
            let authors = self
                .authors
                .iter()
                .map(|author| {
                    PublicKey::parse(author)
                        .map(|pk| pk.to_hex())
                        .with_context(|| format!("Invalid author pubkey: {}", author))
                })
                .collect::<Result<Vec<_>>>()?;
            AuthorSource::Explicit(authors)
        };

        let mut core = match self.data_dir {
            Some(dir) => CoreConfig::new(dir),
            None => CoreConfig::default(),
        }
        .with_relays(self.relays);
        if let Some(limit) = self.reply_limit {
            core.feed.reply_limit = limit;
        }
        core.feed.max_replies = self.max_replies;

        Ok(RunOptions {
            core,
            nevent,
            authors,
            once,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madstr_core::constants::{DEFAULT_RELAYS, DEFAULT_REPLY_LIMIT};

    #[test]
    fn test_parse_config_camel_case() {
        let json = r#"{
            "relays": ["wss://relay.example"],
            "nevent": "nevent1xyz",
            "dataDir": "/tmp/madstr",
            "replyLimit": 20
        }"#;
        let config = CliConfig::from_json(json).unwrap();
        assert_eq!(config.relays, vec!["wss://relay.example".to_string()]);
        assert_eq!(config.nevent.as_deref(), Some("nevent1xyz"));
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/madstr")));
        assert_eq!(config.reply_limit, Some(20));
        assert!(config.authors.is_empty());
    }

    #[test]
    fn test_parse_config_minimal() {
        let config = CliConfig::from_json("{}").unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CliConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_overlay_prefers_flags() {
        let file = CliConfig {
            relays: vec!["wss://a".to_string()],
            nevent: Some("from-file".to_string()),
            reply_limit: Some(10),
            ..Default::default()
        };
        let flags = CliConfig {
            nevent: Some("from-flag".to_string()),
            ..Default::default()
        };
        let merged = file.overlay(flags);
        assert_eq!(merged.nevent.as_deref(), Some("from-flag"));
        assert_eq!(merged.relays, vec!["wss://a".to_string()]);
        assert_eq!(merged.reply_limit, Some(10));
    }

    #[test]
    fn test_run_options_default_to_owner_contact_list() {
        let config = CliConfig {
            nevent: Some("nevent1xyz".to_string()),
            data_dir: Some(PathBuf::from("/tmp/madstr")),
            ..Default::default()
        };
        let options = config.into_run_options(false).unwrap();
        let owner = PublicKey::parse(DEFAULT_OWNER_NPUB).unwrap();
        assert_eq!(options.authors, AuthorSource::ContactList(owner));
        assert_eq!(options.core.relay_urls.len(), DEFAULT_RELAYS.len());
        assert_eq!(options.core.feed.reply_limit, DEFAULT_REPLY_LIMIT);
    }

    #[test]
    fn test_run_options_normalize_explicit_authors() {
        let keys = Keys::generate();
        let config = CliConfig {
            nevent: Some("nevent1xyz".to_string()),
            data_dir: Some(PathBuf::from("/tmp/madstr")),
            authors: vec![keys.public_key().to_bech32().unwrap()],
            ..Default::default()
        };
        let options = config.into_run_options(true).unwrap();
        assert_eq!(
            options.authors,
            AuthorSource::Explicit(vec![keys.public_key().to_hex()])
        );
        assert!(options.once);
    }

    #[test]
    fn test_run_options_require_nevent() {
        assert!(CliConfig::default().into_run_options(false).is_err());

        let config = CliConfig {
            nevent: Some("nevent1xyz".to_string()),
            authors: vec!["nope".to_string()],
            ..Default::default()
        };
        assert!(config.into_run_options(false).is_err());
    }
}
