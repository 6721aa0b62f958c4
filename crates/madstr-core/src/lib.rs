pub mod config;
pub mod constants;
pub mod error;
pub mod feed;
pub mod models;
pub mod nostr;
pub mod store;

pub use config::CoreConfig;
pub use error::FeedError;
pub use feed::{FeedCommand, FeedSession, FeedSnapshot, FeedStatus, SessionPhase};
