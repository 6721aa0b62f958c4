//! Live reply feed: dedup/ordering, profile resolution and the session
//! lifecycle that owns both subscriptions.

pub mod replies;
pub mod resolver;
pub mod session;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod test_support;

pub use replies::{profile_update_filter, reply_filter, ReplyFeed};
pub use resolver::{ProfileResolver, ResolverEvent, ResolverOutcome};
pub use session::{FeedCommand, FeedSession, SessionPhase};
pub use snapshot::{FeedEntry, FeedSnapshot, FeedStatus};
