pub mod anchor;
pub mod contacts;
pub mod relay;
pub mod transport;

pub use anchor::decode_anchor;
pub use contacts::{authors_from_contact_list, fetch_author_set};
pub use relay::RelayTransport;
pub use transport::{SubscribeOptions, Subscription, SubscriptionNotice, Transport};
