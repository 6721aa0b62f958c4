pub mod profile;
pub mod reply;

pub use profile::{author_initials, display_label, now_secs, ProfileDocument, ProfileRecord};
pub use reply::Reply;
