use std::collections::HashMap;

use crate::models::{author_initials, display_label, ProfileRecord, Reply};

use super::session::SessionPhase;

/// What the presentation layer should say about the feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedStatus {
    #[default]
    WaitingForTransport,
    /// Anchor missing or undecodable; nothing is subscribed
    InvalidAnchor,
    /// Session stopped while inputs are still present
    Stopped,
    /// Subscribed, no end-of-stored-events yet, nothing received
    Loading,
    /// End-of-stored-events received and the feed is still empty
    NoReplies,
    Showing(usize),
    /// Every relay closed the reply subscription; holds the replies kept
    Disconnected(usize),
}

impl FeedStatus {
    pub fn message(&self) -> Option<&'static str> {
        match self {
            FeedStatus::WaitingForTransport => Some("Waiting for relays..."),
            FeedStatus::InvalidAnchor => Some("Invalid or missing nevent to follow."),
            FeedStatus::Stopped => Some("Feed stopped."),
            FeedStatus::Loading => Some("Loading replies or none found..."),
            FeedStatus::NoReplies => Some("No replies yet..."),
            FeedStatus::Showing(_) => None,
            FeedStatus::Disconnected(_) => Some("Relays closed the reply subscription."),
        }
    }
}

/// Immutable view of a session published after every state change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pub phase: SessionPhase,
    pub status: FeedStatus,
    /// Newest arrival first
    pub replies: Vec<Reply>,
    pub profiles: HashMap<String, ProfileRecord>,
    pub in_flight: usize,
    /// Stored replies have all been delivered
    pub end_of_stored: bool,
}

/// One rendered row of the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry<'a> {
    pub reply: &'a Reply,
    pub label: String,
    pub initials: String,
    pub picture_url: Option<&'a str>,
    pub loading: bool,
}

impl FeedSnapshot {
    pub fn entries(&self) -> Vec<FeedEntry<'_>> {
        self.replies
            .iter()
            .map(|reply| {
                let profile = self.profiles.get(&reply.author_id);
                let label = display_label(profile, &reply.author_id);
                FeedEntry {
                    reply,
                    initials: author_initials(&label),
                    label,
                    picture_url: profile.and_then(|p| p.picture_url.as_deref()),
                    loading: profile.is_some_and(|p| p.is_loading),
                }
            })
            .collect()
    }

    pub fn reply_ids(&self) -> Vec<&str> {
        self.replies.iter().map(|r| r.id.as_str()).collect()
    }
}
