use chrono::DateTime;
use madstr_core::feed::FeedEntry;
use madstr_core::{FeedSnapshot, FeedStatus};

fn format_timestamp(secs: u64) -> String {
    DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn render_entry(entry: &FeedEntry<'_>) -> String {
    let mut line = format!(
        "[{}] {} ({})",
        format_timestamp(entry.reply.created_at),
        entry.label,
        entry.initials
    );
    if entry.loading {
        line.push_str(" …");
    }
    line.push_str(": ");
    line.push_str(&entry.reply.content.replace('\n', " "));
    line
}

/// Plain-text rendering of a snapshot, newest reply first
pub fn render_snapshot(snapshot: &FeedSnapshot) -> String {
    let mut out = match snapshot.status {
        FeedStatus::Showing(n) => format!("── {} {} ──", n, if n == 1 { "reply" } else { "replies" }),
        status => status.message().unwrap_or_default().to_string(),
    };
    for entry in snapshot.entries() {
        out.push('\n');
        out.push_str(&render_entry(&entry));
    }
    out
}
