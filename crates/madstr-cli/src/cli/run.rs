use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use madstr_core::constants::CONTACT_LIST_GRACE_SECS;
use madstr_core::nostr::{fetch_author_set, RelayTransport};
use madstr_core::store::{ProfileCache, SqliteProfileCache};
use madstr_core::{FeedCommand, FeedSession, FeedSnapshot, FeedStatus, SessionPhase};
use tokio::sync::mpsc;

use super::config::{AuthorSource, RunOptions};
use super::render::render_snapshot;

/// Drop expired cached profiles in the background
fn spawn_expiry_sweep(cache: Arc<dyn ProfileCache>) {
    tokio::spawn(async move {
        match cache.delete_expired().await {
            Ok(0) => {}
            Ok(deleted) => tracing::info!(deleted, "Removed expired cached profiles"),
            Err(e) => tracing::warn!(error = %e, "Failed to sweep expired profiles"),
        }
    });
}

/// Stored replies are in (or relays stopped sending) and no profile lookup is pending
fn settled(snapshot: &FeedSnapshot) -> bool {
    let done = snapshot.end_of_stored || matches!(snapshot.status, FeedStatus::Disconnected(_));
    done && snapshot.in_flight == 0
}

/// Connect, follow the anchor and print every feed change until interrupted
/// (or, with `once`, until the stored replies are loaded).
pub async fn run(options: RunOptions) -> Result<()> {
    let core = &options.core;

    let cache = Arc::new(
        SqliteProfileCache::open(core.profile_cache_path(), core.profile_ttl_secs)
            .with_context(|| {
                format!(
                    "Failed to open profile cache: {}",
                    core.profile_cache_path().display()
                )
            })?,
    );
    spawn_expiry_sweep(cache.clone());

    let transport = Arc::new(
        RelayTransport::connect(
            &core.relay_urls,
            Duration::from_secs(core.connect_timeout_secs),
        )
        .await
        .context("Failed to connect to relays")?,
    );

    let authors = match &options.authors {
        AuthorSource::Explicit(authors) => authors.clone(),
        AuthorSource::ContactList(owner) => fetch_author_set(
            transport.as_ref(),
            *owner,
            Duration::from_secs(CONTACT_LIST_GRACE_SECS),
        )
        .await
        .context("Failed to fetch contact list")?,
    };
    tracing::info!(authors = authors.len(), "Author set ready");

    let (session, mut snapshots) = FeedSession::new(core.feed, cache);
    let (commands, command_rx) = mpsc::unbounded_channel();
    let session_task = tokio::spawn(session.run(command_rx));

    let send = |command: FeedCommand| {
        commands
            .send(command)
            .map_err(|_| anyhow!("Feed session stopped unexpectedly"))
    };
    send(FeedCommand::SetAuthors(authors))?;
    send(FeedCommand::SetAnchor(options.nevent.clone()))?;
    send(FeedCommand::AttachTransport(transport.clone()))?;

    let mut last_rendered = String::new();
    let outcome = loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break Err(anyhow!("Feed session ended"));
                }
                let snapshot = snapshots.borrow_and_update().clone();

                if let SessionPhase::Invalid(e) = &snapshot.phase {
                    break Err(anyhow!(e.clone()));
                }

                let rendered = render_snapshot(&snapshot);
                if rendered != last_rendered {
                    println!("{}\n", rendered);
                    last_rendered = rendered;
                }

                if options.once && settled(&snapshot) {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break Ok(());
            }
        }
    };

    let _ = send(FeedCommand::Shutdown);
    if let Err(e) = session_task.await {
        tracing::warn!(error = %e, "Feed session task failed");
    }
    transport.shutdown().await;
    outcome
}
