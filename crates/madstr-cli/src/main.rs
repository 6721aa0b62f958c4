use std::path::PathBuf;

use clap::Parser;
use madstr_cli::cli::{init_tracing, run, CliConfig};

#[derive(Parser)]
#[command(name = "madstr-cli")]
#[command(about = "Follow the replies to a nostr post")]
struct Cli {
    /// nevent of the post to follow (a `nostr:` prefix is accepted)
    nevent: Option<String>,

    /// Relay URL (can be specified multiple times)
    #[arg(long, short = 'r')]
    relay: Vec<String>,

    /// Author whose replies are shown, npub or hex (can be specified multiple
    /// times). Without any, the owner's contact list is used.
    #[arg(long, short = 'a')]
    author: Vec<String>,

    /// Owner npub whose contact list defines the authors
    #[arg(long, short = 'o')]
    owner: Option<String>,

    /// Path to JSON config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory holding the profile cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Limit on stored replies requested from relays
    #[arg(long, short = 'l')]
    limit: Option<usize>,

    /// Keep at most this many replies, dropping the oldest
    #[arg(long)]
    max_replies: Option<usize>,

    /// Exit after the stored replies are loaded
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn flags(&self) -> CliConfig {
        CliConfig {
            relays: self.relay.clone(),
            nevent: self.nevent.clone(),
            owner: self.owner.clone(),
            authors: self.author.clone(),
            data_dir: self.data_dir.clone(),
            reply_limit: self.limit,
            max_replies: self.max_replies,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("Warning: {:#}", e);
    }

    let file_config = match &cli.config {
        Some(path) => match CliConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        },
        None => CliConfig::default(),
    };

    let options = match file_config.overlay(cli.flags()).into_run_options(cli.once) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(options).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
