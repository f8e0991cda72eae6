#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sigchain_verifier::{
    config::Config,
    loader::{ChainLoader, FileLinkSource},
    sigchain::{ChainVerifier, EmbeddedKeyResolver, LinkCache, TeamRole},
};
use tracing_subscriber::EnvFilter;

/// Verify one identity's sigchain from a local chain file.
#[derive(Debug, Parser)]
#[command(name = "sigchain-verifier", version)]
struct Args {
    /// Identity whose chain is read from `<chains_dir>/<identity>.json`.
    #[arg(long)]
    identity: String,

    /// Reader's role, for team chains (none, reader, writer, admin, owner).
    #[arg(long)]
    role: Option<TeamRole>,

    /// YAML configuration file.
    #[arg(long, default_value = "sigchain.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    // Load and validate configuration first (fail-fast)
    let config = Config::load_from(&args.config).map_err(|e| anyhow::anyhow!("{e}"))?;

    let filter = EnvFilter::try_new(&config.logging.level)
        .with_context(|| format!("invalid log level {:?}", config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        identity = %args.identity,
        "sigchain-verifier starting up"
    );

    let capacity = config
        .cache
        .capacity()
        .context("cache.capacity cannot be 0")?;
    let verifier = ChainVerifier::new(
        Arc::new(LinkCache::new(capacity)),
        Arc::new(EmbeddedKeyResolver),
    )
    .with_reject_past_merkle_tip(config.verification.reject_past_merkle_tip);
    let source = Arc::new(FileLinkSource::new(&config.source.chains_dir));
    let loader = ChainLoader::new(source, verifier);

    let links = loader
        .load(&args.identity, args.role)
        .await
        .with_context(|| format!("verifying chain of {}", args.identity))?;

    let revoked = links.iter().filter(|l| l.is_revoked()).count();
    let stubbed = links.iter().filter(|l| l.is_stubbed()).count();
    tracing::info!(
        identity = %args.identity,
        links = links.len(),
        tip = links.last().map_or(0, |l| l.seqno()),
        revoked,
        stubbed,
        "chain verified"
    );
    tracing::info!(stats = ?loader.verifier().link_cache_stats(), "link cache");

    Ok(())
}
