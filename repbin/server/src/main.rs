// Copyright (c) 2024 Botho Foundation

//! Federated anonymous paste/message server. Loads a TOML config, opens storage, and either
//! starts the HTTP surface plus timer loop (`--start`), prints a runnable default config
//! (`--showconfig`), or drains and prints the stats actor once (`--stat`).

mod admission;
mod config;
mod error;
mod http;
mod stats;
mod timers;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::RwLock;

use bth_repbin_peer::load_peer_file;
use bth_repbin_store::Store;

use config::ServerConfig;
use http::ServerState;
use stats::Stats;

#[derive(Parser)]
#[command(name = "repbin-server")]
#[command(about = "A federated, anonymous, encrypted paste/message server", long_about = None)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short = 'c', long, default_value = "repbin.toml")]
    configfile: PathBuf,

    /// Print a complete, runnable default config (with freshly generated secrets if unset)
    /// and exit.
    #[arg(long)]
    showconfig: bool,

    /// Print the version and exit.
    #[arg(long)]
    version: bool,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    /// Start the HTTP surface and timer loop.
    #[arg(long)]
    start: bool,

    /// Print current stats once and exit (storage must already exist).
    #[arg(long)]
    stat: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.version {
        println!("repbin-server {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if cli.showconfig {
        let cfg = load_or_default(&cli.configfile).with_generated_secrets();
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let cfg = ServerConfig::load(&cli.configfile)
        .map_err(|err| anyhow::anyhow!("loading {}: {err}", cli.configfile.display()))?;

    if cli.stat {
        let store = Arc::new(Store::open(&cfg.db_driver, &cfg.db_dsn, cfg.storage_path.clone(), cfg.pool_size, cfg.workers)?);
        let (_message_store, _rx) = bth_repbin_messagestore::MessageStore::new(store);
        Stats::new().log();
        return Ok(());
    }

    if !cli.start {
        eprintln!("nothing to do; pass --start, --showconfig, --stat, or --version");
        return Ok(());
    }

    run_server(cfg).await
}

fn load_or_default(path: &std::path::Path) -> ServerConfig {
    ServerConfig::load(path).unwrap_or_default()
}

async fn run_server(cfg: ServerConfig) -> anyhow::Result<()> {
    let (peering_key, generated_peering) = cfg.peering_key();
    let (challenge_secret, generated_challenge) = cfg.challenge_secret();
    if generated_peering || generated_challenge {
        tracing::warn!(
            "running with an ephemeral peering key or challenge secret; peers will not \
             recognize this server across restarts until the generated values are persisted \
             to the config file"
        );
    }
    let peering_pub = peering_key.verifying_key().to_bytes();

    let store = Arc::new(Store::open(
        &cfg.db_driver,
        &cfg.db_dsn,
        cfg.storage_path.clone(),
        cfg.pool_size,
        cfg.workers,
    )?);
    let (message_store, notify_rx) = bth_repbin_messagestore::MessageStore::new(store.clone());
    let message_store = Arc::new(message_store);

    let snapshot = load_peer_file(
        &cfg.peer_file,
        &peering_pub,
        cfg.include_self_peer,
        cfg.advertise_url.as_deref(),
    )
    .unwrap_or_else(|err| {
        tracing::warn!(%err, "starting with an empty peer list");
        bth_repbin_peer::PeerSnapshot::default()
    });

    let mut client_builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(cfg.peer_timeout_secs));
    if !cfg.socks_proxy.is_empty() {
        client_builder = client_builder.proxy(reqwest::Proxy::all(cfg.socks_proxy.as_str())?);
    }
    let client = client_builder.build()?;

    let state = Arc::new(ServerState {
        message_store,
        store,
        config: Arc::new(cfg.clone()),
        peering_key: Arc::new(peering_key),
        peering_pub,
        challenge_secret,
        peers: RwLock::new(Arc::new(snapshot)),
        stats: Arc::new(Stats::new()),
        time_skew: rand_skew(cfg.max_time_skew),
    });

    let timer_state = state.clone();
    let timer_client = client.clone();
    tokio::spawn(async move {
        timers::run(timer_state, timer_client, notify_rx).await;
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    http::serve(addr, state).await?;
    Ok(())
}

/// A single random offset in `[0, max_time_skew]`, baked in at startup so every outbound
/// timestamp this process emits carries the same skew, rather than each request
/// independently jittering its own clock (§4.C's freshness discipline).
fn rand_skew(max_time_skew: u64) -> u64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..=max_time_skew)
}

fn init_tracing(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();
}
