//! Copy-trader binary: wire the pipeline and run until drained
//!
//! Exit code 0 is a clean drain; anything else is the crash/abort path.

use anyhow::{Context, Result};
use clap::Parser;
use copytrade_engine::{
    coordinator::ControlCommand, Analyzer, ChainRpc, Coordinator, CoordinatorConfig, EventSink,
    Executor, ExecutorConfig, IngressConfig, JsonFileConfigStore, LocalKeyring, LogEventSink,
    Metrics, PoolCache, PriorityFeePolicy, SigningOracle, SolanaRpc, SwapBuilder, WsStreamSource,
};
use copytrade_engine::aggregator_client::AggregatorClient;
use copytrade_engine::pool_cache::spawn_ttl_sweeper;
use copytrade_engine::priority_fee::spawn_refresh_task;
use copytrade_engine::stream_ingress::spawn_stream_ingress;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "copytrader", about = "Real-time Solana copy-trading engine")]
struct Args {
    /// Follower configuration file (JSON)
    #[arg(long, default_value = "followers.json")]
    config: PathBuf,

    /// HTTP RPC endpoint
    #[arg(long, env = "SOLANA_RPC_ENDPOINT", default_value = "https://api.mainnet-beta.solana.com")]
    rpc_url: String,

    /// WebSocket pub-sub endpoint
    #[arg(long, env = "SOLANA_WS_ENDPOINT", default_value = "wss://api.mainnet-beta.solana.com")]
    ws_url: String,

    /// Dedicated low-latency submission endpoint
    #[arg(long, env = "SUBMIT_ENDPOINT")]
    submit_url: Option<String>,

    /// External aggregator API base URL
    #[arg(long, env = "AGGREGATOR_URL", default_value = "https://quote-api.jup.ag/v6")]
    aggregator_url: String,

    /// Include a tip to a known MEV-protection account per transaction
    #[arg(long)]
    mev_protection: bool,

    /// Tip size in lamports when MEV protection is on
    #[arg(long, default_value_t = 100_000)]
    tip_lamports: u64,

    /// Simulate and emit outcomes without submitting
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().expect("valid directive")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => {
            info!("clean drain, exiting");
        }
        Err(e) => {
            error!("fatal: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let metrics = Metrics::new().context("metrics registry")?;

    // Infrastructure that must be up before anything trades
    let config_store = JsonFileConfigStore::open(args.config.clone())
        .await
        .context("config store unavailable at startup")?;
    let keyring = LocalKeyring::from_env("FOLLOWER_KEYS")
        .context("signing keys unavailable at startup")?;
    let signer: Arc<dyn SigningOracle> = Arc::new(keyring);

    let rpc: Arc<dyn ChainRpc> =
        Arc::new(SolanaRpc::new(args.rpc_url.clone(), args.submit_url.clone()));
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);

    let cache = Arc::new(PoolCache::new(metrics.clone()));
    spawn_ttl_sweeper(cache.clone(), Duration::from_secs(1));

    let fee_policy = PriorityFeePolicy::new();
    spawn_refresh_task(fee_policy.clone(), Duration::from_secs(30));

    let builder = Arc::new(SwapBuilder::new(
        rpc.clone(),
        cache,
        Arc::new(AggregatorClient::new(args.aggregator_url.clone())),
    ));
    let executor = Arc::new(Executor::new(
        rpc.clone(),
        builder,
        signer.clone(),
        sink.clone(),
        fee_policy,
        metrics.clone(),
        ExecutorConfig {
            mev_protection: args.mev_protection,
            tip_lamports: args.tip_lamports,
            dry_run: args.dry_run,
            ..Default::default()
        },
    ));

    let source = Arc::new(WsStreamSource::new(args.ws_url.clone(), rpc.clone()));
    let (ingress, transactions) =
        spawn_stream_ingress(source, metrics.clone(), IngressConfig::default());

    let coordinator = Coordinator::new(
        Analyzer::new(metrics.clone()),
        config_store,
        signer,
        executor,
        sink,
        rpc,
        ingress.clone(),
        metrics,
        CoordinatorConfig::default(),
    )
    .await?;

    let (control_tx, control_rx) = mpsc::channel(8);
    let coordinator_task = tokio::spawn(coordinator.run(transactions, control_rx));

    // SIGINT drains: finish in-flight plans, accept no new ones
    tokio::spawn({
        let control_tx = control_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, draining");
                let _ = control_tx.send(ControlCommand::Drain).await;
            }
        }
    });

    coordinator_task.await.context("coordinator task panicked")?;
    ingress.shutdown();
    Ok(())
}
