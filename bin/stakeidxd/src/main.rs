//! Staking indexer daemon entrypoint.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use argh::from_env;
use bitcoind_async_client::Client;
use stakeidx_btcio::{run_block_poller, PollerConfig, RetryConfig};
use stakeidx_db_sled::{open_sled_database, StakingIndexerDBSled};
use stakeidx_events::{BackoffPolicy, HttpSink, Publisher};
use stakeidx_indexer::{run_confirmed_worker, run_tip_worker, ExecConfig, IndexerState};
use stakeidx_params::VersionedStakingParams;
use stakeidx_tasks::TaskManager;
use tokio::{runtime, sync::mpsc};
use tracing::info;

use crate::{args::Args, config::Config};

mod args;
mod config;

fn main() -> Result<()> {
    let args: Args = from_env();
    let config = Config::load(&args)?;

    init_logging();

    // Params problems are fatal here, before anything is spawned.
    let params = Arc::new(
        VersionedStakingParams::load_from_file(&config.params_file_path)
            .map_err(|e| anyhow!("invalid staking params: {e}"))?,
    );

    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("stakeidx-rt")
        .build()
        .context("building tokio runtime")?;

    let db = Arc::new(StakingIndexerDBSled::new(open_sled_database(&config.db_path)?)?);

    let sink = Arc::new(HttpSink::new(config.broker_endpoint.clone()));
    let publisher = Publisher::new(sink, BackoffPolicy::default());

    let (state, tracker, start_height) = IndexerState::open(
        params.clone(),
        db.clone(),
        publisher,
        config.start_height_override,
    )?;

    let confirmation_depth = params
        .params_for_height(start_height)
        .unwrap_or_else(|| &params.versions[0])
        .confirmation_depth;

    let client = Arc::new(
        Client::new(
            config.chain_rpc_endpoint.clone(),
            config.chain_rpc_user.clone(),
            config.chain_rpc_pass.clone(),
            None,
            None,
        )
        .map_err(|e| anyhow!("building bitcoind client: {e}"))?,
    );

    let manager = TaskManager::new(rt.handle().clone());
    let executor = manager.executor();

    let (confirmed_tx, confirmed_rx) = mpsc::channel(8);
    let (tip_tx, tip_rx) = mpsc::channel(64);

    let poller_config = PollerConfig {
        poll_interval: config.poll_interval(),
        confirmation_depth,
        retry: RetryConfig::default(),
    };
    executor.spawn_critical_async("block_poller", {
        let client = client.clone();
        move |shutdown| {
            run_block_poller(client, poller_config, start_height, confirmed_tx, tip_tx, shutdown)
        }
    });

    executor.spawn_critical_async("confirmed_worker", move |shutdown| {
        run_confirmed_worker(state, confirmed_rx, ExecConfig::default(), shutdown)
    });

    executor.spawn_critical_async("tip_worker", {
        let db = db.clone();
        let params = params.clone();
        let tracker = tracker.clone();
        move |shutdown| run_tip_worker(db, params, tracker, tip_rx, shutdown)
    });

    // Let downstream consumers see the starting totals.
    rt.block_on(tracker.emit_snapshot())?;

    info!(%start_height, %confirmation_depth, "stakeidx daemon running");

    manager.start_signal_listeners();
    manager.monitor(Some(config.shutdown_timeout()))?;

    info!("exiting");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
