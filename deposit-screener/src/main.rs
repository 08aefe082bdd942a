// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use deposit_screener::config::DepositScreenerConfig;
use deposit_screener::node::run_deposit_screener;
use deposit_screener::queue::flatten_join_result;
use deposit_screener_config::Config;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
    /// Emit logs as JSON lines
    #[clap(long)]
    pub json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let config = DepositScreenerConfig::load(&args.config_path)?;
    info!(
        "Starting deposit screener for {} assets, metrics on port {}",
        config.supported_assets.len(),
        config.metrics_port
    );

    let prometheus_registry = prometheus::Registry::new();
    let node = run_deposit_screener(config, prometheus_registry).await?;
    let cancel = node.pipeline.cancel.clone();
    let mut workers = futures::future::select_all(node.pipeline.handles);

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        finished = &mut workers => Some(finished),
    };
    let remaining = match finished {
        None => {
            info!("Received shutdown signal");
            workers.into_inner()
        }
        // workers only return on their own after a fatal error
        Some((result, index, remaining)) => {
            if let Err(e) = flatten_join_result(result) {
                error!("Worker {} stopped: {:?}", index, e);
                cancel.cancel();
                futures::future::join_all(remaining).await;
                node.server.abort();
                return Err(e.into());
            }
            remaining
        }
    };
    cancel.cancel();
    futures::future::join_all(remaining).await;
    node.server.abort();
    info!("Deposit screener stopped");
    Ok(())
}
