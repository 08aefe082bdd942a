// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::{DepositEventSource, DepositManagerReader, TransactionSubmitter};
use crate::config::DepositScreenerConfig;
use crate::error::ScreenerResult;
use crate::eth_client::EthClient;
use crate::eth_event_source::EthDepositEventSource;
use crate::fulfiller::{bootstrap_window, FulfillerConfig, FulfillerWorker};
use crate::metrics::ScreenerMetrics;
use crate::queue::{run_job_worker, InMemoryJobQueue, JobOptions, JobQueue};
use crate::rules::{HttpRiskDataFetcher, RuleSet};
use crate::screener::{
    fulfillment_queue_name, Arbiter, DepositScreener, FulfillmentQueues, Ingestor,
    ScreenerDelayCalculator, VerdictDelayCalculator, SCREENER_QUEUE_NAME,
};
use crate::server::{run_server, ServerState};
use crate::signer::DepositCompletionSigner;
use crate::store::{InMemoryStatusStore, StatusStore};
use crate::types::SupportedAssets;
use crate::utils::{now_ms, read_wallet};
use crate::wait_estimator::WaitEstimator;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the pipeline needs from the outside world
pub struct PipelineComponents {
    pub rule_set: Arc<RuleSet>,
    pub chain: Arc<dyn DepositManagerReader>,
    pub submitter: Arc<dyn TransactionSubmitter>,
    pub events: Arc<dyn DepositEventSource>,
    pub signer: DepositCompletionSigner,
    pub store: Arc<dyn StatusStore>,
    pub supported_assets: Arc<SupportedAssets>,
    pub delay_calculator: Arc<dyn ScreenerDelayCalculator>,
    pub job_options: JobOptions,
    pub fulfiller_config: FulfillerConfig,
    pub event_poll_interval: Duration,
    pub queue_poll_interval: Duration,
    pub metrics: Arc<ScreenerMetrics>,
}

pub struct Pipeline {
    pub screener_queue: Arc<dyn JobQueue>,
    pub fulfillment_queues: Arc<FulfillmentQueues>,
    pub fulfillers: Vec<Arc<FulfillerWorker>>,
    /// Ingestion, arbiter, then one fulfiller per asset
    pub handles: Vec<JoinHandle<ScreenerResult<()>>>,
    pub cancel: CancellationToken,
}

/// Bootstrap every asset's rate-limit window, then spawn ingestion, the
/// arbiter and one fulfiller per asset.
pub async fn start_pipeline(components: PipelineComponents) -> ScreenerResult<Pipeline> {
    let PipelineComponents {
        rule_set,
        chain,
        submitter,
        events,
        signer,
        store,
        supported_assets,
        delay_calculator,
        job_options,
        fulfiller_config,
        event_poll_interval,
        queue_poll_interval,
        metrics,
    } = components;

    let screener_queue: Arc<dyn JobQueue> =
        Arc::new(InMemoryJobQueue::new(SCREENER_QUEUE_NAME, metrics.clone()));
    let fulfillment_queues: Arc<FulfillmentQueues> = Arc::new(
        supported_assets
            .iter()
            .map(|asset| {
                let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(
                    &fulfillment_queue_name(&asset.ticker),
                    metrics.clone(),
                ));
                (asset.address, queue)
            })
            .collect(),
    );

    let now = now_ms();
    let windows = futures::future::try_join_all(
        supported_assets
            .iter()
            .map(|asset| bootstrap_window(asset, chain.as_ref(), now)),
    )
    .await?;

    let cancel = CancellationToken::new();
    let mut handles = vec![];

    let ingestor = Arc::new(Ingestor::new(
        rule_set.clone(),
        chain.clone(),
        store.clone(),
        screener_queue.clone(),
        supported_assets.clone(),
        delay_calculator,
        job_options,
        metrics.clone(),
    ));
    handles.push(tokio::spawn(ingestor.run(
        events,
        event_poll_interval,
        cancel.clone(),
    )));

    let arbiter = Arc::new(Arbiter::new(
        rule_set,
        chain.clone(),
        store.clone(),
        fulfillment_queues.clone(),
        supported_assets.clone(),
        job_options,
        metrics.clone(),
    ));
    handles.push(tokio::spawn(run_job_worker(
        screener_queue.clone(),
        arbiter,
        queue_poll_interval,
        cancel.clone(),
        metrics.clone(),
    )));

    let signer = Arc::new(Mutex::new(signer));
    let mut fulfillers = vec![];
    for (asset, window) in supported_assets.iter().zip(windows) {
        let Some(queue) = fulfillment_queues.get(&asset.address) else {
            continue;
        };
        let worker = Arc::new(FulfillerWorker::new(
            asset.clone(),
            window,
            chain.clone(),
            submitter.clone(),
            signer.clone(),
            store.clone(),
            fulfiller_config,
            metrics.clone(),
        ));
        handles.push(tokio::spawn(run_job_worker(
            queue.clone(),
            worker.clone(),
            queue_poll_interval,
            cancel.clone(),
            metrics.clone(),
        )));
        fulfillers.push(worker);
    }
    info!(
        "[Node] Pipeline started with {} fulfillers",
        fulfillers.len()
    );

    Ok(Pipeline {
        screener_queue,
        fulfillment_queues,
        fulfillers,
        handles,
        cancel,
    })
}

pub struct DepositScreenerNode {
    pub pipeline: Pipeline,
    pub server: JoinHandle<()>,
}

pub async fn run_deposit_screener(
    config: DepositScreenerConfig,
    prometheus_registry: prometheus::Registry,
) -> anyhow::Result<DepositScreenerNode> {
    let metrics = Arc::new(ScreenerMetrics::new(&prometheus_registry));

    let attestation_key = read_wallet(&config.attestation_key_path)?;
    let tx_signer = read_wallet(&config.tx_signer_key_path)?;
    let signer = DepositCompletionSigner::new(attestation_key, config.eip712_domain());
    info!(
        "[Node] Attesting completions as {:?} for {:?}",
        signer.address(),
        config.deposit_manager_address
    );

    let eth_client = Arc::new(
        EthClient::new(
            &config.eth_rpc_url,
            config.deposit_manager_address,
            tx_signer,
            config.chain_id,
        )
        .await?,
    );
    let events = Arc::new(EthDepositEventSource::new(
        eth_client.client(),
        config.deposit_manager_address,
        config.start_block,
        config.event_block_range,
        config.confirmations,
    ));

    let fetcher = Arc::new(HttpRiskDataFetcher::new(
        config.risk_data_endpoints(),
        config.risk_data_timeout,
        metrics.clone(),
    )?);
    let rule_set = Arc::new(
        RuleSet::new(fetcher, metrics.clone())
            .with_rules(config.rules())
            .with_base_delay(config.base_delay_secs),
    );
    info!("[Node] Loaded rules {:?}", rule_set.rule_names());

    let supported_assets = Arc::new(config.supported_assets());
    let store: Arc<dyn StatusStore> = Arc::new(InMemoryStatusStore::new());
    let delay_calculator: Arc<dyn ScreenerDelayCalculator> =
        Arc::new(VerdictDelayCalculator::new(config.max_delay()));

    let pipeline = start_pipeline(PipelineComponents {
        rule_set: rule_set.clone(),
        chain: eth_client.clone(),
        submitter: eth_client,
        events,
        signer,
        store: store.clone(),
        supported_assets: supported_assets.clone(),
        delay_calculator: delay_calculator.clone(),
        job_options: config.job_options(),
        fulfiller_config: config.fulfiller_config(),
        event_poll_interval: config.event_poll_interval,
        queue_poll_interval: config.queue_poll_interval,
        metrics: metrics.clone(),
    })
    .await?;

    let estimator = Arc::new(WaitEstimator::new(
        DepositScreener::new(rule_set),
        delay_calculator,
        pipeline.screener_queue.clone(),
        pipeline.fulfillment_queues.clone(),
        supported_assets,
    ));
    let socket_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
    let server = run_server(
        &socket_address,
        ServerState {
            estimator,
            store,
            metrics,
            registry: prometheus_registry,
        },
    );

    Ok(DepositScreenerNode { pipeline, server })
}
