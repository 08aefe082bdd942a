// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only HTTP surface: liveness, prometheus exposition and wait estimates.

use crate::error::ScreenerError;
use crate::metrics::ScreenerMetrics;
use crate::store::StatusStore;
use crate::types::{DepositHash, DepositRequestStatus};
use crate::wait_estimator::WaitEstimator;
use crate::with_metrics;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ethers::types::{Address, U256};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, instrument};

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";
// axum 0.7 path syntax
pub const DEPOSIT_STATUS_PATH: &str = "/deposits/:deposit_hash";
pub const WAIT_ESTIMATE_PATH: &str = "/wait-estimate";

#[derive(Clone)]
pub struct ServerState {
    pub estimator: Arc<WaitEstimator>,
    pub store: Arc<dyn StatusStore>,
    pub metrics: Arc<ScreenerMetrics>,
    pub registry: Registry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositStatusResponse {
    pub deposit_hash: DepositHash,
    pub status: DepositRequestStatus,
    /// Absent once screening has failed
    pub eta_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitEstimateQuery {
    pub spender: Address,
    pub asset: Address,
    /// Decimal amount in base units
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitEstimateResponse {
    pub eta_seconds: u64,
}

#[derive(Debug)]
pub enum ServerError {
    BadRequest(String),
    NotFound(String),
    Screener(ScreenerError),
}

impl From<ScreenerError> for ServerError {
    fn from(err: ScreenerError) -> Self {
        ServerError::Screener(err)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ServerError::Screener(e) => {
                let status = match &e {
                    ScreenerError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    ScreenerError::UnsupportedAsset(_) => StatusCode::BAD_REQUEST,
                    ScreenerError::JobNotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, message).into_response()
    }
}

pub fn run_server(socket_address: &SocketAddr, state: ServerState) -> tokio::task::JoinHandle<()> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(socket_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("[Server] Failed to bind {}: {:?}", socket_address, e);
                return;
            }
        };
        info!("[Server] Listening on {}", socket_address);
        if let Err(e) = axum::serve(listener, make_router(state).into_make_service()).await {
            error!("[Server] Stopped: {:?}", e);
        }
    })
}

pub fn make_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(METRICS_PATH, get(metrics))
        .route(DEPOSIT_STATUS_PATH, get(deposit_status))
        .route(WAIT_ESTIMATE_PATH, get(wait_estimate))
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<ServerState>) -> Result<String, ServerError> {
    let mut buffer = vec![];
    TextEncoder::new()
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| ServerError::Screener(ScreenerError::Internal(e.to_string())))?;
    String::from_utf8(buffer)
        .map_err(|e| ServerError::Screener(ScreenerError::Internal(e.to_string())))
}

#[instrument(level = "error", skip_all, fields(deposit_hash = %deposit_hash))]
async fn deposit_status(
    Path(deposit_hash): Path<String>,
    State(state): State<ServerState>,
) -> Result<Json<DepositStatusResponse>, ServerError> {
    let future = async {
        let hash: DepositHash = deposit_hash.parse().map_err(ServerError::BadRequest)?;
        let status = state.store.get_status(hash).await?;
        let eta_seconds = match status {
            DepositRequestStatus::DoesNotExist => {
                return Err(ServerError::NotFound(format!("unknown deposit {}", hash)))
            }
            DepositRequestStatus::FailedScreen => None,
            // the job already finished while the stored status lags behind
            status => match state.estimator.estimate_wait_existing(hash, status).await {
                Ok(eta) => Some(eta),
                Err(ScreenerError::JobNotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
        };
        Ok::<_, ServerError>(Json(DepositStatusResponse {
            deposit_hash: hash,
            status,
            eta_seconds,
        }))
    };
    with_metrics!(state.metrics.clone(), "deposit_status", future).await
}

async fn wait_estimate(
    Query(query): Query<WaitEstimateQuery>,
    State(state): State<ServerState>,
) -> Result<Json<WaitEstimateResponse>, ServerError> {
    let future = async {
        let value = U256::from_dec_str(&query.value)
            .map_err(|e| ServerError::BadRequest(format!("invalid value {}: {}", query.value, e)))?;
        let eta_seconds = state
            .estimator
            .estimate_wait_prospective(query.spender, query.asset, value)
            .await?;
        Ok::<_, ServerError>(Json(WaitEstimateResponse { eta_seconds }))
    };
    with_metrics!(state.metrics.clone(), "wait_estimate", future).await
}

#[macro_export]
macro_rules! with_metrics {
    ($metrics:expr, $type_:expr, $func:expr) => {
        async move {
            info!("[Server] Received {} request", $type_);
            $metrics
                .requests_received
                .with_label_values(&[$type_])
                .inc();
            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .inc();

            let result = $func.await;

            match &result {
                Ok(_) => {
                    $metrics.requests_ok.with_label_values(&[$type_]).inc();
                }
                Err(e) => {
                    info!("[Server] {} request failed: {:?}", $type_, e);
                    $metrics.err_requests.with_label_values(&[$type_]).inc();
                }
            }

            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .dec();
            result
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobQueue, JobOptions, JobQueue};
    use crate::rules::RuleSet;
    use crate::screener::{
        DepositScreener, FulfillmentQueues, VerdictDelayCalculator, SCREENER_QUEUE_NAME,
    };
    use crate::store::InMemoryStatusStore;
    use crate::test_utils::{deposit_for_asset, supported_asset, CountingRiskDataFetcher};
    use crate::types::SupportedAssets;

    struct Harness {
        base_url: String,
        store: Arc<InMemoryStatusStore>,
        screener_queue: Arc<InMemoryJobQueue>,
        asset: Address,
    }

    // cap 3600 per hour admits one unit per second
    async fn start() -> Harness {
        let registry = Registry::new();
        let metrics = Arc::new(ScreenerMetrics::new(&registry));
        let asset = supported_asset("TEST", 3600, 3600);
        let address = asset.address;
        let screener_queue = Arc::new(InMemoryJobQueue::new(SCREENER_QUEUE_NAME, metrics.clone()));
        let store = Arc::new(InMemoryStatusStore::new());
        let rule_set = Arc::new(RuleSet::new(
            Arc::new(CountingRiskDataFetcher::default()),
            metrics.clone(),
        ));
        let estimator = Arc::new(WaitEstimator::new(
            DepositScreener::new(rule_set),
            Arc::new(VerdictDelayCalculator::default()),
            screener_queue.clone(),
            Arc::new(FulfillmentQueues::new()),
            Arc::new(SupportedAssets::new([asset])),
        ));
        let state = ServerState {
            estimator,
            store: store.clone(),
            metrics,
            registry,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, make_router(state).into_make_service())
                .await
                .unwrap();
        });
        Harness {
            base_url: format!("http://{}", addr),
            store,
            screener_queue,
            asset: address,
        }
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let h = start().await;
        let resp = reqwest::get(format!("{}{}", h.base_url, HEALTH_PATH))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        // a request first so the request counters have a sample
        reqwest::get(format!("{}/deposits/0x00", h.base_url))
            .await
            .unwrap();
        let body = reqwest::get(format!("{}{}", h.base_url, METRICS_PATH))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("screener_requests_received"));
    }

    #[tokio::test]
    async fn test_deposit_status() {
        let h = start().await;
        let deposit = deposit_for_asset(h.asset, 60);
        let hash = deposit.hash();

        let resp = reqwest::get(format!("{}/deposits/{}", h.base_url, hash))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        h.store.store_deposit_request(&deposit).await.unwrap();
        h.store
            .set_status(hash, DepositRequestStatus::PassedFirstScreen)
            .await
            .unwrap();
        h.screener_queue
            .enqueue(hash, &deposit, JobOptions::default())
            .await
            .unwrap();
        let resp: DepositStatusResponse = reqwest::get(format!("{}/deposits/{}", h.base_url, hash))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp.status, DepositRequestStatus::PassedFirstScreen);
        assert_eq!(resp.eta_seconds, Some(60));

        // once the job has finished there is no position left to estimate
        let job = h.screener_queue.next_ready().await.unwrap().unwrap();
        h.screener_queue.complete(job.id).await.unwrap();
        let resp: DepositStatusResponse = reqwest::get(format!("{}/deposits/{}", h.base_url, hash))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp.status, DepositRequestStatus::PassedFirstScreen);
        assert_eq!(resp.eta_seconds, None);

        let resp = reqwest::get(format!("{}/deposits/not-a-hash", h.base_url))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_wait_estimate() {
        let h = start().await;
        let resp: WaitEstimateResponse = reqwest::get(format!(
            "{}{}?spender={:?}&asset={:?}&value=100",
            h.base_url,
            WAIT_ESTIMATE_PATH,
            Address::repeat_byte(1),
            h.asset
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        // empty queues and no rules
        assert_eq!(resp.eta_seconds, 0);

        let resp = reqwest::get(format!(
            "{}{}?spender={:?}&asset={:?}&value=100",
            h.base_url,
            WAIT_ESTIMATE_PATH,
            Address::repeat_byte(1),
            Address::repeat_byte(2)
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
