//! # HTTP API
//!
//! The ledger node's JSON surface, built as an axum router. All handlers
//! share the [`LedgerNode`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                    | Description                            |
//! |--------|-------------------------|----------------------------------------|
//! | POST   | `/add-transaction`      | Admit a signed transaction             |
//! | POST   | `/receive-transaction`  | Gossip-inbound transaction             |
//! | POST   | `/mine`                 | Force a mining attempt                 |
//! | GET    | `/chain`                | Full chain plus validity               |
//! | GET    | `/mempool`              | Pending transactions                   |
//! | GET    | `/status`               | Node health and metrics summary        |
//! | GET    | `/nodes`                | Known peer URLs                        |
//! | POST   | `/register-node`        | Add a peer                             |
//! | POST   | `/receive-block`        | Gossip-inbound block                   |
//! | POST   | `/sync`                 | Force longest-chain resolution         |
//! | GET    | `/history/{batch_id}`   | Ordered events for a batch             |
//! | GET    | `/verify/{batch_id}`    | Provenance check for a batch           |
//! | GET    | `/health`               | Liveness probe                         |
//! | GET    | `/metrics`              | Prometheus text exposition             |
//!
//! Status mapping: admission failures are 4xx with a human-readable message
//! (`401` for signature and identity failures), a node refusing writes
//! answers `503`, persistence failures answer `500`, and a gossiped block
//! on a different head answers `409` while resolution runs in the
//! background.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use provchain_ledger::chain::Block;
use provchain_ledger::network::sync;
use provchain_ledger::node::BlockReceipt;
use provchain_ledger::transaction::Action;
use provchain_ledger::{LedgerError, LedgerNode, Transaction};

use crate::metrics::{metrics_handler, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all request handlers. Cheap to clone.
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<LedgerNode>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full router with CORS and request tracing.
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/add-transaction", post(add_transaction))
        .route("/receive-transaction", post(receive_transaction))
        .route("/mine", post(mine))
        .route("/chain", get(chain))
        .route("/mempool", get(mempool))
        .route("/status", get(status))
        .route("/nodes", get(nodes))
        .route("/register-node", post(register_node))
        .route("/receive-block", post(receive_block))
        .route("/sync", post(sync_now))
        .route("/history/{batch_id}", get(history))
        .route("/verify/{batch_id}", get(verify))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// One status code per error kind, stable across endpoints.
fn error_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::BadRequest(_)
        | LedgerError::InvalidOrder(_)
        | LedgerError::DuplicateTransaction(_) => StatusCode::BAD_REQUEST,
        LedgerError::InvalidSignature(_) | LedgerError::UnknownActor(_) => {
            StatusCode::UNAUTHORIZED
        }
        LedgerError::ChainInvalid(_) | LedgerError::NoHealthyPeers => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LedgerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LedgerError::MiningCancelled => StatusCode::CONFLICT,
        LedgerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn error_response(err: LedgerError) -> Response {
    let status = error_status(&err);
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// `POST /add-transaction` — full admission, then gossip to peers and
/// trigger auto-mining when the mempool crosses its threshold.
async fn add_transaction(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let tx: Transaction = match serde_json::from_value(body) {
        Ok(tx) => tx,
        Err(e) => return bad_request(format!("malformed transaction: {e}")),
    };

    match state.node.submit_transaction(tx.clone()) {
        Ok(()) => {
            state.metrics.transactions_admitted_total.inc();
            sync::spawn_transaction_broadcast(
                state.node.client().clone(),
                state.node.peers().clone(),
                tx,
            );
            maybe_auto_mine(&state);
            (StatusCode::OK, Json(json!({ "accepted": true }))).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /receive-transaction` — gossip inbound. Same admission pipeline,
/// but duplicates are a normal outcome here (the same transaction fans out
/// along many paths) and are answered 200 without re-gossip.
async fn receive_transaction(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let tx: Transaction = match serde_json::from_value(body) {
        Ok(tx) => tx,
        Err(e) => return bad_request(format!("malformed transaction: {e}")),
    };

    match state.node.submit_transaction(tx) {
        Ok(()) => {
            state.metrics.transactions_admitted_total.inc();
            maybe_auto_mine(&state);
            (StatusCode::OK, Json(json!({ "accepted": true }))).into_response()
        }
        Err(LedgerError::DuplicateTransaction(detail)) => (
            StatusCode::OK,
            Json(json!({ "accepted": false, "reason": detail })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Kicks off a background mining attempt when the mempool has crossed the
/// configured threshold.
fn maybe_auto_mine(state: &ApiState) {
    if !state.node.should_auto_mine() {
        return;
    }
    let node = Arc::clone(&state.node);
    let metrics = Arc::clone(&state.metrics);
    tokio::spawn(async move {
        match node.mine().await {
            Ok(Some(block)) => {
                metrics.blocks_mined_total.inc();
                info!(index = block.index, "auto-mining sealed a block");
            }
            Ok(None) => {}
            Err(LedgerError::MiningCancelled) => {}
            Err(e) => warn!(error = %e, "auto-mining failed"),
        }
    });
}

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// `POST /mine` — one synchronous mining attempt. 204 when the mempool is
/// empty, 409 when the attempt was cancelled by a peer block.
async fn mine(State(state): State<ApiState>) -> Response {
    match state.node.mine().await {
        Ok(Some(block)) => {
            state.metrics.blocks_mined_total.inc();
            (
                StatusCode::OK,
                Json(json!({
                    "mined": true,
                    "index": block.index,
                    "hash": block.hash,
                    "transactions": block.transactions.len(),
                })),
            )
                .into_response()
        }
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// Chain & Node State
// ---------------------------------------------------------------------------

/// `GET /chain` — the full chain plus current validity.
async fn chain(State(state): State<ApiState>) -> Response {
    let (valid, message) = state.node.validity();
    let blocks = state.node.chain_snapshot();
    Json(json!({
        "length": blocks.len(),
        "valid": valid,
        "message": message,
        "chain": blocks,
    }))
    .into_response()
}

/// `GET /mempool` — pending transactions in insertion order.
async fn mempool(State(state): State<ApiState>) -> Response {
    let pending = state.node.mempool().transactions();
    Json(json!({ "count": pending.len(), "mempool": pending })).into_response()
}

/// `GET /status` — health and metrics summary.
async fn status(State(state): State<ApiState>) -> Response {
    state.metrics.observe(&state.node);
    Json(state.node.status()).into_response()
}

/// `GET /health` — liveness only; subsystem state belongs in `/status`.
async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// `GET /nodes` — known peer URLs.
async fn nodes(State(state): State<ApiState>) -> Response {
    let urls = state.node.peers().urls();
    Json(json!({ "count": urls.len(), "nodes": urls })).into_response()
}

/// `POST /register-node` — add a peer URL to the registry (persisted).
async fn register_node(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let Some(url) = body.get("url").and_then(Value::as_str) else {
        return bad_request("missing 'url' field");
    };
    match state.node.add_peer(url) {
        Ok(_) => (StatusCode::OK, Json(json!({ "registered": true }))).into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// Sync & Gossip
// ---------------------------------------------------------------------------

/// `POST /receive-block` — gossip-inbound block. Appends on an exact head
/// extension; answers 409 and resolves in the background on a fork; 400 on
/// anything invalid.
async fn receive_block(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let block: Block = match serde_json::from_value(body) {
        Ok(block) => block,
        Err(e) => return bad_request(format!("malformed block: {e}")),
    };

    match state.node.receive_block(block) {
        Ok(BlockReceipt::Appended) => {
            state.metrics.blocks_received_total.inc();
            (StatusCode::OK, Json(json!({ "accepted": true }))).into_response()
        }
        Ok(BlockReceipt::Fork) => {
            let node = Arc::clone(&state.node);
            let metrics = Arc::clone(&state.metrics);
            tokio::spawn(async move {
                metrics.sync_rounds_total.inc();
                match sync::resolve_conflicts(&node).await {
                    Ok(outcome) if outcome.replaced => {
                        metrics.chain_replacements_total.inc();
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "fork resolution failed"),
                }
            });
            (
                StatusCode::CONFLICT,
                Json(json!({ "accepted": false, "message": "chain out of sync, resolving" })),
            )
                .into_response()
        }
        Err(err @ LedgerError::Persistence(_)) => error_response(err),
        // Invalid gossip is the sender's problem, not an auth failure.
        Err(err) => bad_request(err.to_string()),
    }
}

/// `POST /sync` — force one longest-chain resolution round.
async fn sync_now(State(state): State<ApiState>) -> Response {
    state.metrics.sync_rounds_total.inc();
    match sync::resolve_conflicts(&state.node).await {
        Ok(outcome) => {
            if outcome.replaced {
                state.metrics.chain_replacements_total.inc();
            }
            Json(json!({ "synced": outcome.replaced, "new_length": outcome.length }))
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// Batch Queries
// ---------------------------------------------------------------------------

/// One `/history` entry: the transaction plus its sealing block's context.
#[derive(Debug, Serialize)]
struct HistoryEntry {
    batch_id: String,
    action: Action,
    actor: String,
    timestamp: String,
    metadata: BTreeMap<String, Value>,
    block_index: u64,
    block_timestamp: String,
    has_signature: bool,
}

/// `GET /history/{batch_id}` — ordered sealed events for a batch. 404 when
/// the batch has no sealed events yet.
async fn history(State(state): State<ApiState>, Path(batch_id): Path<String>) -> Response {
    let events = state.node.history(&batch_id);
    if events.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "message": format!("No transactions found for batch {batch_id}"),
                "history": [],
            })),
        )
            .into_response();
    }

    let entries: Vec<HistoryEntry> = events
        .into_iter()
        .map(|event| HistoryEntry {
            batch_id: event.transaction.batch_id.clone(),
            action: event.transaction.action,
            actor: event.transaction.actor.clone(),
            timestamp: event.transaction.timestamp.clone(),
            metadata: event.transaction.metadata.clone(),
            block_index: event.block_index,
            block_timestamp: event.block_timestamp,
            has_signature: event.transaction.is_signed(),
        })
        .collect();

    Json(json!({
        "batch_id": batch_id,
        "transaction_count": entries.len(),
        "history": entries,
    }))
    .into_response()
}

/// `GET /verify/{batch_id}` — provenance check: chain validity plus a legal
/// action path for the batch.
async fn verify(State(state): State<ApiState>, Path(batch_id): Path<String>) -> Response {
    Json(state.node.verify_batch(&batch_id)).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
