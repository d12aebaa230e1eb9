//! HTTP-level integration tests: a real node served by axum on an
//! ephemeral port, driven through reqwest exactly the way the role façades
//! drive production nodes.
//!
//! Difficulty is kept at 2 so proof-of-work stays fast, and the RSA
//! keystore is generated once per test binary.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use provchain_ledger::config::{now_timestamp, NodeConfig};
use provchain_ledger::crypto::{sign_transaction, Keystore};
use provchain_ledger::{Action, LedgerNode, Transaction};
use provchain_node::api::{create_router, ApiState};
use provchain_node::metrics::NodeMetrics;

const DIFFICULTY: usize = 2;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct SharedKeys {
    _dir: TempDir,
    keystore: Keystore,
}

fn keys() -> &'static SharedKeys {
    static KEYS: OnceLock<SharedKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let dir = tempfile::tempdir().expect("tempdir");
        let keystore = Keystore::open(dir.path()).expect("keystore");
        for actor in ["Supplier_A", "Distributor_B", "Retailer_C"] {
            keystore.register_actor(actor).expect("keygen");
        }
        SharedKeys {
            _dir: dir,
            keystore,
        }
    })
}

struct TestServer {
    base: String,
    node: Arc<LedgerNode>,
    _dir: TempDir,
}

/// Binds an ephemeral port, opens a fresh node advertising that port, and
/// serves the full router on it.
async fn spawn_server() -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let dir = tempfile::tempdir().expect("tempdir");
    let config = NodeConfig {
        port,
        host: "127.0.0.1".to_string(),
        difficulty: DIFFICULTY,
        db_path: dir.path().join("db"),
        keys_dir: keys().keystore.dir().to_path_buf(),
        mine_threshold: 10,
        peer_timeout: Duration::from_secs(5),
        ..NodeConfig::default()
    };
    let node = LedgerNode::open(config).expect("node");

    let state = ApiState {
        node: Arc::clone(&node),
        metrics: Arc::new(NodeMetrics::new()),
    };
    let router = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        node,
        _dir: dir,
    }
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("client")
}

fn signed(batch: &str, action: Action, actor: &str, meta: &[(&str, &str)]) -> Transaction {
    let metadata: BTreeMap<String, Value> = meta
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect();
    let mut tx = Transaction::new(batch, action, actor, now_timestamp(), metadata);
    sign_transaction(&keys().keystore, &mut tx).expect("sign");
    tx
}

fn full_trace(batch: &str) -> Vec<Transaction> {
    vec![
        signed(batch, Action::Registered, "Supplier_A", &[("product", "Coffee")]),
        signed(batch, Action::QualityChecked, "Supplier_A", &[("result", "passed")]),
        signed(batch, Action::Shipped, "Supplier_A", &[("to", "Distributor_B")]),
        signed(batch, Action::Received, "Distributor_B", &[("from", "Supplier_A")]),
        signed(batch, Action::Stored, "Distributor_B", &[("location", "W3")]),
        signed(batch, Action::Delivered, "Distributor_B", &[("to", "Retailer_C")]),
        signed(batch, Action::ReceivedRetail, "Retailer_C", &[("from", "Distributor_B")]),
        signed(batch, Action::Sold, "Retailer_C", &[]),
    ]
}

// ---------------------------------------------------------------------------
// Liveness and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_and_status_answer() {
    let server = spawn_server().await;
    let client = http();

    let health: Value = client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: Value = client
        .get(format!("{}/status", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["chain_length"], 1);
    assert_eq!(status["chain_valid"], true);
    assert_eq!(status["difficulty"], 2);
    assert_eq!(status["mempool_size"], 0);
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_trace_over_http() {
    let server = spawn_server().await;
    let client = http();

    for pair in full_trace("COMPLETE_1").chunks(2) {
        for tx in pair {
            let resp = client
                .post(format!("{}/add-transaction", server.base))
                .json(tx)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200, "admission failed: {:?}", resp.text().await);
        }
        let resp = client
            .post(format!("{}/mine", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["mined"], true);
    }

    let history: Value = client
        .get(format!("{}/history/COMPLETE_1", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["transaction_count"], 8);
    let actions: Vec<String> = history["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(actions[0], "registered");
    assert_eq!(actions[7], "sold");

    let verify: Value = client
        .get(format!("{}/verify/COMPLETE_1", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(verify["verified"], true, "message: {}", verify["message"]);
}

// ---------------------------------------------------------------------------
// Admission failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn order_violation_is_400_with_cannot_message() {
    let server = spawn_server().await;
    let client = http();

    let resp = client
        .post(format!("{}/add-transaction", server.base))
        .json(&signed("VAL_1", Action::Shipped, "Supplier_A", &[("to", "Distributor_B")]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Cannot"));

    assert_eq!(server.node.chain_len(), 1);
}

#[tokio::test]
async fn tampered_transaction_is_401() {
    let server = spawn_server().await;
    let client = http();

    let mut tx = signed("TAMPER_1", Action::Registered, "Supplier_A", &[("product", "Milk")]);
    tx.metadata.insert("product".to_string(), serde_json::json!("Milj"));

    let resp = client
        .post(format!("{}/add-transaction", server.base))
        .json(&tx)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn malformed_payloads_are_400() {
    let server = spawn_server().await;
    let client = http();

    // Action outside the vocabulary.
    let resp = client
        .post(format!("{}/add-transaction", server.base))
        .json(&json!({
            "batch_id": "X",
            "action": "teleported",
            "actor": "Supplier_A",
            "timestamp": now_timestamp(),
            "metadata": {},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Missing required fields.
    let resp = client
        .post(format!("{}/add-transaction", server.base))
        .json(&json!({ "batch_id": "X" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn unknown_batch_history_is_404() {
    let server = spawn_server().await;
    let resp = http()
        .get(format!("{}/history/NOPE", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("No transactions"));
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mempool_shows_pending_then_drains() {
    let server = spawn_server().await;
    let client = http();

    client
        .post(format!("{}/add-transaction", server.base))
        .json(&signed("POOL_1", Action::Registered, "Supplier_A", &[]))
        .send()
        .await
        .unwrap();

    let pool: Value = client
        .get(format!("{}/mempool", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pool["count"], 1);
    assert_eq!(pool["mempool"][0]["batch_id"], "POOL_1");

    client
        .post(format!("{}/mine", server.base))
        .send()
        .await
        .unwrap();

    let pool: Value = client
        .get(format!("{}/mempool", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pool["count"], 0);
}

#[tokio::test]
async fn empty_mempool_mine_is_204() {
    let server = spawn_server().await;
    let resp = http()
        .post(format!("{}/mine", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn threshold_triggers_auto_mining() {
    let server = spawn_server().await;
    let client = http();

    // Threshold is 10; submit 12 independent registrations and never call
    // /mine ourselves.
    for i in 0..12 {
        let resp = client
            .post(format!("{}/add-transaction", server.base))
            .json(&signed(&format!("AUTO_{i}"), Action::Registered, "Supplier_A", &[]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    // Auto-mining runs in the background; give it a bounded window.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status: Value = client
            .get(format!("{}/status", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let mempool = status["mempool_size"].as_u64().unwrap();
        let length = status["chain_length"].as_u64().unwrap();
        if mempool < 12 && length >= 2 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "auto-mining did not trigger: {status}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ---------------------------------------------------------------------------
// Peers & sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_node_appears_in_nodes_list() {
    let server = spawn_server().await;
    let client = http();

    let resp = client
        .post(format!("{}/register-node", server.base))
        .json(&json!({ "url": "http://node-2:5000/" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["registered"], true);

    let nodes: Value = client
        .get(format!("{}/nodes", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nodes["count"], 1);
    assert_eq!(nodes["nodes"][0], "http://node-2:5000");

    let resp = client
        .post(format!("{}/register-node", server.base))
        .json(&json!({ "name": "missing url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn lagging_node_catches_up_via_sync() {
    let a = spawn_server().await;
    let b = spawn_server().await;
    let client = http();

    // Grow A one block past B.
    client
        .post(format!("{}/add-transaction", a.base))
        .json(&signed("SYNC_1", Action::Registered, "Supplier_A", &[]))
        .send()
        .await
        .unwrap();
    client.post(format!("{}/mine", a.base)).send().await.unwrap();

    // B learns about A, then forces a resolution round.
    client
        .post(format!("{}/register-node", b.base))
        .json(&json!({ "url": a.base }))
        .send()
        .await
        .unwrap();
    let sync: Value = client
        .post(format!("{}/sync", b.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sync["synced"], true);
    assert_eq!(sync["new_length"], 2);

    // Identical chains, hash for hash.
    let chain_a: Value = client
        .get(format!("{}/chain", a.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let chain_b: Value = client
        .get(format!("{}/chain", b.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chain_a["length"], chain_b["length"]);
    assert_eq!(
        chain_a["chain"][1]["hash"],
        chain_b["chain"][1]["hash"]
    );
    assert_eq!(chain_b["valid"], true);
}

#[tokio::test]
async fn gossiped_block_appends_or_conflicts() {
    let a = spawn_server().await;
    let b = spawn_server().await;
    let client = http();

    // Mine two blocks on A.
    for batch in ["GOSSIP_1", "GOSSIP_2"] {
        client
            .post(format!("{}/add-transaction", a.base))
            .json(&signed(batch, Action::Registered, "Supplier_A", &[]))
            .send()
            .await
            .unwrap();
        client.post(format!("{}/mine", a.base)).send().await.unwrap();
    }
    let chain_a: Value = client
        .get(format!("{}/chain", a.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // The first block extends B's genesis head exactly.
    let resp = client
        .post(format!("{}/receive-block", b.base))
        .json(&chain_a["chain"][1])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Replaying it is no longer an extension — fork, 409.
    let resp = client
        .post(format!("{}/receive-block", b.base))
        .json(&chain_a["chain"][1])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // A tampered block is plain invalid — 400.
    let mut forged = chain_a["chain"][2].clone();
    forged["transactions"][0]["metadata"]["product"] = json!("Forged");
    let resp = client
        .post(format!("{}/receive-block", b.base))
        .json(&forged)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_expose_chain_gauges() {
    let server = spawn_server().await;
    let body = http()
        .get(format!("{}/metrics", server.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("provchain_chain_length"));
    assert!(body.contains("provchain_mempool_size"));
}
