#![allow(dead_code)]

use alloy::{
    primitives::B256,
    rpc::types::{Block, BlockTransactions},
};
use axum::{Json, Router, extract::State, routing::post};
use explorer_realtime::{
    ConnectionStatus, Header, RealtimeManager, Update, UpdateKind,
    transport::{MemConnector, MemNode, MemSession},
};
use explorer_realtime_config::RealtimeConfig;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::{Instant, sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Config with fast reconnects, and heartbeats out of the way.
pub fn config() -> RealtimeConfig {
    RealtimeConfig::new("http://127.0.0.1:9".into())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_heartbeat(Duration::from_secs(60), Duration::from_secs(10))
}

/// A manager wired to an in-memory node.
pub fn mem_manager(config: RealtimeConfig) -> (RealtimeManager, MemNode) {
    init_tracing();
    let (connector, node) = MemConnector::new();
    let manager =
        RealtimeManager::builder().with_config(config).with_connector(connector).build().unwrap();
    (manager, node)
}

pub async fn accept(node: &mut MemNode) -> MemSession {
    timeout(WAIT, node.accept()).await.expect("no connection").expect("connector dropped")
}

/// Answer `n` subscribe requests. Returns the subscription id given to each
/// topic; ids embed `epoch` so they differ across connections.
pub async fn answer_subscriptions(
    session: &mut MemSession,
    n: usize,
    epoch: u32,
) -> HashMap<String, String> {
    let mut ids = HashMap::new();
    for _ in 0..n {
        let request = timeout(WAIT, session.recv_request()).await.unwrap().unwrap();
        assert_eq!(request["method"], "eth_subscribe");
        let topic = request["params"][0].as_str().unwrap().to_string();
        let id = format!("{topic}-{epoch}");
        session.respond(&request["id"], &id);
        ids.insert(topic, id);
    }
    ids
}

/// Wait until `f` holds.
pub async fn eventually(what: &str, mut f: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !f() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

pub fn header(number: u64) -> Header {
    Header {
        hash: B256::with_last_byte(number as u8),
        inner: alloy::consensus::Header { number, ..Default::default() },
        total_difficulty: None,
        size: None,
    }
}

pub fn header_json(number: u64) -> Value {
    serde_json::to_value(header(number)).unwrap()
}

pub fn block_json(number: u64) -> Value {
    let block: Block = Block {
        header: header(number),
        uncles: vec![],
        transactions: BlockTransactions::Hashes(vec![]),
        withdrawals: None,
    };
    serde_json::to_value(block).unwrap()
}

pub fn numbers(headers: &[Arc<Header>]) -> Vec<u64> {
    headers.iter().map(|h| h.inner.number).collect()
}

/// Records every update a subscriber receives.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Update>>>);

impl Recorder {
    pub fn handler(&self) -> impl FnMut(&Update) -> eyre::Result<()> + Send + 'static {
        let seen = self.0.clone();
        move |update: &Update| {
            seen.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    pub fn updates(&self) -> Vec<Update> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, kind: UpdateKind) -> usize {
        self.0.lock().unwrap().iter().filter(|u| u.kind() == kind).count()
    }

    pub fn block_numbers(&self) -> Vec<u64> {
        self.0.lock().unwrap().iter().filter_map(Update::block_number).collect()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.0.lock().unwrap().iter().filter_map(|u| u.as_status().cloned()).collect()
    }
}

/// A JSON-RPC node over HTTP that counts calls per method.
#[derive(Debug, Clone, Default)]
pub struct StubNode {
    calls: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
    delay: Duration,
}

impl StubNode {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Default::default() }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Serve on an ephemeral port. Returns the endpoint URL.
    pub async fn serve(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(handle)).with_state(self.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }
}

pub const SCHEDULED: [u8; 2] = [0xb2, 0xb1];

async fn handle(State(stub): State<StubNode>, Json(req): Json<Value>) -> Json<Value> {
    let method = req["method"].as_str().unwrap_or_default().to_string();
    *stub.calls.lock().unwrap().entry(method.clone()).or_default() += 1;
    stub.total.fetch_add(1, Ordering::SeqCst);
    sleep(stub.delay).await;

    let result = match method.as_str() {
        "eth_getBlockByNumber" => block_json(42),
        "txpool_status" => json!({ "pending": "0x3", "queued": "0x1" }),
        "eth_gasPrice" => json!("0x3b9aca00"),
        "eth_blockNumber" => json!("0x10"),
        "eth_getScheduledTransactions" => json!(
            SCHEDULED
                .iter()
                .map(|b| json!({ "hash": B256::repeat_byte(*b), "status": "scheduled" }))
                .collect::<Vec<_>>()
        ),
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32601, "message": "method not found" },
            }));
        }
    };
    Json(json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }))
}
