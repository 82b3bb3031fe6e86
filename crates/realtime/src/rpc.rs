//! JSON-RPC 2.0 framing, and the HTTP client used for one-shot refreshes.

use crate::{ProtocolError, RefreshError, RefreshResult};
use alloy::primitives::{U64, U128};
use explorer_realtime_types::{GasPrice, MempoolStats, ScheduledTransaction, Update, UpdateKind};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::{debug, instrument};
use url::Url;

/// Params for methods that take none.
const NO_PARAMS: [(); 0] = [];

/// JSON-RPC request envelope.
#[derive(Debug, Serialize)]
pub(crate) struct Request<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

impl<'a, P: Serialize> Request<'a, P> {
    /// Create a new request.
    pub(crate) const fn new(id: u64, method: &'a str, params: P) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }

    /// Serialize the request to a text frame.
    pub(crate) fn to_frame(&self) -> String {
        // Only fails if the params' `Serialize` impl does.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ErrorObject {
    pub(crate) code: i64,
    pub(crate) message: String,
}

impl From<ErrorObject> for RefreshError {
    fn from(err: ErrorObject) -> Self {
        Self::Rpc { code: err.code, message: err.message }
    }
}

/// Loose shape covering responses and notifications.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<NotificationParams>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: Value,
    #[serde(default)]
    result: Value,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    /// Response to one of our requests.
    Response { id: u64, result: Result<Value, ErrorObject> },
    /// `eth_subscription` notification.
    Notification { subscription: String, result: Value },
}

impl Inbound {
    /// Classify a text frame.
    pub(crate) fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: RawFrame = serde_json::from_str(text)?;

        if frame.method.as_deref() == Some("eth_subscription") {
            let params = frame.params.ok_or(ProtocolError::UnexpectedShape)?;
            let subscription = subscription_id(params.subscription)?;
            return Ok(Self::Notification { subscription, result: params.result });
        }

        let id = frame.id.ok_or(ProtocolError::UnexpectedShape)?;
        let result = match frame.error {
            Some(err) => Err(err),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        Ok(Self::Response { id, result })
    }
}

/// Normalize a provider subscription id. Most nodes use hex strings, some
/// use plain integers.
pub(crate) fn subscription_id(value: Value) -> Result<String, ProtocolError> {
    match value {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(ProtocolError::SubscriptionId(other)),
    }
}

#[derive(Debug, Deserialize)]
struct HttpResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// HTTP JSON-RPC client for point queries.
#[derive(Debug, Clone)]
pub(crate) struct RpcClient {
    client: reqwest::Client,
    url: Url,
    scheduled_method: Arc<str>,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    /// Create a new client.
    pub(crate) fn new(client: reqwest::Client, url: Url, scheduled_method: &str) -> Self {
        Self { client, url, scheduled_method: scheduled_method.into(), next_id: Default::default() }
    }

    /// Call a method and decode its result.
    async fn call<P, R>(&self, method: &str, params: P) -> RefreshResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .client
            .post(self.url.clone())
            .json(&Request::new(id, method, params))
            .send()
            .await?
            .error_for_status()?;

        let body: HttpResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(err.into());
        }
        serde_json::from_value(body.result.unwrap_or(Value::Null)).map_err(Into::into)
    }

    /// Fetch the current value of a kind.
    #[instrument(skip(self), fields(url = %self.url))]
    pub(crate) async fn fetch(&self, kind: UpdateKind) -> RefreshResult {
        let updates = match kind {
            UpdateKind::NewBlock => {
                let block: Option<alloy::rpc::types::Block> =
                    self.call("eth_getBlockByNumber", ("latest", false)).await?;
                let block = block.ok_or(RefreshError::Empty(kind))?;
                vec![Update::from(block.header)]
            }
            UpdateKind::MempoolUpdate => {
                let stats: MempoolStats = self.call("txpool_status", NO_PARAMS).await?;
                vec![Update::from(stats)]
            }
            UpdateKind::ScheduledUpdate => {
                let txs: Option<Vec<ScheduledTransaction>> =
                    self.call(&self.scheduled_method, NO_PARAMS).await?;
                // Oldest first, so the newest record ends up at the cache head.
                txs.unwrap_or_default().into_iter().rev().map(Update::from).collect()
            }
            UpdateKind::GasPriceUpdate => {
                let gas_price: U128 = self.call("eth_gasPrice", NO_PARAMS).await?;
                let block_number: U64 = self.call("eth_blockNumber", NO_PARAMS).await?;
                vec![Update::from(GasPrice {
                    gas_price: gas_price.to(),
                    block_number: block_number.to(),
                })]
            }
            UpdateKind::NewPendingTransaction | UpdateKind::ConnectionStatus => {
                return Err(RefreshError::Unsupported(kind));
            }
        };
        debug!(count = updates.len(), "refresh fetched");
        Ok(updates)
    }
}
