#![doc = include_str!("../README.md")]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use explorer_realtime_types::UpdateKind;
use init4_bin_base::utils::from_env::FromEnv;
use std::{borrow::Cow, time::Duration};
use url::Url;

/// Default number of recent blocks kept in the cache.
pub const DEFAULT_BLOCK_CACHE_SIZE: usize = 50;
/// Default number of scheduled transactions kept in the cache.
pub const DEFAULT_SCHEDULED_CACHE_SIZE: usize = 100;
/// Default number of pending transaction hashes kept in the cache.
pub const DEFAULT_PENDING_CACHE_SIZE: usize = 200;
/// Default RPC method used to fetch the scheduled-transaction pool.
pub const DEFAULT_SCHEDULED_METHOD: &str = "eth_getScheduledTransactions";

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Configuration for the realtime manager.
///
/// # Environment Variables
///
/// - `REALTIME_WS_URL` – WebSocket endpoint. When unset, the manager falls
///   back to polling `REALTIME_HTTP_URL`.
/// - `REALTIME_HTTP_URL` – HTTP JSON-RPC endpoint, used for refreshes.
/// - `REALTIME_*_CACHE_SIZE` – cache capacities.
/// - `REALTIME_BACKOFF_*_MS`, `REALTIME_MAX_RECONNECTS` – reconnect policy.
/// - `REALTIME_HEARTBEAT_*_MS`, `REALTIME_CONNECT_TIMEOUT_MS` – liveness.
/// - `REALTIME_*_THROTTLE_MS` – default per-kind throttle windows.
///
/// # Example
///
/// ```
/// use explorer_realtime_config::RealtimeConfig;
/// use std::time::Duration;
///
/// let config = RealtimeConfig::new("http://localhost:8545".into())
///     .with_ws_url("ws://localhost:8546".into())
///     .with_block_cache_size(10);
///
/// assert_eq!(config.block_cache_size(), 10);
/// assert_eq!(config.backoff_cap(), Duration::from_secs(30));
/// assert!(!config.is_polling());
/// ```
#[derive(Debug, Clone, serde::Deserialize, FromEnv)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the upstream node.
    #[from_env(var = "REALTIME_WS_URL", desc = "WebSocket JSON-RPC endpoint", infallible, optional)]
    ws_url: Option<Cow<'static, str>>,

    /// HTTP endpoint of the upstream node.
    #[from_env(var = "REALTIME_HTTP_URL", desc = "HTTP JSON-RPC endpoint", infallible)]
    http_url: Cow<'static, str>,

    /// Recent block capacity.
    #[from_env(var = "REALTIME_BLOCK_CACHE_SIZE", desc = "Recent block cache capacity", optional)]
    block_cache_size: Option<usize>,

    /// Scheduled transaction capacity.
    #[from_env(
        var = "REALTIME_SCHEDULED_CACHE_SIZE",
        desc = "Scheduled transaction cache capacity",
        optional
    )]
    scheduled_cache_size: Option<usize>,

    /// Pending transaction capacity.
    #[from_env(
        var = "REALTIME_PENDING_CACHE_SIZE",
        desc = "Pending transaction cache capacity",
        optional
    )]
    pending_cache_size: Option<usize>,

    /// Reconnect backoff base, in milliseconds.
    #[from_env(var = "REALTIME_BACKOFF_BASE_MS", desc = "Reconnect backoff base (ms)", optional)]
    backoff_base_ms: Option<u64>,

    /// Reconnect backoff cap, in milliseconds.
    #[from_env(var = "REALTIME_BACKOFF_CAP_MS", desc = "Reconnect backoff cap (ms)", optional)]
    backoff_cap_ms: Option<u64>,

    /// Reconnect attempts before giving up. Unbounded if unset.
    #[from_env(
        var = "REALTIME_MAX_RECONNECTS",
        desc = "Reconnect attempts before the transport fails",
        optional
    )]
    max_reconnects: Option<u32>,

    /// Idle time before a ping is sent, in milliseconds.
    #[from_env(
        var = "REALTIME_HEARTBEAT_INTERVAL_MS",
        desc = "Idle time before a ping is sent (ms)",
        optional
    )]
    heartbeat_interval_ms: Option<u64>,

    /// Time to wait for traffic after a ping, in milliseconds.
    #[from_env(
        var = "REALTIME_HEARTBEAT_TIMEOUT_MS",
        desc = "Time to wait for a pong before reconnecting (ms)",
        optional
    )]
    heartbeat_timeout_ms: Option<u64>,

    /// Connect timeout, in milliseconds.
    #[from_env(var = "REALTIME_CONNECT_TIMEOUT_MS", desc = "Connect timeout (ms)", optional)]
    connect_timeout_ms: Option<u64>,

    /// Poll period when running without a WebSocket, in milliseconds.
    #[from_env(var = "REALTIME_POLL_INTERVAL_MS", desc = "HTTP polling period (ms)", optional)]
    poll_interval_ms: Option<u64>,

    /// RPC method returning the scheduled-transaction pool.
    #[from_env(
        var = "REALTIME_SCHEDULED_METHOD",
        desc = "RPC method returning the scheduled transaction pool",
        infallible,
        optional
    )]
    scheduled_method: Option<Cow<'static, str>>,

    /// Default throttle for pending transaction updates, in milliseconds.
    #[from_env(
        var = "REALTIME_PENDING_THROTTLE_MS",
        desc = "Default pending transaction throttle (ms)",
        optional
    )]
    pending_throttle_ms: Option<u64>,

    /// Default throttle for mempool updates, in milliseconds.
    #[from_env(var = "REALTIME_MEMPOOL_THROTTLE_MS", desc = "Default mempool throttle (ms)", optional)]
    mempool_throttle_ms: Option<u64>,

    /// Default throttle for scheduled transaction updates, in milliseconds.
    #[from_env(
        var = "REALTIME_SCHEDULED_THROTTLE_MS",
        desc = "Default scheduled transaction throttle (ms)",
        optional
    )]
    scheduled_throttle_ms: Option<u64>,

    /// Default throttle for gas price updates, in milliseconds.
    #[from_env(
        var = "REALTIME_GAS_PRICE_THROTTLE_MS",
        desc = "Default gas price throttle (ms)",
        optional
    )]
    gas_price_throttle_ms: Option<u64>,
}

impl RealtimeConfig {
    /// Create a new config with the given HTTP endpoint and default values
    /// for everything else. Without a WebSocket URL the manager polls.
    pub const fn new(http_url: Cow<'static, str>) -> Self {
        Self {
            ws_url: None,
            http_url,
            block_cache_size: None,
            scheduled_cache_size: None,
            pending_cache_size: None,
            backoff_base_ms: None,
            backoff_cap_ms: None,
            max_reconnects: None,
            heartbeat_interval_ms: None,
            heartbeat_timeout_ms: None,
            connect_timeout_ms: None,
            poll_interval_ms: None,
            scheduled_method: None,
            pending_throttle_ms: None,
            mempool_throttle_ms: None,
            scheduled_throttle_ms: None,
            gas_price_throttle_ms: None,
        }
    }

    /// Set the WebSocket endpoint.
    pub fn with_ws_url(mut self, ws_url: Cow<'static, str>) -> Self {
        self.ws_url = Some(ws_url);
        self
    }

    /// Set the recent block capacity.
    pub const fn with_block_cache_size(mut self, size: usize) -> Self {
        self.block_cache_size = Some(size);
        self
    }

    /// Set the scheduled transaction capacity.
    pub const fn with_scheduled_cache_size(mut self, size: usize) -> Self {
        self.scheduled_cache_size = Some(size);
        self
    }

    /// Set the pending transaction capacity.
    pub const fn with_pending_cache_size(mut self, size: usize) -> Self {
        self.pending_cache_size = Some(size);
        self
    }

    /// Set the reconnect backoff base and cap.
    pub const fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base_ms = Some(base.as_millis() as u64);
        self.backoff_cap_ms = Some(cap.as_millis() as u64);
        self
    }

    /// Set the number of reconnect attempts before the transport fails.
    pub const fn with_max_reconnects(mut self, attempts: u32) -> Self {
        self.max_reconnects = Some(attempts);
        self
    }

    /// Set the heartbeat interval and timeout.
    pub const fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval_ms = Some(interval.as_millis() as u64);
        self.heartbeat_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the connect timeout.
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the polling period used without a WebSocket.
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Set the RPC method returning the scheduled-transaction pool.
    pub fn with_scheduled_method(mut self, method: Cow<'static, str>) -> Self {
        self.scheduled_method = Some(method);
        self
    }

    /// Set the default throttle window for a kind. Blocks and status
    /// updates are never throttled by default, so setting them is a no-op.
    pub const fn with_default_throttle(mut self, kind: UpdateKind, window: Duration) -> Self {
        let ms = Some(window.as_millis() as u64);
        match kind {
            UpdateKind::NewPendingTransaction => self.pending_throttle_ms = ms,
            UpdateKind::MempoolUpdate => self.mempool_throttle_ms = ms,
            UpdateKind::ScheduledUpdate => self.scheduled_throttle_ms = ms,
            UpdateKind::GasPriceUpdate => self.gas_price_throttle_ms = ms,
            UpdateKind::NewBlock | UpdateKind::ConnectionStatus => {}
        }
        self
    }

    /// Get the WebSocket URL, if configured.
    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    /// Parse the WebSocket URL, if configured.
    pub fn parsed_ws_url(&self) -> Result<Option<Url>, url::ParseError> {
        self.ws_url().map(Url::parse).transpose()
    }

    /// Get the HTTP URL.
    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    /// Parse the HTTP URL.
    pub fn parsed_http_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.http_url())
    }

    /// True if no WebSocket is configured and the manager must poll.
    pub const fn is_polling(&self) -> bool {
        self.ws_url.is_none()
    }

    /// Recent block capacity.
    pub fn block_cache_size(&self) -> usize {
        self.block_cache_size.unwrap_or(DEFAULT_BLOCK_CACHE_SIZE)
    }

    /// Scheduled transaction capacity.
    pub fn scheduled_cache_size(&self) -> usize {
        self.scheduled_cache_size.unwrap_or(DEFAULT_SCHEDULED_CACHE_SIZE)
    }

    /// Pending transaction capacity.
    pub fn pending_cache_size(&self) -> usize {
        self.pending_cache_size.unwrap_or(DEFAULT_PENDING_CACHE_SIZE)
    }

    /// Reconnect backoff base.
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base_ms.map(Duration::from_millis).unwrap_or(DEFAULT_BACKOFF_BASE)
    }

    /// Reconnect backoff cap.
    pub fn backoff_cap(&self) -> Duration {
        self.backoff_cap_ms.map(Duration::from_millis).unwrap_or(DEFAULT_BACKOFF_CAP)
    }

    /// Reconnect attempts before the transport fails. `None` is unbounded.
    pub const fn max_reconnects(&self) -> Option<u32> {
        self.max_reconnects
    }

    /// Idle time before a ping is sent.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_HEARTBEAT_INTERVAL)
    }

    /// Time to wait for traffic after a ping.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT)
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Polling period.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// RPC method returning the scheduled-transaction pool.
    pub fn scheduled_method(&self) -> &str {
        self.scheduled_method.as_deref().unwrap_or(DEFAULT_SCHEDULED_METHOD)
    }

    /// Default throttle window for a kind, if any.
    pub fn default_throttle(&self, kind: UpdateKind) -> Option<Duration> {
        let ms = match kind {
            UpdateKind::NewPendingTransaction => self.pending_throttle_ms,
            UpdateKind::MempoolUpdate => self.mempool_throttle_ms,
            UpdateKind::ScheduledUpdate => self.scheduled_throttle_ms,
            UpdateKind::GasPriceUpdate => self.gas_price_throttle_ms,
            UpdateKind::NewBlock | UpdateKind::ConnectionStatus => None,
        };
        ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}
