use crate::{
    TransportResult,
    transport::{Connection, Connector, Message},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt, future::BoxFuture};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Error as WsError};
use tracing::debug;
use url::Url;

/// How long the writer waits for the close handshake once the connection is
/// dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects to a node over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// Create a connector for the given `ws://` or `wss://` endpoint.
    pub const fn new(url: Url) -> Self {
        Self { url }
    }

    /// The endpoint.
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, TransportResult<Connection>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (stream, _) = connect_async(url.as_str()).await?;
            debug!(target: "explorer::realtime::ws", %url, "websocket connected");

            let (sink, stream) = stream.split();
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();

            tokio::spawn(write_pump(sink, outbound_rx));
            tokio::spawn(read_pump(stream, inbound_tx));

            Ok(Connection::new(outbound, inbound))
        })
    }
}

/// Forward queued messages to the socket until the [`Connection`] is
/// dropped, then attempt a close handshake.
async fn write_pump<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        if let Err(err) = sink.send(msg).await {
            debug!(target: "explorer::realtime::ws", %err, "websocket write failed");
            break;
        }
    }
    // A silent peer never completes the handshake.
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        debug!(target: "explorer::realtime::ws", "websocket close timed out");
    }
}

/// Forward socket messages until the socket fails or the [`Connection`] is
/// dropped.
async fn read_pump<S>(mut stream: S, inbound: mpsc::UnboundedSender<TransportResult<Message>>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = inbound.closed() => break,
            msg = stream.next() => msg,
        };
        let Some(msg) = msg else { break };
        let failed = msg.is_err();
        if inbound.send(msg.map_err(Into::into)).is_err() || failed {
            break;
        }
    }
    debug!(target: "explorer::realtime::ws", "websocket reader stopped");
}
