// =============================================================================
// Transport seam
// =============================================================================
//
// The connection manager only ever sees text frames.  The production
// implementation is a tokio-tungstenite WebSocket; tests plug in an
// in-memory venue through the same traits.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// Outbound half of a connection.
#[async_trait]
pub trait TransportSink: Send {
    async fn send_text(&mut self, text: String) -> EngineResult<()>;
    async fn close(&mut self) -> EngineResult<()>;
}

/// Inbound half of a connection.
#[async_trait]
pub trait TransportStream: Send {
    /// Next text frame.  `Ok(None)` means the peer closed the connection.
    async fn next_text(&mut self) -> EngineResult<Option<String>>;
}

pub type TransportPair = (Box<dyn TransportSink>, Box<dyn TransportStream>);

/// Opens fresh connections; called once at startup and once per reconnect
/// attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> EngineResult<TransportPair>;
}

// =============================================================================
// WebSocket implementation
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> EngineResult<TransportPair> {
        info!(url = %self.url, "connecting to venue WebSocket");
        let (ws, _response) = connect_async(self.url.as_str()).await?;
        let (write, read) = ws.split();
        info!("venue WebSocket connected");
        let sink: Box<dyn TransportSink> = Box::new(WsSink { inner: write });
        let stream: Box<dyn TransportStream> = Box::new(WsReader { inner: read });
        Ok((sink, stream))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send_text(&mut self, text: String) -> EngineResult<()> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}

struct WsReader {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl TransportStream for WsReader {
    async fn next_text(&mut self) -> EngineResult<Option<String>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(frame))) => {
                    warn!(?frame, "venue closed the WebSocket");
                    return Ok(None);
                }
                // Control frames are answered by tungstenite itself.
                Some(Ok(other)) => {
                    debug!(len = other.len(), "ignoring non-text frame");
                }
                Some(Err(e)) => return Err(EngineError::from(e)),
                None => return Ok(None),
            }
        }
    }
}
