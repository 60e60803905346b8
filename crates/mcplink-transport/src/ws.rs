//! WebSocket connection to the remote endpoint.

use crate::error::{Result, TransportError};
use futures::StreamExt;
use futures::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::debug;

/// The underlying stream type produced by the client handshake.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a split connection.
pub type WsSink = SplitSink<WsStream, Message>;

/// Read half of a split connection.
pub type WsSource = SplitStream<WsStream>;

/// A live WebSocket connection to the remote endpoint.
///
/// Owned exclusively by the connection supervisor for the duration of one
/// cycle; dropped (closing the socket) when the cycle ends. The relay
/// consumes it via [`Connection::split`].
#[derive(Debug)]
pub struct Connection {
    stream: WsStream,
}

impl Connection {
    /// Establish a connection to `url` (`ws://` or `wss://`).
    ///
    /// Message and frame size limits are disabled: the protocol places no
    /// upper bound on frame size.
    pub async fn connect(url: &str) -> Result<Self> {
        let config = WebSocketConfig::default()
            .max_message_size(None)
            .max_frame_size(None);
        let (stream, response) = connect_async_with_config(url, Some(config), false)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Self { stream })
    }

    /// Split into independently owned write and read halves for the relay.
    pub fn split(self) -> (WsSink, WsSource) {
        self.stream.split()
    }
}
