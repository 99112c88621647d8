//! The four transport primitives a worker needs: connect, send, receive,
//! close. Everything above this module treats messages as opaque text.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::trace;
use url::Url;

use crate::error::TransportError;

/// How long a close handshake may take before the socket is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Message(String),
    Closed,
}

pub struct Connection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connection {
    pub async fn connect(url: &Url) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(TransportError::Connect)?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(TransportError::Send)
    }

    /// Waits for the next data message. Control frames are answered by the
    /// websocket layer and skipped here.
    pub async fn receive(&mut self) -> Result<Inbound, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Inbound::Message(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Inbound::Message(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    trace!(?frame, "close frame received");
                    return Ok(Inbound::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed))
                | None => return Ok(Inbound::Closed),
                Some(Err(e)) => return Err(TransportError::Receive(e)),
            }
        }
    }

    /// Best-effort close frame; errors are irrelevant once we are leaving.
    pub async fn close(mut self) {
        match timeout(CLOSE_TIMEOUT, self.stream.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(error = %e, "close handshake failed"),
            Err(_) => trace!("close handshake timed out"),
        }
    }
}
