use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, error::ProtocolError};
use tracing::{debug, trace, warn};
use url::Url;

use super::{RelayConnector, RelayLink, SignalingError};

/// Relay links over a WebSocket carrying one JSON document per frame.
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn open(&self) -> Result<RelayLink, SignalingError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| {
                SignalingError::Connect(format!("websocket connect to {} failed: {err}", self.url()))
            })?;
        debug!(
            target = "huddle::signaling",
            url = %self.url,
            "signaling websocket connected"
        );
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|err| SignalingError::Transport(err.to_string()))
            .with(|text: String| future::ready(Ok::<_, SignalingError>(Message::Text(text))));

        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => {
                    trace!(target = "huddle::signaling", kind = "text", len = text.len(), "ws_in");
                    Some(Ok(text))
                }
                Ok(Message::Binary(data)) => {
                    trace!(target = "huddle::signaling", kind = "binary", len = data.len(), "ws_in");
                    match String::from_utf8(data) {
                        Ok(text) => Some(Ok(text)),
                        Err(_) => {
                            warn!(target = "huddle::signaling", "dropping non utf-8 binary frame");
                            None
                        }
                    }
                }
                Ok(Message::Close(_)) => Some(Err(SignalingError::Closed)),
                Ok(_) => None,
                Err(err) => {
                    match &err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                            debug!(target = "huddle::signaling", "signaling websocket closed: {err}");
                        }
                        _ => {
                            warn!(target = "huddle::signaling", "signaling websocket error: {err}");
                        }
                    }
                    Some(Err(SignalingError::Transport(err.to_string())))
                }
            })
        });

        Ok(RelayLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
