//! In-memory relay links for exercising the channel without a server.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{FutureExt, Sink, SinkExt, StreamExt, stream};
use parking_lot::Mutex;
use serde_json::Value;

use super::{RelayConnector, RelayLink, SignalingError};

/// Hands out prepared links in the order they were prepared.
#[derive(Default)]
pub struct MockConnector {
    links: Mutex<VecDeque<Option<RelayLink>>>,
    opened: AtomicUsize,
}

/// The relay's side of one mock link.
pub struct RelayEnd {
    sent: mpsc::UnboundedReceiver<String>,
    deliver: mpsc::UnboundedSender<Result<String, SignalingError>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Prepares the link returned by the next `open`.
    pub fn expect_link(&self) -> RelayEnd {
        let (sent_tx, sent_rx) = mpsc::unbounded::<String>();
        let (deliver_tx, deliver_rx) = mpsc::unbounded();
        let link = RelayLink {
            sink: Box::pin(sent_tx.sink_map_err(|_| SignalingError::Closed)),
            stream: Box::pin(deliver_rx),
        };
        self.links.lock().push_back(Some(link));
        RelayEnd {
            sent: sent_rx,
            deliver: deliver_tx,
        }
    }

    /// Prepares a link whose writes never complete and which never delivers
    /// anything, like a relay connection that has silently stalled.
    pub fn expect_stalled_link(&self) {
        let link = RelayLink {
            sink: Box::pin(StalledSink),
            stream: Box::pin(stream::pending::<Result<String, SignalingError>>()),
        };
        self.links.lock().push_back(Some(link));
    }

    /// Makes the next `open` fail.
    pub fn refuse_next(&self) {
        self.links.lock().push_back(None);
    }

    /// Number of links successfully opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayConnector for MockConnector {
    async fn open(&self) -> Result<RelayLink, SignalingError> {
        match self.links.lock().pop_front() {
            Some(Some(link)) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(link)
            }
            Some(None) => Err(SignalingError::Connect("connection refused".into())),
            None => Err(SignalingError::Connect("no relay link prepared".into())),
        }
    }
}

impl RelayEnd {
    /// Next message the client transmitted, decoded as JSON.
    pub async fn next_sent(&mut self) -> Option<Value> {
        let text = self.sent.next().await?;
        serde_json::from_str(&text).ok()
    }

    /// A transmitted message if one is already waiting.
    pub fn try_next_sent(&mut self) -> Option<Value> {
        let text = self.sent.next().now_or_never()??;
        serde_json::from_str(&text).ok()
    }

    /// Delivers a frame to the client.
    pub fn push(&self, value: Value) {
        self.push_text(value.to_string());
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.deliver.unbounded_send(Ok(text.into()));
    }

    /// Fails the link from the relay side.
    pub fn fail(&self) {
        let _ = self
            .deliver
            .unbounded_send(Err(SignalingError::Transport("connection reset".into())));
    }

    /// Stops accepting client frames; the client's next send fails.
    pub fn sever_outbound(&mut self) {
        self.sent.close();
    }
}

struct StalledSink;

impl Sink<String> for StalledSink {
    type Error = SignalingError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: String) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
