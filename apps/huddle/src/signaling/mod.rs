//! Ordered duplex channel to the signaling relay.
//!
//! Outbound messages always pass through one FIFO queue. While the channel is
//! `Ready` the link task drains the queue onto the wire; otherwise messages
//! wait there until the next successful [`SignalingChannel::connect`]. The
//! message currently being written sits in an in-flight slot; if the write
//! fails or the link is closed underneath it, it goes back to the front of the
//! queue, so nothing is lost or reordered across a reconnect.

pub mod mock;
pub mod websocket;

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use huddle_proto::{InboundMessage, Signal};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::telemetry;

pub use websocket::WebSocketConnector;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("relay connect failed: {0}")]
    Connect(String),
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("relay link closed")]
    Closed,
    #[error("connect already in progress")]
    AlreadyConnecting,
    #[error("failed to encode signaling message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Ready,
    Closed,
}

pub type LinkSink = Pin<Box<dyn Sink<String, Error = SignalingError> + Send>>;
pub type LinkStream = Pin<Box<dyn Stream<Item = Result<String, SignalingError>> + Send>>;

/// One open connection to the relay, split into its two directions.
pub struct RelayLink {
    pub sink: LinkSink,
    pub stream: LinkStream,
}

/// Opens links to the relay. Called once per [`SignalingChannel::connect`].
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self) -> Result<RelayLink, SignalingError>;
}

/// Outbound half as seen by the negotiation layer.
pub trait SignalSink: Send + Sync {
    fn send_signal(&self, signal: Signal);
}

type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// How long `connect` waits for a superseded link task to hand back its
/// in-flight message before aborting it.
const LINK_RETIRE_GRACE: Duration = Duration::from_secs(2);

struct Outbound {
    state: ChannelState,
    queue: VecDeque<String>,
    /// Popped from the queue and handed to the sink, not yet confirmed.
    in_flight: Option<String>,
    epoch: u64,
    wake: Option<Arc<Notify>>,
}

pub struct SignalingChannel {
    connector: Arc<dyn RelayConnector>,
    outbound: Mutex<Outbound>,
    handlers: RwLock<HashMap<String, Handler>>,
    state_tx: watch::Sender<ChannelState>,
    link_task: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    pub fn new(connector: Arc<dyn RelayConnector>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ChannelState::Closed);
        Arc::new(Self {
            connector,
            outbound: Mutex::new(Outbound {
                state: ChannelState::Closed,
                queue: VecDeque::new(),
                in_flight: None,
                epoch: 0,
                wake: None,
            }),
            handlers: RwLock::new(HashMap::new()),
            state_tx,
            link_task: Mutex::new(None),
        })
    }

    /// Opens a link to the relay and flushes the backlog onto it.
    ///
    /// Failures leave the channel `Closed` with its queue intact; retrying is
    /// up to the caller.
    pub async fn connect(self: &Arc<Self>) -> Result<(), SignalingError> {
        let started_epoch = {
            let mut out = self.outbound.lock();
            match out.state {
                ChannelState::Ready => return Ok(()),
                ChannelState::Connecting => return Err(SignalingError::AlreadyConnecting),
                ChannelState::Closed => {}
            }
            out.state = ChannelState::Connecting;
            self.state_tx.send_replace(ChannelState::Connecting);
            out.epoch
        };

        self.retire_link().await;

        let link = match self.connector.open().await {
            Ok(link) => link,
            Err(err) => {
                let mut out = self.outbound.lock();
                if out.epoch == started_epoch {
                    out.state = ChannelState::Closed;
                    self.state_tx.send_replace(ChannelState::Closed);
                }
                warn!(
                    target = "huddle::signaling",
                    error = %err,
                    backlog = out.queue.len(),
                    "relay connect failed"
                );
                return Err(err);
            }
        };

        let (epoch, wake, backlog) = {
            let mut out = self.outbound.lock();
            if out.epoch != started_epoch {
                // closed locally while the link was opening
                return Err(SignalingError::Closed);
            }
            out.epoch += 1;
            out.state = ChannelState::Ready;
            let wake = Arc::new(Notify::new());
            out.wake = Some(Arc::clone(&wake));
            self.state_tx.send_replace(ChannelState::Ready);
            (out.epoch, wake, out.queue.len())
        };

        let task = tokio::spawn(run_link(Arc::downgrade(self), epoch, link, wake));
        *self.link_task.lock() = Some(task);
        info!(
            target = "huddle::signaling",
            backlog, "signaling channel ready"
        );
        Ok(())
    }

    /// Serializes `message` and transmits it, or queues it until the channel
    /// is ready. Only encoding can fail.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), SignalingError> {
        let text = serde_json::to_string(message)?;
        self.send_text(text);
        Ok(())
    }

    pub fn send_text(&self, text: String) {
        let mut out = self.outbound.lock();
        out.queue.push_back(text);
        let backlog = out.queue.len();
        match (&out.state, &out.wake) {
            (ChannelState::Ready, Some(wake)) => wake.notify_one(),
            _ => trace!(
                target = "huddle::signaling",
                backlog, "channel not ready; message queued"
            ),
        }
        telemetry::record_gauge("signaling.backlog", backlog as u64);
    }

    /// Registers the handler for one message type, replacing any earlier one.
    pub fn on_message<F>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self
            .handlers
            .write()
            .insert(kind.clone(), Arc::new(handler))
            .is_some()
        {
            debug!(target = "huddle::signaling", kind = %kind, "replaced relay handler");
        }
    }

    /// Typed form of [`on_message`](Self::on_message) keyed by `M::TYPE`.
    pub fn on<M, F>(&self, handler: F)
    where
        M: InboundMessage,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.on_message(M::TYPE, move |value| match serde_json::from_value::<M>(value) {
            Ok(message) => handler(message),
            Err(err) => warn!(
                target = "huddle::signaling",
                kind = M::TYPE,
                error = %err,
                "dropping undecodable relay message"
            ),
        });
    }

    pub fn state(&self) -> ChannelState {
        self.outbound.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ChannelState::Ready
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    /// Messages waiting for the wire.
    pub fn queued(&self) -> usize {
        self.outbound.lock().queue.len()
    }

    /// Closes the link locally. Queued messages stay for the next `connect`.
    pub fn close(&self) {
        let mut out = self.outbound.lock();
        out.epoch += 1;
        out.state = ChannelState::Closed;
        if let Some(wake) = out.wake.take() {
            wake.notify_one();
        }
        self.state_tx.send_replace(ChannelState::Closed);
        debug!(
            target = "huddle::signaling",
            backlog = out.queue.len(),
            "signaling channel closed locally"
        );
    }

    /// Waits for the previous link task to finish. A task stuck in a write
    /// observes the epoch change from `close` or `link_lost` and returns its
    /// in-flight message before exiting.
    async fn retire_link(&self) {
        let Some(mut task) = self.link_task.lock().take() else {
            return;
        };
        if tokio::time::timeout(LINK_RETIRE_GRACE, &mut task).await.is_err() {
            warn!(
                target = "huddle::signaling",
                "previous relay link did not shut down; aborting it"
            );
            task.abort();
            let _ = task.await;
        }
        self.finish_send(false);
    }

    /// Moves the next queued message into the in-flight slot.
    fn next_outgoing(&self, epoch: u64) -> Option<String> {
        let mut out = self.outbound.lock();
        if out.epoch != epoch || out.state != ChannelState::Ready || out.in_flight.is_some() {
            return None;
        }
        let next = out.queue.pop_front()?;
        out.in_flight = Some(next.clone());
        telemetry::record_gauge("signaling.backlog", out.queue.len() as u64);
        Some(next)
    }

    /// Clears the in-flight slot; an undelivered message returns to the front.
    fn finish_send(&self, delivered: bool) {
        let mut out = self.outbound.lock();
        if let Some(text) = out.in_flight.take() {
            if !delivered {
                out.queue.push_front(text);
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.outbound.lock().epoch == epoch
    }

    fn link_lost(&self, epoch: u64) {
        let mut out = self.outbound.lock();
        if let Some(text) = out.in_flight.take() {
            out.queue.push_front(text);
        }
        if out.epoch != epoch {
            return;
        }
        out.state = ChannelState::Closed;
        out.wake = None;
        self.state_tx.send_replace(ChannelState::Closed);
        info!(
            target = "huddle::signaling",
            backlog = out.queue.len(),
            "relay link lost"
        );
    }

    fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target = "huddle::signaling",
                    error = %err,
                    len = text.len(),
                    "dropping malformed relay message"
                );
                return;
            }
        };
        let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
            warn!(
                target = "huddle::signaling",
                "dropping relay message without type"
            );
            return;
        };
        let handler = self.handlers.read().get(&kind).cloned();
        match handler {
            Some(handler) => {
                trace!(target = "huddle::signaling", kind = %kind, "dispatching relay message");
                handler(value);
            }
            None => debug!(
                target = "huddle::signaling",
                kind = %kind,
                "no handler registered; discarding relay message"
            ),
        }
    }
}

impl SignalSink for SignalingChannel {
    fn send_signal(&self, signal: Signal) {
        if let Err(err) = self.send(&signal) {
            warn!(
                target = "huddle::signaling",
                kind = signal.message_type(),
                peer = %signal.recipient(),
                error = %err,
                "failed to encode outbound signal"
            );
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(task) = self.link_task.lock().take() {
            task.abort();
        }
    }
}

async fn run_link(
    channel: Weak<SignalingChannel>,
    epoch: u64,
    link: RelayLink,
    wake: Arc<Notify>,
) {
    let RelayLink {
        mut sink,
        mut stream,
    } = link;

    loop {
        let Some(current) = channel.upgrade() else {
            return;
        };
        if !current.is_current(epoch) {
            let _ = sink.close().await;
            return;
        }
        while let Some(text) = current.next_outgoing(epoch) {
            trace!(target = "huddle::signaling", len = text.len(), "ws_out");
            let outcome = {
                let send = sink.send(text);
                tokio::pin!(send);
                loop {
                    tokio::select! {
                        result = &mut send => break Some(result),
                        _ = wake.notified() => {
                            if !current.is_current(epoch) {
                                break None;
                            }
                        }
                    }
                }
            };
            match outcome {
                Some(Ok(())) => current.finish_send(true),
                Some(Err(err)) => {
                    warn!(target = "huddle::signaling", error = %err, "relay send failed");
                    current.link_lost(epoch);
                    return;
                }
                None => {
                    debug!(
                        target = "huddle::signaling",
                        "link superseded mid-send; requeueing message"
                    );
                    current.finish_send(false);
                    return;
                }
            }
        }
        drop(current);

        tokio::select! {
            _ = wake.notified() => {}
            incoming = stream.next() => {
                let Some(current) = channel.upgrade() else {
                    return;
                };
                match incoming {
                    Some(Ok(text)) => {
                        if current.is_current(epoch) {
                            current.dispatch(&text);
                        }
                    }
                    Some(Err(err)) => {
                        debug!(target = "huddle::signaling", error = %err, "relay link error");
                        current.link_lost(epoch);
                        return;
                    }
                    None => {
                        current.link_lost(epoch);
                        return;
                    }
                }
            }
        }
    }
}
