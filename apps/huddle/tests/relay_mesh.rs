//! Full clients talking through a real websocket relay; media is mocked.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use huddle::coordinator::SessionCoordinator;
use huddle::media::mock::{MockCapture, MockTransportFactory};
use huddle::session::NegotiationPhase;
use huddle::signaling::{SignalingChannel, WebSocketConnector};
use huddle::view::LogView;
use huddle_proto::{
    AssignId, ExistingUsers, PeerId, RelayMessage, Signal, UserJoined, UserLeft,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

#[derive(Clone, Default)]
struct Relay {
    peers: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<String>>>>,
    forwarded: Arc<Mutex<Vec<(PeerId, Signal)>>>,
}

impl Relay {
    fn offers(&self) -> Vec<(PeerId, PeerId)> {
        self.forwarded
            .lock()
            .iter()
            .filter_map(|(from, signal)| match signal {
                Signal::Offer { user_id, .. } => Some((from.clone(), user_id.clone())),
                _ => None,
            })
            .collect()
    }
}

fn deliver(to: &mpsc::UnboundedSender<String>, message: RelayMessage) {
    let text = serde_json::to_string(&message).expect("relay message encodes");
    let _ = to.send(text);
}

async fn upgrade(ws: WebSocketUpgrade, State(relay): State<Relay>) -> Response {
    ws.on_upgrade(move |socket| serve_client(socket, relay))
}

async fn serve_client(socket: WebSocket, relay: Relay) {
    let id = PeerId::new(Uuid::new_v4().to_string());
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let existing = {
        let mut peers = relay.peers.lock();
        let existing: Vec<PeerId> = peers.keys().cloned().collect();
        for other in peers.values() {
            deliver(
                other,
                RelayMessage::UserJoined(UserJoined {
                    user_id: id.clone(),
                }),
            );
        }
        peers.insert(id.clone(), tx.clone());
        existing
    };
    deliver(&tx, RelayMessage::AssignId(AssignId { user_id: id.clone() }));
    deliver(
        &tx,
        RelayMessage::ExistingUsers(ExistingUsers { user_ids: existing }),
    );

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(signal) = serde_json::from_str::<Signal>(&text) else {
            continue;
        };
        relay.forwarded.lock().push((id.clone(), signal.clone()));
        let target = relay.peers.lock().get(signal.recipient()).cloned();
        if let Some(target) = target {
            deliver(&target, signal.relay_from(id.clone()));
        }
    }

    let mut peers = relay.peers.lock();
    peers.remove(&id);
    for other in peers.values() {
        deliver(
            other,
            RelayMessage::UserLeft(UserLeft {
                user_id: id.clone(),
            }),
        );
    }
    drop(peers);
    writer.abort();
}

async fn start_relay() -> (Relay, SocketAddr) {
    let relay = Relay::default();
    let app = Router::new()
        .route("/", get(upgrade))
        .with_state(relay.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("relay server");
    });
    (relay, addr)
}

struct Client {
    coordinator: SessionCoordinator,
    id: PeerId,
}

async fn join_client(addr: SocketAddr) -> Client {
    let url = Url::parse(&format!("ws://{addr}/")).expect("relay url");
    let channel = SignalingChannel::new(Arc::new(WebSocketConnector::new(url)));
    let coordinator = SessionCoordinator::new(
        channel,
        MockTransportFactory::new(),
        MockCapture::working(),
        LogView::new(),
    );
    coordinator.join().await.expect("client joins relay");
    let engine = coordinator.engine().clone();
    eventually(|| {
        let engine = engine.clone();
        async move { engine.local_identity().is_some() }
    })
    .await;
    let id = engine.local_identity().expect("identity assigned");
    Client { coordinator, id }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    while !check().await {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn all_stable(clients: &[&Client]) -> bool {
    for client in clients {
        for other in clients {
            if client.id == other.id {
                continue;
            }
            let phase = client.coordinator.engine().phase(&other.id).await;
            if phase != Some(NegotiationPhase::Stable) {
                return false;
            }
        }
    }
    true
}

#[test_timeout::tokio_timeout_test(30, trace)]
async fn three_clients_form_a_full_mesh() {
    let (relay, addr) = start_relay().await;
    let a = join_client(addr).await;
    let b = join_client(addr).await;
    let c = join_client(addr).await;
    let clients = [&a, &b, &c];

    eventually(|| all_stable(&clients)).await;

    let offers = relay.offers();
    assert_eq!(offers.len(), 3, "one offer per pair: {offers:?}");
    for (from, to) in &offers {
        assert!(from < to, "offer {from} -> {to} sent by the higher identity");
    }
    for client in clients {
        assert_eq!(client.coordinator.participants(), 3);
        assert_eq!(client.coordinator.engine().peers().await.len(), 2);
    }
}

#[test_timeout::tokio_timeout_test(30)]
async fn departure_releases_the_peer_everywhere() {
    let (_relay, addr) = start_relay().await;
    let a = join_client(addr).await;
    let b = join_client(addr).await;
    let c = join_client(addr).await;
    let clients = [&a, &b, &c];
    eventually(|| all_stable(&clients)).await;

    c.coordinator.leave().await;

    eventually(|| async {
        a.coordinator.participants() == 2 && b.coordinator.participants() == 2
    })
    .await;
    for client in [&a, &b] {
        let engine = client.coordinator.engine();
        eventually(|| async { engine.phase(&c.id).await.is_none() }).await;
        assert_eq!(engine.peers().await.len(), 1);
    }
    assert!(c.coordinator.engine().peers().await.is_empty());
    assert_eq!(c.coordinator.participants(), 1);
}
