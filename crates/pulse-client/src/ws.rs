//! The graphql-ws wire protocol (§4.7): connection lifecycle, subscribe-frame queueing, and
//! message dispatch. This is the socket-level state machine; retry/backoff policy on top of it
//! lives in [`crate::hooks::subscription`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::GraphQlErrorEntry;
use crate::error::PulseError;
use crate::runtime::spawn_local_scoped;

/// A connected duplex text channel. Implemented by a real WebSocket on native targets
/// ([`TungsteniteConnection`]) and by an in-memory pair in tests.
///
/// Not `Send`: like every other async surface in this crate, a connection is driven from the
/// single cooperative executor thread alongside the reactive root it feeds.
pub trait WsConnection {
    /// Sends one text frame.
    fn send(&self, text: String) -> LocalBoxFuture<'static, Result<(), PulseError>>;
    /// Waits for the next text frame. Returns `None` once the connection is closed.
    fn recv(&self) -> LocalBoxFuture<'static, Option<String>>;
}

/// `{ id, type, payload }`, the graphql-ws envelope, serialized with `type` renamed to match the
/// protocol's wire spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct SubscribePayload {
    query: String,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    operation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WsState {
    Disconnected,
    Connecting,
    Ready,
    Closed,
}

struct Subscription {
    query: String,
    operation_name: Option<String>,
    variables: Option<Value>,
    on_next: Rc<dyn Fn(Value)>,
    on_error: Rc<dyn Fn(Vec<GraphQlErrorEntry>)>,
    on_complete: Rc<dyn Fn()>,
}

/// Identifies one active subscription within a [`SubscriptionManager`].
pub type SubscriptionId = String;

/// Owns one socket shared by every subscription of a client, and implements the graphql-ws
/// connection lifecycle: `disconnected -> connecting -> ready -> closed`.
///
/// `subscribe` calls made before the socket reaches `ready` are queued and flushed, in order, the
/// moment `connection_ack` arrives; calls made afterward are sent immediately.
pub struct SubscriptionManager<C> {
    connection: Rc<C>,
    state: Rc<Cell<WsState>>,
    subscriptions: Rc<RefCell<HashMap<SubscriptionId, Subscription>>>,
    queue: Rc<RefCell<Vec<SubscriptionId>>>,
    next_id: Rc<Cell<u64>>,
}

impl<C> Clone for SubscriptionManager<C> {
    fn clone(&self) -> Self {
        SubscriptionManager {
            connection: self.connection.clone(),
            state: self.state.clone(),
            subscriptions: self.subscriptions.clone(),
            queue: self.queue.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<C: WsConnection + 'static> SubscriptionManager<C> {
    /// Wraps `connection`. Call [`SubscriptionManager::connect`] once to start the protocol
    /// handshake and message loop.
    pub fn new(connection: C) -> Self {
        SubscriptionManager {
            connection: Rc::new(connection),
            state: Rc::new(Cell::new(WsState::Disconnected)),
            subscriptions: Rc::new(RefCell::new(HashMap::new())),
            queue: Rc::new(RefCell::new(Vec::new())),
            next_id: Rc::new(Cell::new(0)),
        }
    }

    /// The current protocol state, exposed for diagnostics.
    fn is_ready(&self) -> bool {
        self.state.get() == WsState::Ready
    }

    /// Sends `connection_init` and starts the read loop. Spawned on the current reactive scope;
    /// disposing that scope tears the loop down (the spawned task is aborted, not the socket
    /// itself, which a fresh [`SubscriptionManager`] would need to reopen).
    pub async fn connect(&self) -> Result<(), PulseError> {
        self.state.set(WsState::Connecting);
        self.connection
            .send(
                serde_json::to_string(&Envelope {
                    id: None,
                    kind: "connection_init".into(),
                    payload: None,
                })
                .expect("envelope always serializes"),
            )
            .await?;

        let this = self.clone();
        spawn_local_scoped(async move {
            loop {
                match this.connection.recv().await {
                    Some(text) => this.dispatch(&text),
                    None => {
                        this.on_closed();
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    fn dispatch(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(_) => return,
        };

        match envelope.kind.as_str() {
            "connection_ack" => {
                self.state.set(WsState::Ready);
                self.flush_queue();
            }
            "next" => {
                if let Some(id) = &envelope.id {
                    if let Some(sub) = self.subscriptions.borrow().get(id) {
                        let data = envelope
                            .payload
                            .and_then(|p| p.get("data").cloned())
                            .unwrap_or(Value::Null);
                        (sub.on_next)(data);
                    }
                }
            }
            "error" => {
                if let Some(id) = &envelope.id {
                    if let Some(sub) = self.subscriptions.borrow().get(id) {
                        let errors = envelope
                            .payload
                            .as_ref()
                            .and_then(|p| p.as_array())
                            .map(|entries| {
                                entries
                                    .iter()
                                    .map(|e| GraphQlErrorEntry {
                                        message: e
                                            .get("message")
                                            .and_then(Value::as_str)
                                            .unwrap_or("subscription error")
                                            .to_string(),
                                        extension_code: e
                                            .get("extensions")
                                            .and_then(|ext| ext.get("code"))
                                            .and_then(Value::as_str)
                                            .map(str::to_string),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        (sub.on_error)(errors);
                    }
                    self.subscriptions.borrow_mut().remove(id);
                }
            }
            "complete" => {
                if let Some(id) = &envelope.id {
                    if let Some(sub) = self.subscriptions.borrow_mut().remove(id) {
                        (sub.on_complete)();
                    }
                }
            }
            "ping" => {
                let connection = self.connection.clone();
                spawn_local_scoped(async move {
                    let _ = connection
                        .send(
                            serde_json::to_string(&Envelope {
                                id: None,
                                kind: "pong".into(),
                                payload: None,
                            })
                            .expect("envelope always serializes"),
                        )
                        .await;
                });
            }
            _ => {}
        }
    }

    fn on_closed(&self) {
        self.state.set(WsState::Closed);
        let errors = vec![GraphQlErrorEntry {
            message: "subscription socket closed".to_string(),
            extension_code: Some("SUBSCRIPTION_ERROR".to_string()),
        }];
        for (_, sub) in self.subscriptions.borrow_mut().drain() {
            (sub.on_error)(errors.clone());
        }
    }

    fn flush_queue(&self) {
        let ids: Vec<_> = self.queue.borrow_mut().drain(..).collect();
        for id in ids {
            self.send_subscribe(&id);
        }
    }

    fn send_subscribe(&self, id: &str) {
        let subscriptions = self.subscriptions.borrow();
        let sub = match subscriptions.get(id) {
            Some(sub) => sub,
            None => return,
        };
        let payload = serde_json::to_value(SubscribePayload {
            query: sub.query.clone(),
            operation_name: sub.operation_name.clone(),
            variables: sub.variables.clone(),
        })
        .expect("subscribe payload always serializes");
        drop(subscriptions);

        let text = serde_json::to_string(&Envelope {
            id: Some(id.to_string()),
            kind: "subscribe".into(),
            payload: Some(payload),
        })
        .expect("envelope always serializes");

        let connection = self.connection.clone();
        spawn_local_scoped(async move {
            let _ = connection.send(text).await;
        });
    }

    /// Registers a new subscription. Sent immediately if the socket is `ready`, queued otherwise.
    pub fn subscribe(
        &self,
        query: impl Into<String>,
        operation_name: Option<String>,
        variables: Option<Value>,
        on_next: impl Fn(Value) + 'static,
        on_error: impl Fn(Vec<GraphQlErrorEntry>) + 'static,
        on_complete: impl Fn() + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.get().to_string();
        self.next_id.set(self.next_id.get() + 1);

        self.subscriptions.borrow_mut().insert(
            id.clone(),
            Subscription {
                query: query.into(),
                operation_name,
                variables,
                on_next: Rc::new(on_next),
                on_error: Rc::new(on_error),
                on_complete: Rc::new(on_complete),
            },
        );

        if self.is_ready() {
            self.send_subscribe(&id);
        } else {
            self.queue.borrow_mut().push(id.clone());
        }
        id
    }

    /// Sends `complete` (if connected) and removes `id`'s entry. A no-op if `id` is unknown.
    pub fn unsubscribe(&self, id: &SubscriptionId) {
        if self.subscriptions.borrow_mut().remove(id).is_none() {
            return;
        }
        if self.is_ready() {
            let text = serde_json::to_string(&Envelope {
                id: Some(id.clone()),
                kind: "complete".into(),
                payload: None,
            })
            .expect("envelope always serializes");
            let connection = self.connection.clone();
            spawn_local_scoped(async move {
                let _ = connection.send(text).await;
            });
        }
    }
}

/// A [`WsConnection`] backed by a real WebSocket, used on native targets.
#[cfg(not(target_arch = "wasm32"))]
pub mod native {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::sync::Mutex;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    /// Connects to `url` using the `graphql-transport-ws` subprotocol.
    pub struct TungsteniteConnection {
        socket: Rc<Mutex<Socket>>,
    }

    impl TungsteniteConnection {
        /// Opens the WebSocket connection to `url`.
        pub async fn connect(url: &str) -> Result<Self, PulseError> {
            let (socket, _response) = connect_async(url)
                .await
                .map_err(|e| PulseError::Network(e.to_string()))?;
            Ok(TungsteniteConnection {
                socket: Rc::new(Mutex::new(socket)),
            })
        }
    }

    impl WsConnection for TungsteniteConnection {
        fn send(&self, text: String) -> LocalBoxFuture<'static, Result<(), PulseError>> {
            let socket = self.socket.clone();
            Box::pin(async move {
                socket
                    .lock()
                    .await
                    .send(Message::Text(text))
                    .await
                    .map_err(|e| PulseError::Network(e.to_string()))
            })
        }

        fn recv(&self) -> LocalBoxFuture<'static, Option<String>> {
            let socket = self.socket.clone();
            Box::pin(async move {
                loop {
                    match socket.lock().await.next().await {
                        Some(Ok(Message::Text(text))) => return Some(text),
                        Some(Ok(Message::Close(_))) | None => return None,
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => return None,
                    }
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::cell::RefCell as StdRefCell;
    use tokio::sync::mpsc;

    /// An in-memory transport pairing a client-side [`WsConnection`] with a test-controlled
    /// server driving it, so the protocol state machine can be exercised without a real socket.
    struct ChannelConnection {
        outgoing: mpsc::UnboundedSender<String>,
        incoming: Rc<StdRefCell<mpsc::UnboundedReceiver<String>>>,
    }

    impl WsConnection for ChannelConnection {
        fn send(&self, text: String) -> LocalBoxFuture<'static, Result<(), PulseError>> {
            let _ = self.outgoing.send(text);
            async { Ok(()) }.boxed_local()
        }

        fn recv(&self) -> LocalBoxFuture<'static, Option<String>> {
            let incoming = self.incoming.clone();
            async move { incoming.borrow_mut().recv().await }.boxed_local()
        }
    }

    fn harness() -> (
        SubscriptionManager<ChannelConnection>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let (client_to_server_tx, client_to_server_rx) = mpsc::unbounded_channel();
        let (server_to_client_tx, server_to_client_rx) = mpsc::unbounded_channel();
        let connection = ChannelConnection {
            outgoing: client_to_server_tx,
            incoming: Rc::new(StdRefCell::new(server_to_client_rx)),
        };
        (
            SubscriptionManager::new(connection),
            client_to_server_rx,
            server_to_client_tx,
        )
    }

    async fn expect_init(rx: &mut mpsc::UnboundedReceiver<String>) {
        let msg: Envelope = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg.kind, "connection_init");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscribe_before_ready_is_queued_then_flushed_on_ack() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (manager, mut from_client, to_client) = harness();
                manager.connect().await.unwrap();
                expect_init(&mut from_client).await;

                let received = Rc::new(StdRefCell::new(Vec::new()));
                let received_clone = received.clone();
                manager.subscribe(
                    "subscription S { x }",
                    None,
                    None,
                    move |data| received_clone.borrow_mut().push(data),
                    |_errors| {},
                    || {},
                );

                // Nothing sent yet: socket not ready.
                assert!(from_client.try_recv().is_err());

                to_client
                    .send(serde_json::to_string(&Envelope { id: None, kind: "connection_ack".into(), payload: None }).unwrap())
                    .unwrap();
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                let subscribe_msg: Envelope =
                    serde_json::from_str(&from_client.recv().await.unwrap()).unwrap();
                assert_eq!(subscribe_msg.kind, "subscribe");
                let id = subscribe_msg.id.clone().unwrap();

                to_client
                    .send(
                        serde_json::to_string(&Envelope {
                            id: Some(id),
                            kind: "next".into(),
                            payload: Some(json!({ "data": { "x": 1 } })),
                        })
                        .unwrap(),
                    )
                    .unwrap();
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert_eq!(received.borrow().as_slice(), &[json!({"x": 1})]);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn closed_socket_notifies_every_active_subscription() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (manager, mut from_client, to_client) = harness();
                manager.connect().await.unwrap();
                expect_init(&mut from_client).await;

                to_client
                    .send(serde_json::to_string(&Envelope { id: None, kind: "connection_ack".into(), payload: None }).unwrap())
                    .unwrap();
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                let errors_seen = Rc::new(StdRefCell::new(0));
                let errors_seen_clone = errors_seen.clone();
                manager.subscribe(
                    "subscription S { x }",
                    None,
                    None,
                    |_| {},
                    move |errors| {
                        *errors_seen_clone.borrow_mut() += errors.len();
                    },
                    || {},
                );
                let _ = from_client.recv().await; // the subscribe frame

                drop(to_client); // closes the channel, recv() resolves to None
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert_eq!(*errors_seen.borrow(), 1);
            })
            .await;
    }
}
