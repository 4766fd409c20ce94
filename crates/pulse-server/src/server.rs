//! WebSocket server: handshake, connection lifecycle, HTTP surface.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use pulse_core::channel;
use pulse_core::ids::ConnectionId;
use pulse_core::{IdentityVerifier, PermissionOracle, UpdateEvent};
use pulse_store::tasks::TaskRepo;
use pulse_store::Database;
use pulse_telemetry::ServerMetrics;

use crate::broadcast::{spawn_bridge, Broadcaster};
use crate::config::ServerConfig;
use crate::connection::Outbound;
use crate::frames::{self, Frame};
use crate::heartbeat::{self, WatchdogOutcome};
use crate::registry::ConnectionRegistry;
use crate::router::{run_router, RouterContext};

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub metrics: Arc<ServerMetrics>,
    pub inbound_tx: mpsc::Sender<(ConnectionId, String)>,
    pub cancel: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive and can shut everything down.
pub async fn start(
    config: ServerConfig,
    db: Database,
    verifier: Arc<dyn IdentityVerifier>,
    oracle: Arc<dyn PermissionOracle>,
    event_tx: broadcast::Sender<UpdateEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let metrics = Arc::new(ServerMetrics::new());
    let registry = Arc::new(ConnectionRegistry::new(
        config.max_send_queue,
        config.liveness_timeout(),
    ));
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry), Arc::clone(&metrics)));
    let cancel = CancellationToken::new();

    // Event-bus bridge
    let bridge = spawn_bridge(Arc::clone(&broadcaster), event_tx.subscribe());

    // Process-wide liveness prober
    let prober = heartbeat::spawn_prober(
        Arc::clone(&registry),
        config.probe_interval(),
        cancel.child_token(),
    );

    // Inbound frame queue and router
    let (inbound_tx, inbound_rx) = mpsc::channel::<(ConnectionId, String)>(1024);
    let router_ctx = RouterContext {
        registry: Arc::clone(&registry),
        oracle,
        broadcaster: Arc::clone(&broadcaster),
        tasks: TaskRepo::new(db),
        metrics: Arc::clone(&metrics),
    };
    let router = tokio::spawn(run_router(inbound_rx, router_ctx));

    let state = AppState {
        registry: Arc::clone(&registry),
        verifier,
        metrics: Arc::clone(&metrics),
        inbound_tx,
        cancel: cancel.clone(),
    };

    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "pulse server started");

    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        broadcaster,
        metrics,
        cancel,
        _server: server,
        _router: router,
        _bridge: bridge,
        _prober: prober,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: Arc<ServerMetrics>,
    cancel: CancellationToken,
    _server: tokio::task::JoinHandle<()>,
    _router: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _prober: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and cancel background tasks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default)]
    token: String,
}

/// WebSocket upgrade handler. The credential rides in the query string,
/// out-of-band of the frame protocol.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, query.token, state))
}

/// Authenticate and run one connection. Fails closed: any verification
/// failure sends a single error frame and closes the transport.
async fn handle_socket(mut socket: WebSocket, token: String, state: AppState) {
    let identity = match state.verifier.verify(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(kind = e.error_kind(), "handshake rejected");
            let frame = Frame::error(frames::ERR_AUTHENTICATION_FAILED).encode();
            let _ = socket.send(WsMessage::Text(frame.into())).await;
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };

    let (conn_id, rx) = match state.registry.admit(identity.clone()) {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!(error = %e, "admission failed");
            let frame = Frame::error(frames::ERR_AUTHENTICATION_FAILED).encode();
            let _ = socket.send(WsMessage::Text(frame.into())).await;
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };
    state.metrics.connection_opened();
    info!(connection_id = %conn_id, user_id = %identity.user_id, "client connected");

    // Every client watches its own user channel from the start.
    let _ = state
        .registry
        .subscribe(&conn_id, &channel::user(&identity.user_id));
    let _ = state
        .registry
        .send(&conn_id, Frame::connection_established(&identity.user_id).encode());

    run_connection(socket, conn_id, rx, state).await;
}

/// Split the socket into writer and reader tasks, arm the watchdog, and
/// wait for either side to finish.
async fn run_connection(
    socket: WebSocket,
    conn_id: ConnectionId,
    mut rx: mpsc::Receiver<Outbound>,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let conn_cancel = state.cancel.child_token();

    // Watchdog: reaps the registry entry when the liveness deadline passes.
    let wd_registry = Arc::clone(&state.registry);
    let wd_metrics = Arc::clone(&state.metrics);
    let wd_id = conn_id.clone();
    let wd_cancel = conn_cancel.clone();
    let _watchdog = tokio::spawn(async move {
        if heartbeat::run_watchdog(wd_registry, wd_id, wd_cancel).await == WatchdogOutcome::TimedOut
        {
            wd_metrics.connection_reaped();
        }
    });

    // Writer: drains the outbound queue onto the socket. The queue closes
    // when the registry entry is dropped, which ends this task and the
    // transport with it.
    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let msg = match out {
                Outbound::Frame(json) => WsMessage::Text(json.into()),
                Outbound::Probe => WsMessage::Ping(Vec::new().into()),
            };
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Reader: any inbound traffic counts as liveness; text goes to the
    // router in arrival order.
    let reader_registry = Arc::clone(&state.registry);
    let reader_id = conn_id.clone();
    let inbound_tx = state.inbound_tx.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_registry.touch(&reader_id);
                    if inbound_tx.send((reader_id.clone(), text.to_string())).await.is_err() {
                        break;
                    }
                }
                // axum answers pings itself; both directions prove liveness.
                WsMessage::Ping(_) | WsMessage::Pong(_) => reader_registry.touch(&reader_id),
                WsMessage::Close(_) => break,
                WsMessage::Binary(_) => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    let _ = state.registry.remove(&conn_id);
    conn_cancel.cancel();
    info!(connection_id = %conn_id, "client disconnected");
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let users: Vec<String> = state
        .registry
        .connected_users()
        .into_iter()
        .map(|u| u.as_str().to_string())
        .collect();

    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
        "connected_users": users,
        "metrics": state.metrics.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use futures::Stream;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    use pulse_auth::TokenVerifier;
    use pulse_core::ids::{TaskId, TeamId, UserId};
    use pulse_core::{AccessError, Identity, Role, TaskStatus, TaskUpdate, TeamActivity};

    struct AllowAll;

    #[async_trait]
    impl PermissionOracle for AllowAll {
        async fn can_subscribe(&self, _who: &Identity, _channel: &str) -> Result<bool, AccessError> {
            Ok(true)
        }

        async fn can_modify(&self, _who: &Identity, _task: &TaskId) -> Result<bool, AccessError> {
            Ok(true)
        }
    }

    const SECRET: &str = "server-test-secret";

    fn identity(id: &str) -> Identity {
        Identity::new(UserId::from_raw(id), format!("{id}@example.com"), vec![Role::Member])
    }

    fn token_for(id: &str) -> String {
        TokenVerifier::new(SECRET).mint_for(&identity(id), 3600).unwrap()
    }

    async fn start_test_server() -> ServerHandle {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let db = Database::in_memory().unwrap();
        let (event_tx, _) = broadcast::channel(64);
        start(
            config,
            db,
            Arc::new(TokenVerifier::new(SECRET)),
            Arc::new(AllowAll),
            event_tx,
        )
        .await
        .unwrap()
    }

    async fn next_text<S>(ws: &mut S) -> Frame
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.expect("stream ended").expect("ws error") {
                Message::Text(text) => return Frame::parse(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_state() {
        let handle = start_test_server().await;
        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["metrics"]["connections_opened"], 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn handshake_establishes_and_auto_subscribes() {
        let handle = start_test_server().await;
        let url = format!("ws://127.0.0.1:{}/ws?token={}", handle.port, token_for("alice"));
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let frame = next_text(&mut ws).await;
        assert_eq!(frame.kind, "connection_established");
        assert_eq!(frame.data.unwrap()["user_id"], "alice");

        // The registry now has one connection, subscribed to its own
        // user channel.
        assert_eq!(handle.registry.count(), 1);
        let matched = handle
            .registry
            .matching_connections(&["user:alice".to_string()]);
        assert_eq!(matched.len(), 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn handshake_fails_closed_on_bad_token() {
        let handle = start_test_server().await;
        let url = format!("ws://127.0.0.1:{}/ws?token=garbage", handle.port);
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let frame = next_text(&mut ws).await;
        assert_eq!(frame.kind, "error");
        assert_eq!(frame.error.as_deref(), Some("authentication failed"));

        // The server closes; nothing but a close frame may follow.
        loop {
            match ws.next().await {
                None | Some(Err(_)) => break,
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => panic!("unexpected message after auth failure: {other:?}"),
            }
        }
        assert_eq!(handle.registry.count(), 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn handshake_fails_closed_on_missing_token() {
        let handle = start_test_server().await;
        let url = format!("ws://127.0.0.1:{}/ws", handle.port);
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let frame = next_text(&mut ws).await;
        assert_eq!(frame.error.as_deref(), Some("authentication failed"));
        handle.shutdown();
    }

    #[tokio::test]
    async fn subscribe_ack_and_broadcast_roundtrip() {
        let handle = start_test_server().await;
        let url = format!("ws://127.0.0.1:{}/ws?token={}", handle.port, token_for("alice"));
        let (mut ws, _) = connect_async(&url).await.unwrap();
        let _ = next_text(&mut ws).await; // connection_established

        ws.send(Message::Text(
            r#"{"type":"subscribe","channel":"task:task_42"}"#.into(),
        ))
        .await
        .unwrap();
        let frame = next_text(&mut ws).await;
        assert_eq!(frame.kind, "subscribed");
        assert_eq!(frame.channel.as_deref(), Some("task:task_42"));

        // Push an event through the broadcaster; the subscriber sees it.
        let event = UpdateEvent::Task(TaskUpdate {
            task_id: TaskId::from_raw("task_42"),
            project_id: None,
            team_id: None,
            assignee_id: None,
            status: Some(TaskStatus::Done),
            title: None,
        });
        assert_eq!(handle.broadcaster.broadcast(&event), 1);

        let frame = next_text(&mut ws).await;
        assert_eq!(frame.kind, "task_updated");
        assert_eq!(frame.data.unwrap()["task_id"], "task_42");
        handle.shutdown();
    }

    #[tokio::test]
    async fn application_ping_answers_pong() {
        let handle = start_test_server().await;
        let url = format!("ws://127.0.0.1:{}/ws?token={}", handle.port, token_for("bob"));
        let (mut ws, _) = connect_async(&url).await.unwrap();
        let _ = next_text(&mut ws).await;

        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        let frame = next_text(&mut ws).await;
        assert_eq!(frame.kind, "pong");
        handle.shutdown();
    }

    #[tokio::test]
    async fn client_close_removes_registration() {
        let handle = start_test_server().await;
        let url = format!("ws://127.0.0.1:{}/ws?token={}", handle.port, token_for("carol"));
        let (mut ws, _) = connect_async(&url).await.unwrap();
        let _ = next_text(&mut ws).await;
        assert_eq!(handle.registry.count(), 1);

        ws.close(None).await.unwrap();

        // Give the server a moment to observe the close.
        for _ in 0..50 {
            if handle.registry.count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(handle.registry.count(), 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn bus_events_reach_subscribers() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let db = Database::in_memory().unwrap();
        let (event_tx, _) = broadcast::channel(64);
        let handle = start(
            config,
            db,
            Arc::new(TokenVerifier::new(SECRET)),
            Arc::new(AllowAll),
            event_tx.clone(),
        )
        .await
        .unwrap();

        let url = format!("ws://127.0.0.1:{}/ws?token={}", handle.port, token_for("dave"));
        let (mut ws, _) = connect_async(&url).await.unwrap();
        let _ = next_text(&mut ws).await;

        ws.send(Message::Text(
            r#"{"type":"subscribe","channel":"team:team_1"}"#.into(),
        ))
        .await
        .unwrap();
        let _ = next_text(&mut ws).await; // subscribed

        event_tx
            .send(UpdateEvent::Team(TeamActivity {
                team_id: TeamId::from_raw("team_1"),
                actor_id: UserId::from_raw("erin"),
                action: "member_joined".into(),
            }))
            .unwrap();

        let frame = next_text(&mut ws).await;
        assert_eq!(frame.kind, "team_updated");
        handle.shutdown();
    }
}
