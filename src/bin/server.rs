use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use between_server::config::ServerConfig;
use between_server::constants::TICK_MS;
use between_server::host::{MatchHost, Outbound, Payload, Recipient};
use between_server::protocol::{parse_client_message, ServerMessage};
use between_server::types::ClientId;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<ClientId, ClientContext>,
    host: MatchHost,
    started_at: Instant,
}

impl ServerState {
    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env();
    let catalog = config.load_catalog()?;
    let layout = config.load_layout()?;
    let seed = config.match_seed.unwrap_or_else(|| rand::rng().random());
    info!(
        seed,
        fades = config.screen_fades,
        max_players = config.lobby_max_players,
        countdown = config.lobby_countdown_seconds,
        engine_token = config.engine_token.is_some(),
        "match host configured"
    );

    let mut host = MatchHost::new(catalog, layout, config.host_options(seed));
    host.start(0);
    host.drain_outbox();

    let state = Arc::new(Mutex::new(ServerState {
        clients: HashMap::new(),
        host,
        started_at: Instant::now(),
    }));
    start_tick_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/match", get(match_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind server socket {bind_addr}"))?;

    info!(port = config.port, "listening");
    axum::serve(listener, app)
        .await
        .context("server runtime failed")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn match_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(guard.host.snapshot())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard
            .clients
            .insert(client_id, ClientContext { tx: tx.clone() });
    }
    debug!(client_id, "socket opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Binary(bytes) => {
                    ws_sender.send(Message::Binary(bytes.into())).await
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state, client_id, raw.as_str()).await;
            }
            Message::Binary(raw) => match std::str::from_utf8(&raw) {
                Ok(text) => handle_client_message(&state, client_id, text).await,
                Err(_) => {
                    let mut guard = state.lock().await;
                    send_to_client(
                        &mut guard,
                        client_id,
                        OutboundMessage::Text(ServerMessage::error("invalid utf8 message").to_json()),
                        QueuePolicy::DisconnectOnFull,
                    );
                    flush_outbox(&mut guard);
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(&state, client_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: &SharedState, client_id: ClientId, raw: &str) {
    let mut guard = state.lock().await;
    let Some(message) = parse_client_message(raw) else {
        send_to_client(
            &mut guard,
            client_id,
            OutboundMessage::Text(ServerMessage::error("invalid message").to_json()),
            QueuePolicy::DisconnectOnFull,
        );
        flush_outbox(&mut guard);
        return;
    };
    let now_ms = guard.now_ms();
    guard.host.handle_message(client_id, message, now_ms);
    flush_outbox(&mut guard);
}

async fn handle_disconnect(state: &SharedState, client_id: ClientId) {
    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, client_id);
    flush_outbox(&mut guard);
}

fn disconnect_client_internal(state: &mut ServerState, client_id: ClientId) {
    if state.clients.remove(&client_id).is_none() {
        return;
    }
    debug!(client_id, "socket closed");
    let now_ms = state.now_ms();
    state.host.handle_disconnect(client_id, now_ms);
}

fn start_tick_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            let now_ms = guard.now_ms();
            guard.host.step(now_ms);
            flush_outbox(&mut guard);
        }
    });
}

/// Delivers everything the host queued, including messages produced by
/// disconnects that delivery itself triggers.
fn flush_outbox(state: &mut ServerState) {
    loop {
        let outbox = state.host.drain_outbox();
        if outbox.is_empty() {
            break;
        }
        for outbound in outbox {
            deliver(state, outbound);
        }
    }
}

fn deliver(state: &mut ServerState, outbound: Outbound) {
    let (message, policy) = match outbound.payload {
        Payload::Message(message) => {
            let policy = queue_policy(&message);
            (OutboundMessage::Text(message.to_json()), policy)
        }
        Payload::Placement(bytes) => (OutboundMessage::Binary(bytes), QueuePolicy::DisconnectOnFull),
    };
    match outbound.recipient {
        Recipient::All => broadcast(state, message, policy),
        Recipient::Client(client_id) => send_to_client(state, client_id, message, policy),
    }
}

fn queue_policy(message: &ServerMessage) -> QueuePolicy {
    match message {
        ServerMessage::Pong { .. } | ServerMessage::Lobby { .. } => QueuePolicy::DropOnFull,
        _ => QueuePolicy::DisconnectOnFull,
    }
}

fn send_to_client(
    state: &mut ServerState,
    client_id: ClientId,
    message: OutboundMessage,
    policy: QueuePolicy,
) {
    let send_failed = if let Some(client) = state.clients.get(&client_id) {
        client.tx.try_send(message).is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        warn!(client_id, "outbound queue full; disconnecting client");
        disconnect_client_internal(state, client_id);
    }
}

fn broadcast(state: &mut ServerState, message: OutboundMessage, policy: QueuePolicy) {
    let client_ids: Vec<ClientId> = state.clients.keys().copied().collect();
    let mut failed_clients = Vec::new();
    for client_id in client_ids {
        if !state.host.is_registered(client_id) {
            continue;
        }
        let Some(client) = state.clients.get(&client_id) else {
            continue;
        };
        if client.tx.try_send(message.clone()).is_err() && policy == QueuePolicy::DisconnectOnFull
        {
            failed_clients.push(client_id);
        }
    }
    for client_id in failed_clients {
        warn!(client_id, "outbound queue full; disconnecting client");
        disconnect_client_internal(state, client_id);
    }
}
