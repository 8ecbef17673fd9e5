use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use memostep::config::{init_tracing, ServerArgs};
use memostep::error::{RoomError, StoreError};
use memostep::room::{MemoryRoomStore, RoomSubscription, RoomSync};
use memostep::server_protocol::{parse_client_message, ParsedClientMessage};
use memostep::session::daily::DailyRun;
use memostep::storage::LocalStore;
use memostep::xp::XpTable;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<AppState>;

struct AppState {
    rooms: RoomSync<MemoryRoomStore>,
    profile: Mutex<LocalStore>,
    xp_table: XpTable,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

/// Room membership of one websocket connection.
#[derive(Default)]
struct Membership {
    code: Option<String>,
    player_id: Option<String>,
    subscription: Option<RoomSubscription>,
}

impl Membership {
    fn seat(&self) -> Option<(&str, &str)> {
        Some((self.code.as_deref()?, self.player_id.as_deref()?))
    }

    fn clear(&mut self) {
        self.code = None;
        self.player_id = None;
        self.subscription = None;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeatRequest {
    player_id: String,
    name: String,
}

struct ApiError(RoomError);

impl From<RoomError> for ApiError {
    fn from(error: RoomError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = ServerArgs::parse();
    init_tracing(&args.log_level);

    let mut profile = LocalStore::open(args.profile_path());
    let device_id = profile.ensure_player_id();
    tracing::info!(%device_id, path = %profile.path().display(), "[server] local profile loaded");

    let state = Arc::new(AppState {
        rooms: RoomSync::new(Arc::new(MemoryRoomStore::new())),
        profile: Mutex::new(profile),
        xp_table: XpTable::default(),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/profile", get(profile_handler))
        .route("/api/daily/{date}", get(daily_handler))
        .route("/api/rooms", post(create_room_handler))
        .route("/api/rooms/{code}", get(room_handler))
        .route("/api/rooms/{code}/join", post(join_room_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = args.resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        tracing::info!(root = %static_dir.display(), "[server] static file root");
        app.fallback_service(ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)))
    } else {
        tracing::warn!("[server] static file root not found, serving the api only");
        app
    };

    let bind_addr = args.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "[server] listening");
    axum::serve(listener, app).await
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn profile_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.profile.lock().await;
    let profile = guard.profile();
    Json(json!({
        "profile": profile,
        "level": state.xp_table.calculate_level(profile.total_xp),
    }))
}

async fn daily_handler(Path(raw): Path<String>) -> Response {
    let Ok(date) = raw.parse::<NaiveDate>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "date must be YYYY-MM-DD" })),
        )
            .into_response();
    };
    let daily = DailyRun::new(date);
    Json(json!({
        "date": date,
        "patterns": daily.patterns(),
    }))
    .into_response()
}

async fn create_room_handler(
    State(state): State<SharedState>,
    Json(request): Json<SeatRequest>,
) -> Result<Json<Value>, ApiError> {
    let code = state.rooms.create_room(&request.player_id, &request.name).await?;
    Ok(Json(json!({ "code": code })))
}

async fn room_handler(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let room = state.rooms.get_room(&code).await?;
    Ok(Json(json!(room)))
}

async fn join_room_handler(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Json(request): Json<SeatRequest>,
) -> Result<Json<Value>, ApiError> {
    let room = state
        .rooms
        .join_room(&code, &request.player_id, &request.name)
        .await?;
    Ok(Json(json!(room)))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);
    tracing::debug!(client = %client_id, "[server] client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => ws_sender.send(Message::Text(payload.into())).await,
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    let mut membership = Membership::default();
    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state, &tx, &mut membership, raw.as_str()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(&state, &tx, &mut membership, &text).await;
                } else {
                    send_error_to_client(&tx, "invalid utf8 message");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(&state, &client_id, &mut membership).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(
    state: &SharedState,
    tx: &mpsc::Sender<OutboundMessage>,
    membership: &mut Membership,
    raw: &str,
) {
    let Some(message) = parse_client_message(raw) else {
        send_error_to_client(tx, "invalid message");
        return;
    };

    let result = match message {
        ParsedClientMessage::Create { player_id, name } => {
            match state.rooms.create_room(&player_id, &name).await {
                Ok(code) => {
                    seat(state, tx, membership, &code, &player_id).await;
                    Ok(())
                }
                Err(error) => Err(error),
            }
        }
        ParsedClientMessage::Join {
            code,
            player_id,
            name,
        } => match state.rooms.join_room(&code, &player_id, &name).await {
            Ok(room) => {
                seat(state, tx, membership, room.code(), &player_id).await;
                Ok(())
            }
            Err(error) => Err(error),
        },
        ParsedClientMessage::Ping { t } => {
            send_to_client(tx, &json!({ "type": "pong", "t": t, "serverTime": now_ms() }));
            Ok(())
        }
        ParsedClientMessage::Leave => {
            if let Some((code, player_id)) = membership.seat() {
                let outcome = state.rooms.leave_room(code, player_id).await;
                membership.clear();
                send_to_client(tx, &json!({ "type": "left" }));
                outcome
            } else {
                Ok(())
            }
        }
        other => {
            let Some((code, player_id)) = membership.seat() else {
                send_error_to_client(tx, "join a room first");
                return;
            };
            dispatch_room_command(state, tx, code, player_id, other).await
        }
    };

    if let Err(error) = result {
        tracing::debug!(%error, "[server] command rejected");
        send_error_to_client(tx, &error.to_string());
    }
}

async fn dispatch_room_command(
    state: &SharedState,
    tx: &mpsc::Sender<OutboundMessage>,
    code: &str,
    player_id: &str,
    message: ParsedClientMessage,
) -> Result<(), RoomError> {
    let rooms = &state.rooms;
    match message {
        ParsedClientMessage::Start => {
            let seed = rooms.start_match(code, player_id, now_ms()).await?;
            send_to_client(tx, &json!({ "type": "started", "seed": seed }));
        }
        ParsedClientMessage::RoundWin { time_ms } => {
            rooms.report_round_win(code, player_id, time_ms).await?;
        }
        ParsedClientMessage::LifeLoss { winner_id } => {
            rooms
                .report_life_loss(code, player_id, winner_id.as_deref())
                .await?;
        }
        ParsedClientMessage::Progress { value } => {
            rooms.set_player_progress(code, player_id, value).await?;
        }
        ParsedClientMessage::Power { kind } => {
            rooms.use_power(code, player_id, &kind).await?;
        }
        ParsedClientMessage::Reset => {
            rooms.reset_room(code).await?;
        }
        ParsedClientMessage::Create { .. }
        | ParsedClientMessage::Join { .. }
        | ParsedClientMessage::Leave
        | ParsedClientMessage::Ping { .. } => {}
    }
    Ok(())
}

/// Binds the connection to a room and streams every change to it. The
/// current snapshot goes out first.
async fn seat(
    state: &SharedState,
    tx: &mpsc::Sender<OutboundMessage>,
    membership: &mut Membership,
    code: &str,
    player_id: &str,
) {
    if let Some((previous_code, previous_player)) = membership.seat() {
        if previous_code != code || previous_player != player_id {
            if let Err(error) = state.rooms.leave_room(previous_code, previous_player).await {
                tracing::warn!(%error, room = previous_code, "[server] leaving previous room failed");
            }
        }
    }
    membership.clear();

    send_to_client(tx, &json!({ "type": "joined", "code": code, "playerId": player_id }));
    if let Ok(room) = state.rooms.get_room(code).await {
        send_to_client(tx, &json!({ "type": "room", "room": room }));
    }

    let room_tx = tx.clone();
    let subscription = state.rooms.subscribe_room(code, move |room| {
        let payload = json!({ "type": "room", "room": room });
        if room_tx.try_send(OutboundMessage::Text(payload.to_string())).is_err() {
            tracing::warn!("[server] outbound queue full, dropping room snapshot");
        }
    });
    membership.code = Some(code.to_string());
    membership.player_id = Some(player_id.to_string());
    membership.subscription = Some(subscription);
}

async fn handle_disconnect(state: &SharedState, client_id: &str, membership: &mut Membership) {
    if let Some((code, player_id)) = membership.seat() {
        if let Err(error) = state.rooms.leave_room(code, player_id).await {
            tracing::warn!(%error, room = code, "[server] leave on disconnect failed");
        }
    }
    membership.clear();
    tracing::debug!(client = %client_id, "[server] client disconnected");
}

fn send_to_client(tx: &mpsc::Sender<OutboundMessage>, message: &Value) {
    if tx.try_send(OutboundMessage::Text(message.to_string())).is_err() {
        let _ = tx.try_send(OutboundMessage::Close {
            code: 1013,
            reason: "outbound queue full".to_string(),
        });
    }
}

fn send_error_to_client(tx: &mpsc::Sender<OutboundMessage>, message: &str) {
    send_to_client(
        tx,
        &json!({
            "type": "error",
            "message": message,
        }),
    );
}

fn status_for(error: &RoomError) -> StatusCode {
    match error {
        RoomError::Validation(_) | RoomError::UnknownPower(_) => StatusCode::BAD_REQUEST,
        RoomError::NotFound(_) => StatusCode::NOT_FOUND,
        RoomError::NotHost => StatusCode::FORBIDDEN,
        RoomError::NotEnoughPlayers { .. } | RoomError::NoRoom => StatusCode::CONFLICT,
        RoomError::Store(StoreError::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
        RoomError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_errors_map_to_http_status() {
        assert_eq!(status_for(&RoomError::Validation("name required")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&RoomError::NotFound("ABC234".to_string())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&RoomError::NotHost), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&RoomError::NotEnoughPlayers { count: 1, required: 2 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&RoomError::Store(StoreError::Unavailable)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn make_id_is_sequential() {
        let a = make_id("client");
        let b = make_id("client");
        assert!(a.starts_with("client_"));
        assert_ne!(a, b);
    }

    #[test]
    fn error_frames_are_typed() {
        let (tx, mut rx) = mpsc::channel(4);
        send_error_to_client(&tx, "invalid message");
        match rx.try_recv() {
            Ok(OutboundMessage::Text(payload)) => {
                let value: Value = serde_json::from_str(&payload).expect("json");
                assert_eq!(value["type"], "error");
                assert_eq!(value["message"], "invalid message");
            }
            other => panic!("unexpected outbound message: {other:?}"),
        }
    }

    #[test]
    fn full_queue_requests_close() {
        let (tx, mut rx) = mpsc::channel(1);
        send_to_client(&tx, &json!({ "type": "a" }));
        send_to_client(&tx, &json!({ "type": "b" }));
        assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Text(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn websocket_commands_drive_the_room() {
        let state = Arc::new(AppState {
            rooms: RoomSync::new(Arc::new(MemoryRoomStore::new())),
            profile: Mutex::new(LocalStore::open(
                std::env::temp_dir().join(format!("memostep-server-{}.json", make_id("test"))),
            )),
            xp_table: XpTable::default(),
        });
        let (tx, mut rx) = mpsc::channel(64);
        let mut membership = Membership::default();

        handle_client_message(&state, &tx, &mut membership, r#"{"type":"start"}"#).await;
        let first = rx.recv().await.expect("frame");
        assert!(matches!(first, OutboundMessage::Text(ref text) if text.contains("join a room first")));

        handle_client_message(
            &state,
            &tx,
            &mut membership,
            r#"{"type":"create","playerId":"A","name":"Alice"}"#,
        )
        .await;
        let (code, _) = membership.seat().expect("seated");
        let code = code.to_string();
        state.rooms.join_room(&code, "B", "Bob").await.expect("join");

        handle_client_message(&state, &tx, &mut membership, r#"{"type":"start"}"#).await;
        handle_client_message(&state, &tx, &mut membership, r#"{"type":"round_win","timeMs":900}"#)
            .await;
        let room = state.rooms.get_room(&code).await.expect("room");
        assert_eq!(room.player("A").map(|player| player.score), Some(1));

        handle_client_message(&state, &tx, &mut membership, r#"{"type":"leave"}"#).await;
        assert!(membership.seat().is_none());
        let room = state.rooms.get_room(&code).await.expect("room");
        assert!(room.player("A").is_none());
    }
}
