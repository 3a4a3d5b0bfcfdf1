use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::types::{AppState, PnlResult, WsMessage};

/// Response for the PnL list endpoint
#[derive(Serialize)]
pub struct PnlResponse {
    pub results: Vec<PnlResult>,
    pub total: i64,
}

/// Query params for the PnL list endpoint
#[derive(Debug, Deserialize)]
pub struct PnlQueryParams {
    pub limit: Option<u32>,
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "OK"}))
}

/// GET /api/pnl - most recent results, newest first
pub async fn get_pnl(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PnlQueryParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50);

    match (state.store.recent(limit), state.store.count()) {
        (Ok(results), Ok(total)) => (
            StatusCode::OK,
            Json(serde_json::json!(PnlResponse { results, total })),
        ),
        (Err(e), _) | (_, Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

/// GET /ws - push each freshly computed result to subscribers
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.tx.subscribe();

    let welcome = WsMessage::Connected {
        mode: "results".to_string(),
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Forward computed results to this client
    let send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Drain the client side until it closes
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("WebSocket client disconnected");
}
