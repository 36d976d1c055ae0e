//! WebSocket streaming surface (spec.md §4.4, §5): one subscriber per
//! connection. The client authenticates with a bearer token in the first
//! text frame; every frame after that is a server-pushed `Delivery`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::event_bus::Event;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub token: String,
}

pub async fn upgrade(State(state): State<AppState>, Query(auth): Query<AuthQuery>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle(socket, state, auth.token))
}

async fn handle(mut socket: WebSocket, state: AppState, token: String) {
    let caller = match state.router.authenticate(&token) {
        Ok(caller) => caller,
        Err(e) => {
            let _ = socket
                .send(Message::Text(
                    json!({ "ok": false, "error": { "kind": e.kind, "message": e.message } }).to_string(),
                ))
                .await;
            return;
        }
    };

    state.router.presence().on_subscribe(&caller.username);
    let subscription = state.router.bus().subscribe();

    // Seed the connection with the current lock state so a fresh subscriber
    // never has to wait for the next transition to learn who holds it.
    state.router.bus().seed(subscription.id, Event::from(state.router.lock().status()));

    info!(username = %caller.username, "subscriber connected");

    loop {
        tokio::select! {
            delivery = subscription.recv() => {
                let payload = match serde_json::to_string(&delivery) {
                    Ok(p) => p,
                    Err(e) => { warn!("failed to serialize delivery: {e}"); continue; }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Any client activity (including a liveness ping) counts
                        // as presence, same as an HTTP command would.
                        state.router.presence().on_request(&caller.username);
                    }
                    Some(Err(e)) => {
                        warn!("websocket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    state.router.presence().on_unsubscribe(&caller.username);
    subscription.unsubscribe();
    info!(username = %caller.username, "subscriber disconnected");
}
