use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use tracing::{debug, warn};

use crate::protocol::ClientMessage;
use crate::server::{self, AppState};
use crate::zone::Outbound;

pub async fn websocket_handler(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let address = client_address(&headers, peer);
    ws.on_upgrade(move |socket| handle_socket(socket, state, address))
}

/// Behind a reverse proxy the peer address is the proxy; the first entry
/// of `x-forwarded-for` is the actual client.
fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|forwarded| forwarded.split(',').next())
        .map(|address| address.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string())
}

pub async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, address: String) {
    let (tx, rx) = flume::unbounded();
    let connection_id = {
        let mut zone = state.zone.lock().await;
        zone.register_connection(tx, address.clone())
    };
    debug!("connection {} opened from {}", connection_id, address);

    let mut ping_interval =
        tokio::time::interval(Duration::from_secs(state.config.zone.ping_interval_secs));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick completes immediately
    ping_interval.tick().await;

    // A close is clean when either side says goodbye properly: the zone
    // asked us to close the connection, or the client sent a close frame
    // with a normal or going-away code. Everything else is an abrupt drop
    // and starts the identity grace period.
    let mut clean = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            outbound = rx.recv_async() => {
                match outbound {
                    Ok(Outbound::Text(json)) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Outbound::Close { code }) => {
                        let frame = CloseFrame { code, reason: "".into() };
                        let _ = socket.send(Message::Close(Some(frame))).await;
                        clean = true;
                        break;
                    }
                    Err(_) => break,
                }
            }
            inbound = socket.recv() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!("connection {} errored: {}", connection_id, e);
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(raw) => match serde_json::from_str::<ClientMessage>(&raw) {
                        Ok(parsed) => server::handle_message(&state, connection_id, parsed).await,
                        Err(e) => {
                            warn!("connection {} sent an unparseable message: {}", connection_id, e);
                        }
                    },
                    Message::Close(frame) => {
                        clean = matches!(&frame, Some(f) if f.code == 1000 || f.code == 1001);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("connection {} closed, clean={}", connection_id, clean);
    server::handle_close(&state, connection_id, clean).await;
}
