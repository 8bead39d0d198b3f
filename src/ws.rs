// src/ws.rs
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::broadcast;
use warp::Filter;

use crate::bridge::{Bridge, Delivery};
use crate::error::NfcError;
use crate::types::{IncomingMessage, OutgoingMessage, SessionResult, StartRequest};

impl From<Delivery> for OutgoingMessage {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Result(SessionResult::Success(data)) => {
                OutgoingMessage::SESSION_SUCCESS { data }
            }
            Delivery::Result(SessionResult::Failure(kind, error)) => {
                OutgoingMessage::SESSION_FAILED {
                    code: kind.code().to_string(),
                    error,
                }
            }
            Delivery::ContinuousEvent(data) => OutgoingMessage::TAG_EVENT { data },
        }
    }
}

/// Objects are written as their JSON text, strings as they are.
pub fn payload_from_json(data: Value) -> Result<String, NfcError> {
    match data {
        Value::Object(_) => Ok(data.to_string()),
        Value::String(text) => Ok(text),
        _ => Err(NfcError::invalid_args("Data must be a Map or String")),
    }
}

/// Answers one client request. Blocks on the bridge, so run it off the runtime.
pub fn respond(bridge: &Bridge, message: IncomingMessage) -> OutgoingMessage {
    match message {
        IncomingMessage::IS_AVAILABLE => OutgoingMessage::AVAILABILITY {
            available: bridge.is_available(),
        },
        IncomingMessage::GET_READER_STATUS => OutgoingMessage::READER_STATUS {
            success: bridge.is_available(),
        },
        IncomingMessage::START_SESSION {
            is_reading,
            is_writing,
            data,
            continuous,
        } => {
            let data = match data.map(payload_from_json).transpose() {
                Ok(data) => data,
                Err(e) => return OutgoingMessage::session_error(&e),
            };
            let request = StartRequest {
                is_reading,
                is_writing,
                data,
                continuous,
            };
            match bridge.start_session(request) {
                Ok(()) => OutgoingMessage::SESSION_STARTED,
                Err(e) => OutgoingMessage::session_error(&e),
            }
        }
        IncomingMessage::STOP_SESSION => {
            bridge.stop_session();
            OutgoingMessage::SESSION_STOPPED
        }
    }
}

pub async fn start_server(
    bridge: Bridge,
    events: broadcast::Sender<OutgoingMessage>,
    addr: SocketAddr,
) {
    // Matches root path "/"
    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let bridge = bridge.clone();
            let events = events.clone();
            ws.on_upgrade(move |socket| handle_connection(socket, bridge, events))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{addr}");
    warp::serve(routes).run(addr).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    bridge: Bridge,
    events: broadcast::Sender<OutgoingMessage>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = events.subscribe();
    debug!("WebSocket client connected");

    // Broadcasts -> Client
    tokio::spawn(async move {
        loop {
            let msg = match rx_broadcast.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagging, {skipped} messages skipped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode {msg:?}: {e}");
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Client -> Bridge
    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket receive error: {e}");
                break;
            }
        };
        let Ok(text) = msg.to_str() else {
            continue;
        };
        let parsed = match serde_json::from_str::<IncomingMessage>(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring malformed message {text:?}: {e}");
                continue;
            }
        };

        let bridge = bridge.clone();
        match tokio::task::spawn_blocking(move || respond(&bridge, parsed)).await {
            Ok(reply) => {
                let _ = events.send(reply);
            }
            Err(e) => error!("Request handler panicked: {e}"),
        }
    }

    debug!("WebSocket client disconnected");
}
