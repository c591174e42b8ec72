//! Accepts client WebSocket connections and runs one relay session per socket.

use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, future};
use relay_core::{CloseReason, Frame, FrameSink, FrameStream, RelayError, RelaySession};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Relays one client connection until either side goes away.
///
/// Every accepted socket gets its own upstream connection; nothing is pooled
/// or shared with other sessions.
#[instrument(name = "relay_session", skip_all, fields(session_id = %Uuid::new_v4()))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected to relay");

    let (sink, stream) = split_socket(socket);
    let session = RelaySession::new(state.relay_settings.clone(), sink, stream);
    let summary = session.run(state.connector.as_ref()).await;

    info!(
        to_upstream = summary.to_upstream,
        to_downstream = summary.to_downstream,
        dropped = summary.dropped,
        final_state = ?summary.final_state,
        "Relay session finished"
    );
}

/// Adapts an axum socket into the relay's frame sink and stream.
pub(crate) fn split_socket(socket: WebSocket) -> (FrameSink, FrameStream) {
    let (socket_tx, socket_rx) = socket.split();

    let sink: FrameSink = Box::pin(
        socket_tx
            .sink_map_err(RelayError::transport)
            .with(|frame: Frame| future::ready(Ok::<_, RelayError>(into_message(frame)))),
    );
    let stream: FrameStream =
        Box::pin(socket_rx.map(|msg| msg.map(from_message).map_err(RelayError::transport)));

    (sink, stream)
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

fn from_message(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
            code: f.code,
            reason: f.reason.as_str().to_owned(),
        })),
    }
}
