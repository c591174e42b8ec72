//! Opens the upstream WebSocket connection to the OpenAI Realtime API.

use crate::config::Config;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use relay_core::{
    CloseReason, Frame, FrameSink, FrameStream, RelayError, UpstreamConnector, UpstreamLink,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::HeaderValue,
        protocol::{CloseFrame, Message as WsMessage, frame::coding::CloseCode},
    },
};
use tracing::debug;

/// Connects to the realtime endpoint with the configured credential.
pub struct OpenAIConnector {
    config: Arc<Config>,
}

/// Installs `ring` as the process-wide TLS crypto provider for `wss://`
/// upstreams. Safe to call more than once.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("TLS crypto provider already installed");
    }
}

impl OpenAIConnector {
    pub fn new(config: Arc<Config>) -> Self {
        install_crypto_provider();
        Self { config }
    }

    /// Builds the handshake request with the bearer credential and the
    /// protocol-version header attached.
    pub fn request(&self) -> Result<Request, RelayError> {
        let url = self.config.upstream_url();
        let mut request = url
            .into_client_request()
            .map_err(|e| RelayError::Connect(e.to_string()))?;

        let mut authorization = HeaderValue::from_str(&format!(
            "Bearer {}",
            self.config.openai_api_key.expose_secret()
        ))
        .map_err(|e| RelayError::Connect(format!("invalid credential: {}", e)))?;
        authorization.set_sensitive(true);
        let beta = HeaderValue::from_str(&self.config.openai_beta)
            .map_err(|e| RelayError::Connect(format!("invalid OpenAI-Beta header: {}", e)))?;

        request.headers_mut().insert("Authorization", authorization);
        request.headers_mut().insert("OpenAI-Beta", beta);
        Ok(request)
    }
}

#[async_trait]
impl UpstreamConnector for OpenAIConnector {
    async fn connect(&self) -> Result<UpstreamLink, RelayError> {
        let request = self.request()?;
        debug!(url = %request.uri(), "Connecting to upstream realtime API");

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        debug!(status = %response.status(), "Upstream handshake complete");

        let (upstream_tx, upstream_rx) = ws_stream.split();
        let sink: FrameSink = Box::pin(
            upstream_tx
                .sink_map_err(RelayError::transport)
                .with(|frame: Frame| future::ready(Ok::<_, RelayError>(into_message(frame)))),
        );
        let stream: FrameStream = Box::pin(upstream_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => from_message(msg).map(Ok),
                Err(e) => Some(Err(RelayError::transport(e))),
            })
        }));

        Ok(UpstreamLink { sink, stream })
    }
}

fn into_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Binary(data) => WsMessage::Binary(data),
        Frame::Ping(data) => WsMessage::Ping(data),
        Frame::Pong(data) => WsMessage::Pong(data),
        Frame::Close(reason) => WsMessage::Close(reason.map(|r| CloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

/// Raw frames only appear when writing, so they are skipped on read.
fn from_message(msg: WsMessage) -> Option<Frame> {
    match msg {
        WsMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        WsMessage::Binary(data) => Some(Frame::Binary(data)),
        WsMessage::Ping(data) => Some(Frame::Ping(data)),
        WsMessage::Pong(data) => Some(Frame::Pong(data)),
        WsMessage::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned(),
        }))),
        WsMessage::Frame(_) => None,
    }
}
