//! The per-connection relay session.
//!
//! A [`RelaySession`] owns both halves of one client connection and, once the
//! upstream handshake completes, both halves of the paired upstream
//! connection. It runs as a single task reacting to four events: upstream
//! ready, a message from upstream, a message from the client, and a close or
//! error on either side. Nothing is shared between sessions except the
//! read-only [`RelaySettings`].

use crate::{
    error::RelayError,
    frame::{CloseReason, Frame, FrameSink, FrameStream},
    protocol::{EventKind, RelayNotice, SessionUpdate},
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Number of characters of a malformed message echoed into the log.
const PREVIEW_CHARS: usize = 100;

/// Lifecycle of a session. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    AwaitingUpstreamReady,
    Relaying,
    Closing,
    Closed,
}

/// Both halves of an established upstream connection.
pub struct UpstreamLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens the upstream connection for a session.
///
/// The returned future resolves once the upstream handshake has completed,
/// which is the session's "upstream ready" event.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self) -> Result<UpstreamLink, RelayError>;
}

/// Process-wide, read-only inputs shared by every session.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub session_update: SessionUpdate,
    /// `None` waits for the upstream handshake indefinitely.
    pub connect_timeout: Option<Duration>,
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub to_upstream: u64,
    pub to_downstream: u64,
    pub dropped: u64,
    pub final_state: SessionState,
}

/// The sending side of one connection, closed at most once.
struct Endpoint {
    name: &'static str,
    sink: FrameSink,
    closed: bool,
    peer_closed: bool,
}

impl Endpoint {
    fn new(name: &'static str, sink: FrameSink) -> Self {
        Self {
            name,
            sink,
            closed: false,
            peer_closed: false,
        }
    }

    /// Sends a text frame. Sends on a closed endpoint are discarded.
    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        if self.closed || self.peer_closed {
            debug!(endpoint = self.name, "Discarding send on closed connection");
            return Ok(());
        }
        self.sink.send(Frame::Text(text)).await
    }

    /// Records that the peer already started the closing handshake. A later
    /// [`Endpoint::close`] then only flushes the sink, which lets the
    /// WebSocket library deliver its queued close reply.
    fn peer_closed(&mut self) {
        self.peer_closed = true;
    }

    /// Sends a normal close frame unless the peer closed first, then shuts
    /// the sink down. No-op when the endpoint is already closed.
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.peer_closed {
            if let Err(e) = self
                .sink
                .send(Frame::Close(Some(CloseReason::normal())))
                .await
            {
                debug!(endpoint = self.name, error = %e, "Close frame not sent");
            }
        }
        if let Err(e) = self.sink.close().await {
            debug!(endpoint = self.name, error = %e, "Sink close failed");
        }
    }
}

/// Why a session is tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    DownstreamClosed,
    DownstreamError,
    UpstreamClosed,
    UpstreamError,
}

enum Event {
    UpstreamReady(Result<UpstreamLink, RelayError>),
    Downstream(Option<Result<Frame, RelayError>>),
    Upstream(Option<Result<Frame, RelayError>>),
}

/// One client connection paired with one upstream connection.
pub struct RelaySession {
    settings: Arc<RelaySettings>,
    state: SessionState,
    downstream: Endpoint,
    downstream_rx: FrameStream,
    to_upstream: u64,
    to_downstream: u64,
    dropped: u64,
}

impl RelaySession {
    /// Creates a session for an accepted client connection.
    pub fn new(settings: Arc<RelaySettings>, sink: FrameSink, stream: FrameStream) -> Self {
        Self {
            settings,
            state: SessionState::Connecting,
            downstream: Endpoint::new("client", sink),
            downstream_rx: stream,
            to_upstream: 0,
            to_downstream: 0,
            dropped: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion.
    ///
    /// Calls `connector` exactly once. Returns when both connections are
    /// closed; no error escapes the session.
    pub async fn run(mut self, connector: &dyn UpstreamConnector) -> SessionSummary {
        let Some(link) = self.await_upstream(connector).await else {
            return self.finish();
        };

        let mut upstream = Endpoint::new("upstream", link.sink);
        let mut upstream_rx = link.stream;

        let cause = match self.start_relaying(&mut upstream).await {
            Ok(()) => self.relay(&mut upstream, &mut upstream_rx).await,
            Err(cause) => cause,
        };
        self.teardown(cause, Some(&mut upstream)).await;
        self.finish()
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(next >= self.state, "session state moved backwards");
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "Session state changed");
            self.state = next;
        }
    }

    fn finish(mut self) -> SessionSummary {
        self.transition(SessionState::Closed);
        SessionSummary {
            to_upstream: self.to_upstream,
            to_downstream: self.to_downstream,
            dropped: self.dropped,
            final_state: self.state,
        }
    }

    /// Waits for the upstream handshake while watching the client. Returns
    /// `None` when the session ended before upstream became ready.
    async fn await_upstream(&mut self, connector: &dyn UpstreamConnector) -> Option<UpstreamLink> {
        let timeout = self.settings.connect_timeout;
        let connect = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, connector.connect())
                    .await
                    .unwrap_or_else(|_| Err(RelayError::ConnectTimeout(limit))),
                None => connector.connect().await,
            }
        };
        tokio::pin!(connect);
        self.transition(SessionState::AwaitingUpstreamReady);

        loop {
            let event = tokio::select! {
                result = &mut connect => Event::UpstreamReady(result),
                frame = self.downstream_rx.next() => Event::Downstream(frame),
            };

            match event {
                Event::UpstreamReady(Ok(link)) => {
                    info!("Connected to upstream realtime API");
                    return Some(link);
                }
                Event::UpstreamReady(Err(e)) => {
                    error!(error = %e, "Upstream connection failed");
                    self.teardown(Teardown::UpstreamError, None).await;
                    return None;
                }
                Event::Downstream(Some(Ok(Frame::Ping(_) | Frame::Pong(_)))) => {}
                Event::Downstream(Some(Ok(Frame::Close(reason)))) => {
                    info!(?reason, "Client disconnected before upstream was ready");
                    self.teardown(Teardown::DownstreamClosed, None).await;
                    return None;
                }
                Event::Downstream(Some(Ok(_))) => {
                    warn!("Dropping client message received before upstream was ready");
                    self.dropped += 1;
                }
                Event::Downstream(Some(Err(e))) => {
                    error!(error = %e, "Client connection error");
                    self.teardown(Teardown::DownstreamError, None).await;
                    return None;
                }
                Event::Downstream(None) => {
                    info!("Client disconnected before upstream was ready");
                    self.teardown(Teardown::DownstreamClosed, None).await;
                    return None;
                }
                Event::Upstream(_) => unreachable!("upstream stream is not polled while connecting"),
            }
        }
    }

    /// Dispatches the configuration message upstream, then tells the client
    /// relaying may begin.
    async fn start_relaying(&mut self, upstream: &mut Endpoint) -> Result<(), Teardown> {
        let payload = self.settings.session_update.to_json().map_err(|e| {
            error!(error = %e, "Failed to serialize session configuration");
            Teardown::UpstreamError
        })?;
        upstream.send_text(payload).await.map_err(|e| {
            error!(error = %e, "Failed to send session configuration upstream");
            Teardown::UpstreamError
        })?;
        self.transition(SessionState::Relaying);

        self.notify(RelayNotice::ready()).await.map_err(|e| {
            warn!(error = %e, "Failed to send ready notification to client");
            Teardown::DownstreamError
        })
    }

    /// Forwards messages in both directions until either side closes or fails.
    async fn relay(&mut self, upstream: &mut Endpoint, upstream_rx: &mut FrameStream) -> Teardown {
        loop {
            let event = tokio::select! {
                frame = self.downstream_rx.next() => Event::Downstream(frame),
                frame = upstream_rx.next() => Event::Upstream(frame),
            };

            let outcome = match event {
                Event::Downstream(frame) => self.on_downstream(frame, upstream).await,
                Event::Upstream(frame) => self.on_upstream(frame).await,
                Event::UpstreamReady(_) => unreachable!("upstream is already connected"),
            };
            if let Err(cause) = outcome {
                return cause;
            }
        }
    }

    async fn on_downstream(
        &mut self,
        frame: Option<Result<Frame, RelayError>>,
        upstream: &mut Endpoint,
    ) -> Result<(), Teardown> {
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                error!(error = %e, "Client connection error");
                return Err(Teardown::DownstreamError);
            }
            None => {
                info!("Client disconnected");
                return Err(Teardown::DownstreamClosed);
            }
        };
        if let Frame::Close(reason) = &frame {
            info!(?reason, "Client disconnected");
            return Err(Teardown::DownstreamClosed);
        }
        let Some(text) = frame.text() else {
            return Ok(());
        };

        match EventKind::parse(&text) {
            Ok(EventKind::AudioAppend) => debug!("Audio data received from client"),
            Ok(kind) => debug!(event_type = kind.type_name(), "Client -> upstream"),
            Err(e) => {
                warn!(error = %e, preview = %preview(&text), "Dropping malformed client message");
                self.dropped += 1;
                return Ok(());
            }
        }

        upstream.send_text(text.into_owned()).await.map_err(|e| {
            error!(error = %e, "Failed to forward client message upstream");
            Teardown::UpstreamError
        })?;
        self.to_upstream += 1;
        Ok(())
    }

    async fn on_upstream(&mut self, frame: Option<Result<Frame, RelayError>>) -> Result<(), Teardown> {
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                error!(error = %e, "Upstream connection error");
                return Err(Teardown::UpstreamError);
            }
            None => {
                info!("Upstream connection closed");
                return Err(Teardown::UpstreamClosed);
            }
        };
        if let Frame::Close(reason) = &frame {
            info!(?reason, "Upstream connection closed");
            return Err(Teardown::UpstreamClosed);
        }
        let Some(text) = frame.text() else {
            return Ok(());
        };

        match EventKind::parse(&text) {
            Ok(kind) => log_upstream_event(&kind),
            Err(_) => debug!(preview = %preview(&text), "Forwarding non-JSON upstream message"),
        }

        self.downstream.send_text(text.into_owned()).await.map_err(|e| {
            warn!(error = %e, "Failed to forward upstream message to client");
            Teardown::DownstreamError
        })?;
        self.to_downstream += 1;
        Ok(())
    }

    async fn notify(&mut self, notice: RelayNotice) -> Result<(), RelayError> {
        let payload = notice.to_json()?;
        self.downstream.send_text(payload).await
    }

    /// Closes whatever is still open. Upstream failures are reported to the
    /// client before its connection is closed.
    async fn teardown(&mut self, cause: Teardown, upstream: Option<&mut Endpoint>) {
        self.transition(SessionState::Closing);
        debug!(?cause, "Tearing down session");

        match cause {
            Teardown::UpstreamError | Teardown::UpstreamClosed => {
                if cause == Teardown::UpstreamError {
                    if let Err(e) = self.notify(RelayNotice::upstream_error()).await {
                        debug!(error = %e, "Error notification not delivered");
                    }
                }
                if let Err(e) = self.notify(RelayNotice::closed()).await {
                    debug!(error = %e, "Close notification not delivered");
                }
                if let Some(upstream) = upstream {
                    if cause == Teardown::UpstreamClosed {
                        upstream.peer_closed();
                    }
                    upstream.close().await;
                }
                self.downstream.close().await;
            }
            Teardown::DownstreamClosed | Teardown::DownstreamError => {
                self.downstream.peer_closed();
                if let Some(upstream) = upstream {
                    upstream.close().await;
                }
                self.downstream.close().await;
            }
        }
    }
}

fn log_upstream_event(kind: &EventKind) {
    match kind {
        EventKind::SpeechStarted => info!("Speech started"),
        EventKind::SpeechStopped => info!("Speech stopped"),
        EventKind::TranscriptDone { transcript } => info!(
            transcript = transcript.as_deref().unwrap_or_default(),
            "Assistant response transcript"
        ),
        other => debug!(event_type = other.type_name(), "Upstream -> client"),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionConfig;
    use bytes::Bytes;
    use futures::{FutureExt, channel::mpsc};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// The far side of a channel-backed connection.
    struct Peer {
        inbound: mpsc::UnboundedSender<Result<Frame, RelayError>>,
        outbound: mpsc::UnboundedReceiver<Frame>,
    }

    impl Peer {
        fn send(&self, frame: Frame) {
            self.inbound.unbounded_send(Ok(frame)).unwrap();
        }

        fn send_text(&self, text: &str) {
            self.send(Frame::Text(text.to_string()));
        }

        fn fail(&self, message: &str) {
            self.inbound
                .unbounded_send(Err(RelayError::transport(message)))
                .unwrap();
        }

        async fn recv(&mut self) -> Option<Frame> {
            tokio::time::timeout(Duration::from_secs(2), self.outbound.next())
                .await
                .expect("timed out waiting for a frame")
        }

        async fn recv_notice(&mut self) -> RelayNotice {
            match self.recv().await {
                Some(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected a notice, got {:?}", other),
            }
        }
    }

    fn channel_connection() -> (FrameSink, FrameStream, Peer) {
        let (out_tx, out_rx) = mpsc::unbounded::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded::<Result<Frame, RelayError>>();
        let sink: FrameSink = Box::pin(out_tx.sink_map_err(RelayError::transport));
        let stream: FrameStream = Box::pin(in_rx);
        (
            sink,
            stream,
            Peer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    fn settings(connect_timeout: Option<Duration>) -> Arc<RelaySettings> {
        Arc::new(RelaySettings {
            session_update: SessionUpdate::new(SessionConfig::with_instructions("Be brief.")),
            connect_timeout,
        })
    }

    fn connected_mock() -> (MockUpstreamConnector, Peer) {
        let (sink, stream, peer) = channel_connection();
        let mut connector = MockUpstreamConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move || Ok(UpstreamLink { sink, stream }));
        (connector, peer)
    }

    fn spawn_session(
        settings: Arc<RelaySettings>,
        connector: impl UpstreamConnector + 'static,
    ) -> (tokio::task::JoinHandle<SessionSummary>, Peer) {
        let (sink, stream, client) = channel_connection();
        let session = RelaySession::new(settings, sink, stream);
        assert_eq!(session.state(), SessionState::Connecting);
        let handle = tokio::spawn(async move { session.run(&connector).await });
        (handle, client)
    }

    /// Hands out its link only when the test opens the gate.
    struct GatedConnector {
        gate: Mutex<Option<oneshot::Receiver<UpstreamLink>>>,
    }

    #[async_trait]
    impl UpstreamConnector for GatedConnector {
        async fn connect(&self) -> Result<UpstreamLink, RelayError> {
            let gate = self.gate.lock().unwrap().take();
            match gate {
                Some(rx) => rx.await.map_err(RelayError::transport),
                None => Err(RelayError::Connect("connect called twice".to_string())),
            }
        }
    }

    struct PendingConnector;

    #[async_trait]
    impl UpstreamConnector for PendingConnector {
        async fn connect(&self) -> Result<UpstreamLink, RelayError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_config_dispatched_before_ready() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);

        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        // The configuration must already be queued upstream by the time the
        // client hears "ready".
        let config = upstream.outbound.next().now_or_never().unwrap().unwrap();
        let Frame::Text(config) = config else {
            panic!("configuration was not a text frame");
        };
        let expected = SessionUpdate::new(SessionConfig::with_instructions("Be brief."))
            .to_json()
            .unwrap();
        assert_eq!(config, expected);

        drop(client.inbound);
        let summary = handle.await.unwrap();
        assert_eq!(summary.final_state, SessionState::Closed);
        assert_eq!(summary.to_upstream, 0);
    }

    #[tokio::test]
    async fn test_config_never_sent_to_client() {
        let (connector, upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);

        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.send(Frame::Close(None));

        assert_eq!(client.recv_notice().await, RelayNotice::closed());
        assert!(matches!(client.recv().await, Some(Frame::Close(_))));
        assert_eq!(client.recv().await, None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_upstream_messages_pass_through_verbatim() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);
        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.recv().await.unwrap();

        let transcript = r#"{"type":"response.audio_transcript.done","transcript":"merhaba"}"#;
        upstream.send_text(transcript);
        assert_eq!(client.recv().await, Some(Frame::Text(transcript.to_string())));

        // Spacing and key order survive because nothing is re-encoded.
        let spaced = r#"{ "type" : "input_audio_buffer.speech_started", "audio_start_ms": 10 }"#;
        upstream.send_text(spaced);
        assert_eq!(client.recv().await, Some(Frame::Text(spaced.to_string())));

        upstream.send_text("not-json");
        assert_eq!(client.recv().await, Some(Frame::Text("not-json".to_string())));

        upstream.send(Frame::Binary(Bytes::from_static(b"{\"type\":\"response.done\"}")));
        assert_eq!(
            client.recv().await,
            Some(Frame::Text("{\"type\":\"response.done\"}".to_string()))
        );

        upstream.send(Frame::Ping(Bytes::from_static(b"p")));
        drop(client.inbound);
        let summary = handle.await.unwrap();
        assert_eq!(summary.to_downstream, 4);
    }

    #[tokio::test]
    async fn test_malformed_client_message_is_dropped() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);
        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.recv().await.unwrap();

        let append = r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#;
        client.send_text("not-json");
        client.send_text(append);

        assert_eq!(upstream.recv().await, Some(Frame::Text(append.to_string())));

        drop(client.inbound);
        let summary = handle.await.unwrap();
        assert_eq!(summary.to_upstream, 1);
        assert_eq!(summary.dropped, 1);
        assert!(matches!(upstream.recv().await, Some(Frame::Close(_))));
        assert_eq!(upstream.recv().await, None);
    }

    #[tokio::test]
    async fn test_client_binary_frame_forwarded_as_text() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);
        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.recv().await.unwrap();

        client.send(Frame::Binary(Bytes::from_static(b"{\"type\":\"response.create\"}")));
        assert_eq!(
            upstream.recv().await,
            Some(Frame::Text("{\"type\":\"response.create\"}".to_string()))
        );

        client.send(Frame::Close(Some(CloseReason::normal())));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_closes_upstream() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);
        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.recv().await.unwrap();

        client.send(Frame::Close(Some(CloseReason {
            code: 1001,
            reason: "going away".to_string(),
        })));

        assert_eq!(
            upstream.recv().await,
            Some(Frame::Close(Some(CloseReason::normal())))
        );
        assert_eq!(upstream.recv().await, None);

        let summary = handle.await.unwrap();
        assert_eq!(summary.final_state, SessionState::Closed);
        // The client initiated the close, so nothing more is sent to it.
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_client_error_closes_upstream() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);
        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.recv().await.unwrap();

        client.fail("connection reset");

        assert!(matches!(upstream.recv().await, Some(Frame::Close(_))));
        assert_eq!(upstream.recv().await, None);
        assert_eq!(handle.await.unwrap().final_state, SessionState::Closed);
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_upstream_close_closes_client() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);
        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.recv().await.unwrap();

        drop(upstream.inbound);

        assert_eq!(client.recv_notice().await, RelayNotice::closed());
        assert_eq!(
            client.recv().await,
            Some(Frame::Close(Some(CloseReason::normal())))
        );
        assert_eq!(client.recv().await, None);
        assert_eq!(handle.await.unwrap().final_state, SessionState::Closed);
        // Upstream closed first, so no close frame is echoed back to it.
        assert_eq!(upstream.outbound.next().await, None);
    }

    #[tokio::test]
    async fn test_upstream_error_notifies_client_once() {
        let (connector, mut upstream) = connected_mock();
        let (handle, mut client) = spawn_session(settings(None), connector);
        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        upstream.recv().await.unwrap();

        upstream.fail("tls alert");
        upstream.send_text(r#"{"type":"late"}"#);

        assert_eq!(client.recv_notice().await, RelayNotice::upstream_error());
        assert_eq!(client.recv_notice().await, RelayNotice::closed());
        assert!(matches!(client.recv().await, Some(Frame::Close(_))));
        assert_eq!(client.recv().await, None);

        let summary = handle.await.unwrap();
        assert_eq!(summary.to_downstream, 0);
        assert!(matches!(upstream.recv().await, Some(Frame::Close(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_notifies_client() {
        let mut connector = MockUpstreamConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Err(RelayError::Connect("HTTP error: 401 Unauthorized".to_string())));
        let (handle, mut client) = spawn_session(settings(None), connector);

        assert_eq!(client.recv_notice().await, RelayNotice::upstream_error());
        assert_eq!(client.recv_notice().await, RelayNotice::closed());
        assert!(matches!(client.recv().await, Some(Frame::Close(_))));
        assert_eq!(client.recv().await, None);
        assert_eq!(handle.await.unwrap().final_state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_timeout_notifies_client() {
        let (handle, mut client) =
            spawn_session(settings(Some(Duration::from_millis(20))), PendingConnector);

        assert_eq!(client.recv_notice().await, RelayNotice::upstream_error());
        assert_eq!(client.recv_notice().await, RelayNotice::closed());
        assert_eq!(handle.await.unwrap().final_state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_client_close_while_connecting_cancels_connect() {
        let (handle, mut client) = spawn_session(settings(None), PendingConnector);

        client.send(Frame::Close(None));

        let summary = handle.await.unwrap();
        assert_eq!(summary.final_state, SessionState::Closed);
        assert_eq!(summary.to_upstream, 0);
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_client_messages_before_ready_are_dropped() {
        let (gate_tx, gate_rx) = oneshot::channel();
        let connector = GatedConnector {
            gate: Mutex::new(Some(gate_rx)),
        };
        let (handle, mut client) = spawn_session(settings(None), connector);

        client.send_text(r#"{"type":"input_audio_buffer.append","audio":"early"}"#);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (sink, stream, mut upstream) = channel_connection();
        gate_tx.send(UpstreamLink { sink, stream }).ok().unwrap();

        assert_eq!(client.recv_notice().await, RelayNotice::ready());
        let Some(Frame::Text(config)) = upstream.recv().await else {
            panic!("expected configuration frame");
        };
        assert!(config.starts_with("{\"type\":\"session.update\""));

        let late = r#"{"type":"input_audio_buffer.append","audio":"late"}"#;
        client.send_text(late);
        assert_eq!(upstream.recv().await, Some(Frame::Text(late.to_string())));

        drop(client.inbound);
        let summary = handle.await.unwrap();
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.to_upstream, 1);
    }

    #[tokio::test]
    async fn test_endpoint_close_is_idempotent() {
        let (sink, _stream, mut peer) = channel_connection();
        let mut endpoint = Endpoint::new("client", sink);

        endpoint.close().await;
        endpoint.close().await;
        endpoint.send_text("after close".to_string()).await.unwrap();

        assert_eq!(
            peer.recv().await,
            Some(Frame::Close(Some(CloseReason::normal())))
        );
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_endpoint_close_after_peer_closed_only_shuts_sink() {
        let (sink, _stream, mut peer) = channel_connection();
        let mut endpoint = Endpoint::new("upstream", sink);

        endpoint.peer_closed();
        endpoint.send_text("after peer close".to_string()).await.unwrap();
        endpoint.close().await;

        // The sink is shut down while the endpoint is still alive, and no
        // second close frame goes out.
        assert_eq!(peer.recv().await, None);
        assert!(endpoint.closed);
    }
}
