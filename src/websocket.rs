//! # Recording Session Gateway
//!
//! WebSocket endpoint at `/ws`. One connection is one recording session.
//!
//! ## WebSocket Protocol:
//! - **Client → Server**: binary frames are audio chunks; the text frame
//!   `"STOP"` ends the recording. Any other text is ignored and logged.
//! - **Server → Client**: UTF-8 text frames, one per log line, in the order
//!   the pipeline produced them.
//! - **Close**: the server closes the socket once the session is recorded
//!   (normal close), when the recording grows too large, or when history
//!   cannot be written.
//!
//! ## Session States:
//! `Open` (accepting chunks) → `Finalizing` (stop received, worker draining)
//! → `Closed`. A connection that drops while `Open` is abandoned: its buffer
//! is discarded, its worker aborted, and nothing reaches history.

use crate::audio::session::SessionError;
use crate::audio::{AudioSession, SessionState};
use crate::error::AppError;
use crate::pipeline::{PipelineJob, SessionOutcome, SessionWorker, WorkerEvent};
use crate::state::{AppState, SessionEvent};

use actix::prelude::*;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Text frame that ends a recording.
pub const STOP_SENTINEL: &str = "STOP";

/// What an incoming WebSocket message means for the session.
#[derive(Debug, PartialEq)]
pub enum InboundFrame {
    Chunk(Bytes),
    Stop,
    Ping(Bytes),
    Pong,
    Close(Option<ws::CloseReason>),
    Malformed(String),
    Ignored,
}

pub fn classify(msg: ws::Message) -> InboundFrame {
    match msg {
        ws::Message::Binary(data) => InboundFrame::Chunk(data),
        ws::Message::Text(text) if text.trim() == STOP_SENTINEL => InboundFrame::Stop,
        ws::Message::Text(text) => {
            InboundFrame::Malformed(format!("unexpected text frame ({} bytes)", text.len()))
        }
        ws::Message::Ping(data) => InboundFrame::Ping(data),
        ws::Message::Pong(_) => InboundFrame::Pong,
        ws::Message::Close(reason) => InboundFrame::Close(reason),
        ws::Message::Continuation(_) => {
            InboundFrame::Malformed("fragmented frames are not supported".to_string())
        }
        ws::Message::Nop => InboundFrame::Ignored,
    }
}

/// Actor owning one recording session.
///
/// Frames are handled on the actor; pipeline work runs on a separate
/// [`SessionWorker`] task fed through an unbounded queue, so a slow pipeline
/// never stalls frame ingestion. Worker output comes back as a stream of
/// [`WorkerEvent`]s attached to this actor's context, which preserves order.
pub struct SessionGateway {
    state: web::Data<AppState>,
    session: AudioSession,
    jobs: Option<mpsc::UnboundedSender<PipelineJob>>,
    worker: Option<JoinHandle<()>>,
    last_heartbeat: Instant,
}

impl SessionGateway {
    pub fn new(state: web::Data<AppState>, session_id: String) -> Self {
        let max_bytes = state.get_config().audio.max_session_bytes;
        Self {
            session: AudioSession::new(session_id, max_bytes),
            state,
            jobs: None,
            worker: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn session_id(&self) -> &str {
        &self.session.session_id
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let config = &self.state.get_config().websocket;
        let interval = Duration::from_secs(config.heartbeat_interval_secs);
        let timeout = Duration::from_secs(config.client_timeout_secs);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(session_id = %act.session_id(), "Heartbeat timeout, dropping connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_chunk(&mut self, data: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        match self.session.accept_chunk(&data) {
            Ok(receipt) => {
                self.state.record_session_event(SessionEvent::BytesReceived(receipt.len));
                self.state.sessions.update(&self.session);
                debug!(
                    session_id = %self.session_id(),
                    index = receipt.index,
                    len = receipt.len,
                    total = receipt.total_bytes,
                    "Chunk received"
                );

                let feedback = self.state.get_config().pipeline.per_chunk_feedback;
                if feedback && receipt.len > 0 {
                    if let Some(jobs) = &self.jobs {
                        let _ = jobs.send(PipelineJob::Chunk {
                            index: receipt.index,
                            data,
                        });
                    }
                }
            }
            Err(SessionError::Capacity(err)) => {
                warn!(session_id = %self.session_id(), error = %err, "Recording too large");
                self.abandon("recording exceeded size limit");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Size,
                    description: Some("recording too large".to_string()),
                }));
                ctx.stop();
            }
            Err(err) => self.reject(&err.to_string()),
        }
    }

    fn handle_stop(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let artifact = match self.session.begin_finalize() {
            Ok(artifact) => artifact,
            Err(err) => {
                self.reject(&err.to_string());
                return;
            }
        };

        if artifact.is_empty() {
            warn!(session_id = %self.session_id(), chunks = artifact.chunk_count, "Stop received with no audio");
        } else {
            info!(
                session_id = %self.session_id(),
                chunks = artifact.chunk_count,
                bytes = artifact.len(),
                "Stop received, finalizing"
            );
        }
        self.state.sessions.update(&self.session);

        // Dropping the sender after the finalize job lets the worker finish its queue and exit.
        let queued = self
            .jobs
            .take()
            .map(|jobs| jobs.send(PipelineJob::Finalize(artifact)).is_ok())
            .unwrap_or(false);

        if queued {
            // Counted at stop; the client may be gone before the worker finishes.
            self.state.record_session_event(SessionEvent::Finalized);
        } else {
            error!(session_id = %self.session_id(), "Session worker is gone, cannot finalize");
            self.session.close();
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Error,
                description: Some("session worker unavailable".to_string()),
            }));
            ctx.stop();
        }
    }

    fn reject(&self, reason: &str) {
        self.state.record_session_event(SessionEvent::FrameRejected);
        warn!(
            session_id = %self.session_id(),
            state = %self.session.state(),
            reason,
            "Frame rejected"
        );
    }

    /// Drop the session without recording it.
    fn abandon(&mut self, reason: &str) {
        let discarded = self.session.abandon();
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.state.record_session_event(SessionEvent::Abandoned);
        warn!(session_id = %self.session_id(), discarded_bytes = discarded, reason, "Session abandoned");
    }

    fn finish(&mut self, outcome: SessionOutcome, ctx: &mut ws::WebsocketContext<Self>) {
        self.session.close();
        self.worker = None;

        let reason = match &outcome.store_error {
            None => ws::CloseReason {
                code: ws::CloseCode::Normal,
                description: Some("session finalized".to_string()),
            },
            Some(_) => ws::CloseReason {
                code: ws::CloseCode::Error,
                description: Some("history unavailable".to_string()),
            },
        };

        info!(
            session_id = %self.session_id(),
            recorded = outcome.is_recorded(),
            entry_id = ?outcome.entry_id,
            lines = outcome.lines_emitted,
            pipeline_failure = ?outcome.pipeline_failure,
            duration_ms = (Utc::now() - self.session.created_at).num_milliseconds(),
            "Session closed"
        );

        ctx.close(Some(reason));
        ctx.stop();
    }
}

impl Actor for SessionGateway {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id(), "Recording session opened");

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = SessionWorker::new(
            self.session.session_id.clone(),
            self.state.pipeline.clone(),
            self.state.history.clone(),
        )
        .with_artifacts(self.state.artifacts.clone());

        self.worker = Some(worker.spawn(job_rx, event_tx));
        self.jobs = Some(job_tx);
        ctx.add_stream(UnboundedReceiverStream::new(event_rx));

        self.state.record_session_event(SessionEvent::Opened);
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        match self.session.state() {
            SessionState::Open => self.abandon("connection closed before stop"),
            SessionState::Finalizing => {
                info!(session_id = %self.session_id(), "Client left during finalize, recording continues")
            }
            SessionState::Closed => {}
        }

        self.state.sessions.remove(&self.session.session_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionGateway {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                error!(session_id = %self.session_id(), error = %err, "WebSocket protocol error");
                ctx.stop();
                return;
            }
        };

        match classify(msg) {
            InboundFrame::Chunk(data) => {
                self.last_heartbeat = Instant::now();
                self.handle_chunk(data, ctx);
            }
            InboundFrame::Stop => {
                self.last_heartbeat = Instant::now();
                self.handle_stop(ctx);
            }
            InboundFrame::Ping(data) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            InboundFrame::Pong => {
                self.last_heartbeat = Instant::now();
            }
            InboundFrame::Close(reason) => {
                debug!(session_id = %self.session_id(), ?reason, "Client closed connection");
                ctx.stop();
            }
            InboundFrame::Malformed(reason) => self.reject(&reason),
            InboundFrame::Ignored => {}
        }
    }
}

impl StreamHandler<WorkerEvent> for SessionGateway {
    fn handle(&mut self, event: WorkerEvent, ctx: &mut Self::Context) {
        match event {
            WorkerEvent::Line(line) => {
                self.state.record_session_event(SessionEvent::LineForwarded);
                ctx.text(line);
            }
            WorkerEvent::Finished(outcome) => self.finish(outcome, ctx),
        }
    }

    // The default would stop the actor; the socket outlives the worker's event stream.
    fn finished(&mut self, ctx: &mut Self::Context) {
        if self.session.state() == SessionState::Finalizing {
            error!(session_id = %self.session_id(), "Session worker ended without finishing");
            self.session.close();
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Error,
                description: Some("session worker failed".to_string()),
            }));
            ctx.stop();
        }
    }
}

/// `GET /ws`: admit a new recording session and upgrade to WebSocket.
///
/// Admission happens before the handshake, so a full registry answers with
/// a plain 503 instead of an accepted-then-closed socket.
pub async fn session_gateway(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let session_id = match state.sessions.register() {
        Ok(id) => id,
        Err(err) => {
            state.record_session_event(SessionEvent::Refused);
            warn!(error = %err, "Refusing recording session");
            return Err(AppError::from(err).into());
        }
    };

    let peer = req.connection_info().peer_addr().map(str::to_owned);
    debug!(session_id = %session_id, ?peer, "WebSocket upgrade requested");

    let gateway = SessionGateway::new(state.clone(), session_id.clone());
    let response = ws::start(gateway, &req, stream);
    if response.is_err() {
        state.sessions.remove(&session_id);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::http::StatusCode;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::App;

    #[test]
    fn test_binary_frames_are_chunks() {
        let frame = classify(ws::Message::Binary(Bytes::from_static(b"\x1a\x45\xdf\xa3")));
        assert_eq!(frame, InboundFrame::Chunk(Bytes::from_static(b"\x1a\x45\xdf\xa3")));

        assert_eq!(
            classify(ws::Message::Binary(Bytes::new())),
            InboundFrame::Chunk(Bytes::new())
        );
    }

    #[test]
    fn test_stop_sentinel() {
        assert_eq!(classify(ws::Message::Text("STOP".into())), InboundFrame::Stop);
        assert_eq!(classify(ws::Message::Text(" STOP\n".into())), InboundFrame::Stop);
    }

    #[test]
    fn test_other_text_is_malformed() {
        for text in ["stop", "STOPPED", "{\"type\":\"stop\"}", ""] {
            assert!(
                matches!(classify(ws::Message::Text(text.into())), InboundFrame::Malformed(_)),
                "{:?} should be malformed",
                text
            );
        }
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(classify(ws::Message::Pong(Bytes::new())), InboundFrame::Pong);
        assert_eq!(classify(ws::Message::Nop), InboundFrame::Ignored);
        assert_eq!(classify(ws::Message::Close(None)), InboundFrame::Close(None));
        assert_eq!(
            classify(ws::Message::Ping(Bytes::from_static(b"hb"))),
            InboundFrame::Ping(Bytes::from_static(b"hb"))
        );
    }

    /// A plain GET without upgrade headers must not leak a registry slot.
    #[actix_web::test]
    async fn test_failed_upgrade_releases_slot() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        let app = init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws", web::get().to(session_gateway)),
        )
        .await;

        let resp = call_service(&app, TestRequest::get().uri("/ws").to_request()).await;
        assert!(resp.status().is_client_error());
        assert_eq!(state.sessions.active_count(), 0);
    }

    #[actix_web::test]
    async fn test_full_registry_refuses_with_503() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = web::Data::new(AppState::new(config).unwrap());
        state.sessions.register().unwrap();

        let app = init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws", web::get().to(session_gateway)),
        )
        .await;

        let resp = call_service(&app, TestRequest::get().uri("/ws").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().sessions.refused, 1);
    }
}

/// Sessions driven over a real socket.
#[cfg(test)]
mod socket_tests {
    use super::*;
    use crate::audio::AudioArtifact;
    use crate::config::AppConfig;
    use crate::pipeline::{LineStream, LogPipeline};
    use actix_web::App;
    use awc::ws::{CloseCode, CloseReason, Frame, Message};
    use futures_util::{stream, SinkExt, Stream, StreamExt};
    use std::sync::Arc;

    /// Finalize output arrives only after a delay, leaving the session in
    /// `Finalizing` long enough to send more frames.
    struct SlowFinalize;

    impl LogPipeline for SlowFinalize {
        fn name(&self) -> &str {
            "slow-finalize"
        }

        fn process_chunk(&self, index: usize, chunk: Bytes) -> LineStream {
            stream::once(async move { Ok(format!("chunk {} ({} bytes)", index, chunk.len())) }).boxed()
        }

        fn process_artifact(&self, artifact: Arc<AudioArtifact>) -> LineStream {
            stream::once(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(format!("artifact {} bytes", artifact.len()))
            })
            .boxed()
        }
    }

    fn start_server(state: web::Data<AppState>) -> actix_test::TestServer {
        actix_test::start(move || {
            App::new()
                .app_data(state.clone())
                .route("/ws", web::get().to(session_gateway))
        })
    }

    /// Text frames received until the server closes, plus its close reason.
    async fn read_until_close<S>(framed: &mut S) -> (Vec<String>, Option<CloseReason>)
    where
        S: Stream<Item = Result<Frame, awc::error::WsProtocolError>> + Unpin,
    {
        let mut lines = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), framed.next())
                .await
                .expect("server never closed the socket");
            match next {
                Some(Ok(Frame::Text(text))) => lines.push(String::from_utf8(text.to_vec()).unwrap()),
                Some(Ok(Frame::Close(reason))) => return (lines, reason),
                Some(Ok(_)) => {}
                Some(Err(err)) => panic!("protocol error: {}", err),
                None => return (lines, None),
            }
        }
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..150 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[actix_web::test]
    async fn test_recording_lines_in_order_then_normal_close() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        let mut srv = start_server(state.clone());
        let mut framed = srv.ws_at("/ws").await.unwrap();

        for size in [4096usize, 2048, 0] {
            framed.send(Message::Binary(Bytes::from(vec![7u8; size]))).await.unwrap();
        }
        framed.send(Message::Text("STOP".into())).await.unwrap();

        let (lines, close) = read_until_close(&mut framed).await;
        assert_eq!(lines.len(), 3, "{:?}", lines);
        assert!(lines[0].ends_with("Chunk 1 received (4096 bytes)"), "{}", lines[0]);
        assert!(lines[1].ends_with("Chunk 2 received (2048 bytes)"), "{}", lines[1]);
        assert!(lines[2].ends_with("Recording finalized: 3 chunks, 6144 bytes"), "{}", lines[2]);
        assert_eq!(close.map(|reason| reason.code), Some(CloseCode::Normal));

        let history = state.history.list_recent(5).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].contains("3 chunks, 6144 bytes"), "{}", history[0]);

        eventually("registry slot release", || state.sessions.active_count() == 0).await;
        let sessions = state.get_metrics_snapshot().sessions;
        assert_eq!(sessions.finalized, 1);
        assert_eq!(sessions.abandoned, 0);
        assert_eq!(sessions.bytes_received, 6144);
    }

    #[actix_web::test]
    async fn test_frames_after_stop_are_rejected() {
        let state = web::Data::new(
            AppState::with_pipeline(AppConfig::default(), Arc::new(SlowFinalize)).unwrap(),
        );
        let mut srv = start_server(state.clone());
        let mut framed = srv.ws_at("/ws").await.unwrap();

        framed.send(Message::Binary(Bytes::from_static(b"0123456789"))).await.unwrap();
        framed.send(Message::Text("STOP".into())).await.unwrap();
        framed.send(Message::Binary(Bytes::from_static(b"late!"))).await.unwrap();
        framed.send(Message::Text("STOP".into())).await.unwrap();

        let (lines, close) = read_until_close(&mut framed).await;
        assert_eq!(lines, vec!["chunk 0 (10 bytes)", "artifact 10 bytes"]);
        assert_eq!(close.map(|reason| reason.code), Some(CloseCode::Normal));

        let history = state.history.list_recent(5).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].contains("1 chunks, 10 bytes"), "{}", history[0]);
        assert_eq!(state.get_metrics_snapshot().sessions.frames_rejected, 2);
    }

    #[actix_web::test]
    async fn test_disconnect_before_stop_abandons() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        let mut srv = start_server(state.clone());
        let mut framed = srv.ws_at("/ws").await.unwrap();

        framed.send(Message::Binary(Bytes::from(vec![1u8; 512]))).await.unwrap();
        framed.send(Message::Binary(Bytes::from(vec![2u8; 256]))).await.unwrap();
        framed.send(Message::Close(None)).await.unwrap();
        drop(framed);

        eventually("abandonment", || {
            state.sessions.active_count() == 0 && state.get_metrics_snapshot().sessions.abandoned == 1
        })
        .await;

        let sessions = state.get_metrics_snapshot().sessions;
        assert_eq!(sessions.bytes_received, 768);
        assert_eq!(sessions.finalized, 0);
        assert!(state.history.list_recent(5).unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_disconnect_during_finalize_still_records() {
        let state = web::Data::new(
            AppState::with_pipeline(AppConfig::default(), Arc::new(SlowFinalize)).unwrap(),
        );
        let mut srv = start_server(state.clone());
        let mut framed = srv.ws_at("/ws").await.unwrap();

        framed.send(Message::Binary(Bytes::from_static(b"abc"))).await.unwrap();
        framed.send(Message::Text("STOP".into())).await.unwrap();
        framed.send(Message::Close(None)).await.unwrap();
        drop(framed);

        eventually("history entry", || state.history.len().unwrap() == 1).await;

        let history = state.history.list_recent(1).unwrap();
        assert!(history[0].contains("artifact 3 bytes"), "{}", history[0]);
        let sessions = state.get_metrics_snapshot().sessions;
        assert_eq!(sessions.finalized, 1);
        assert_eq!(sessions.abandoned, 0);
    }

    #[actix_web::test]
    async fn test_oversized_recording_closes_with_size_code() {
        let mut config = AppConfig::default();
        config.audio.max_session_bytes = 1024;
        let state = web::Data::new(AppState::new(config).unwrap());
        let mut srv = start_server(state.clone());
        let mut framed = srv.ws_at("/ws").await.unwrap();

        framed.send(Message::Binary(Bytes::from(vec![0u8; 600]))).await.unwrap();
        framed.send(Message::Binary(Bytes::from(vec![0u8; 600]))).await.unwrap();

        let (_, close) = read_until_close(&mut framed).await;
        assert_eq!(close.map(|reason| reason.code), Some(CloseCode::Size));

        eventually("registry slot release", || state.sessions.active_count() == 0).await;
        assert_eq!(state.get_metrics_snapshot().sessions.abandoned, 1);
        assert!(state.history.list_recent(5).unwrap().is_empty());
    }
}
