//! **Turn Coordinator** — the conversation state machine.
//!
//! Owns the conversation state and the response audio buffer, reacts to
//! exactly one event at a time (capture frame, transport event, playback
//! signal, restart timer, or shutdown request), and guarantees the
//! microphone and speaker are never active simultaneously, so the assistant
//! cannot hear its own voice.
//!
//! ```text
//! Idle ──session ready──▶ Listening ──speech end──▶ Committing
//!                             ▲                          │
//!                       restart delay              response started
//!                             │                          ▼
//! Idle ◀──playback done── Playing ◀──audio done── AwaitingResponse
//! ```
//!
//! Every transition runs inside one `select!` loop; capture, transport, and
//! playback are free-running producers, but their events are serialized
//! through this single coordination point.

use crate::audio::{decode_base64, AudioFrame};
use crate::capture::{CaptureEvent, CaptureSource};
use crate::error::{VoiceError, VoiceResult};
use crate::events::{ClientEvent, ConversationItem, ErrorBody, ServerEvent, SessionConfig};
use crate::playback::{PlaybackEvent, PlaybackSink};
use crate::transport::{TransportEvent, TransportHandle};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

/// Conversation state. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Waiting for the session to become ready, or for a scheduled restart.
    Idle,

    /// Microphone is live; frames stream to the endpoint.
    Listening,

    /// Speech ended; input committed and a response requested.
    Committing,

    /// Response in progress; accumulating audio deltas.
    AwaitingResponse,

    /// Speaker is rendering the response.
    Playing,
}

/// How response audio reaches the playback sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStrategy {
    /// Accumulate the full response and submit it as one unit after the
    /// audio-done event. Trades latency for glitch-free playback and avoids
    /// device churn per chunk.
    #[default]
    Buffered,

    /// Write each delta to the sink as it arrives; completion still waits
    /// for the done event plus sink drain.
    Streaming,
}

/// Configuration for the turn coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Quiescence delay between playback completion and capture restart, so
    /// the tail of played audio is not picked back up by the microphone
    /// (default: 1s).
    pub restart_delay: Duration,

    /// Output buffering strategy (default: buffered).
    pub playback_strategy: PlaybackStrategy,

    /// Server `error` events whose message contains one of these substrings
    /// are logged and otherwise ignored (default: `["buffer too small"]`).
    pub benign_error_patterns: Vec<String>,

    /// Session payload sent once at startup.
    pub session: SessionConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(1000),
            playback_strategy: PlaybackStrategy::default(),
            benign_error_patterns: vec!["buffer too small".to_string()],
            session: SessionConfig::default(),
        }
    }
}

/// Observer for assistant transcript deltas.
pub type OnTranscriptDelta = Option<Arc<dyn Fn(&str) + Send + Sync>>;

/// Observer for completed assistant conversation items.
pub type OnAssistantMessage = Option<Arc<dyn Fn(&str) + Send + Sync>>;

/// Append-only byte accumulator for one response's audio. Owned exclusively
/// by the coordinator; reset when a response starts, cleared after playback
/// completes or on teardown.
#[derive(Debug, Default)]
pub struct ResponseAudioBuffer {
    bytes: Vec<u8>,
}

impl ResponseAudioBuffer {
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Requests coordinator teardown from outside the event loop (e.g. a
/// process-signal handler). Uses the same atomic reset path as transport
/// closure.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// What the dispatch loop selected. One value per transition.
enum Dispatch {
    Shutdown,
    Transport(Option<TransportEvent>),
    Playback(Option<PlaybackEvent>),
    Capture(Option<CaptureEvent>),
    RestartElapsed,
}

/// The turn coordinator. Construct with [`TurnCoordinator::new`], attach
/// observers, then drive with [`TurnCoordinator::run`].
pub struct TurnCoordinator {
    config: CoordinatorConfig,

    capture: Box<dyn CaptureSource>,
    playback: Box<dyn PlaybackSink>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    playback_open: bool,
    transport: TransportHandle,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    // Keeps the shutdown channel open even if every handle is dropped.
    _shutdown_tx: mpsc::UnboundedSender<()>,

    state: ConversationState,
    frames: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    response_audio: ResponseAudioBuffer,
    restart: Option<Pin<Box<Sleep>>>,
    session_ready: bool,
    submission_seq: u64,
    active_submission: Option<u64>,

    on_transcript_delta: OnTranscriptDelta,
    on_assistant_message: OnAssistantMessage,
}

impl TurnCoordinator {
    /// Create a coordinator wired to the given capture source, playback
    /// sink, and transport.
    pub fn new(
        config: CoordinatorConfig,
        capture: Box<dyn CaptureSource>,
        playback: Box<dyn PlaybackSink>,
        playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
        transport: TransportHandle,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (Self, ShutdownHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let handle = ShutdownHandle {
            tx: shutdown_tx.clone(),
        };

        let coordinator = Self {
            config,
            capture,
            playback,
            playback_rx,
            playback_open: true,
            transport,
            transport_rx,
            shutdown_rx,
            _shutdown_tx: shutdown_tx,
            state: ConversationState::Idle,
            frames: None,
            response_audio: ResponseAudioBuffer::default(),
            restart: None,
            session_ready: false,
            submission_seq: 0,
            active_submission: None,
            on_transcript_delta: None,
            on_assistant_message: None,
        };

        (coordinator, handle)
    }

    /// Attach an observer for assistant transcript deltas.
    pub fn with_transcript_observer(mut self, observer: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.on_transcript_delta = Some(observer);
        self
    }

    /// Attach an observer for completed assistant conversation items.
    pub fn with_assistant_observer(mut self, observer: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.on_assistant_message = Some(observer);
        self
    }

    /// Current conversation state.
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Drive the conversation until the transport closes or shutdown is
    /// requested. Returns `Ok(())` on orderly shutdown and
    /// `Err(TransportClosed)` when the connection ends, so the owner can
    /// decide about reconnecting.
    pub async fn run(mut self) -> VoiceResult<()> {
        let session = ClientEvent::SessionUpdate {
            session: self.config.session.to_session_payload(),
        };
        if let Err(e) = self.transport.send(session) {
            self.reset("transport unavailable at startup");
            return Err(e);
        }
        info!("session.update sent; waiting for confirmation");

        loop {
            let frames_open = self.frames.is_some();
            let restart_armed = self.restart.is_some();

            let dispatch = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => Dispatch::Shutdown,
                event = self.transport_rx.recv() => Dispatch::Transport(event),
                signal = self.playback_rx.recv(), if self.playback_open => {
                    Dispatch::Playback(signal)
                }
                event = async {
                    match self.frames.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => None,
                    }
                }, if frames_open => Dispatch::Capture(event),
                _ = async {
                    if let Some(timer) = self.restart.as_mut() {
                        timer.as_mut().await;
                    }
                }, if restart_armed => Dispatch::RestartElapsed,
            };

            match dispatch {
                Dispatch::Shutdown => {
                    info!("shutdown requested");
                    self.reset("shutdown");
                    return Ok(());
                }
                Dispatch::Transport(Some(TransportEvent::Event(event))) => {
                    if let Err(e) = self.on_server_event(event) {
                        self.reset("transport error");
                        return Err(e);
                    }
                }
                Dispatch::Transport(Some(TransportEvent::Closed { reason })) => {
                    warn!(
                        reason = reason.as_deref().unwrap_or("none"),
                        "transport closed"
                    );
                    self.reset("transport closed");
                    return Err(VoiceError::TransportClosed);
                }
                Dispatch::Transport(None) => {
                    self.reset("transport closed");
                    return Err(VoiceError::TransportClosed);
                }
                Dispatch::Playback(Some(signal)) => self.on_playback_signal(signal),
                Dispatch::Playback(None) => {
                    warn!("playback event channel closed");
                    self.playback_open = false;
                }
                Dispatch::Capture(Some(CaptureEvent::Frame(frame))) => {
                    if let Err(e) = self.on_frame(frame) {
                        self.reset("transport error");
                        return Err(e);
                    }
                }
                Dispatch::Capture(Some(CaptureEvent::Failed(reason))) => {
                    self.on_capture_failed(&reason);
                }
                Dispatch::Capture(None) => {
                    debug!("capture frame channel ended");
                    self.frames = None;
                }
                Dispatch::RestartElapsed => self.on_restart_elapsed(),
            }

            debug_assert!(
                !(self.frames.is_some() && self.active_submission.is_some()),
                "capture and playback active simultaneously"
            );
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) -> VoiceResult<()> {
        match event {
            ServerEvent::SessionUpdated => self.on_session_ready()?,
            ServerEvent::SpeechStarted => {
                if self.state == ConversationState::Listening {
                    info!("speech detected");
                } else {
                    debug!(state = ?self.state, "speech_started outside listening; ignoring");
                }
            }
            ServerEvent::SpeechStopped => self.on_speech_stopped()?,
            ServerEvent::InputCommitted => debug!("input buffer committed"),
            ServerEvent::ResponseCreated => self.on_response_started(),
            ServerEvent::AudioDelta { delta } => self.on_audio_delta(&delta),
            ServerEvent::AudioDone => self.on_audio_done(),
            ServerEvent::TranscriptDelta { delta } => {
                if let Some(observer) = &self.on_transcript_delta {
                    observer(&delta);
                }
            }
            ServerEvent::TranscriptDone { transcript } => {
                debug!(
                    transcript = transcript.as_deref().unwrap_or(""),
                    "transcript complete"
                );
            }
            ServerEvent::ResponseDone => {
                debug!("response complete; waiting for audio playback");
            }
            ServerEvent::ItemCreated { item } => self.on_item_created(item),
            ServerEvent::Error { error } => self.on_server_error(&error),
            ServerEvent::Unhandled => debug!("unhandled server event"),
        }
        Ok(())
    }

    fn on_session_ready(&mut self) -> VoiceResult<()> {
        if self.session_ready {
            debug!("session.updated repeated; ignoring");
            return Ok(());
        }
        self.session_ready = true;
        info!("session configured");

        if let Some(greeting) = self.config.session.greeting.clone() {
            self.transport.send(ClientEvent::ConversationItemCreate {
                item: SessionConfig::text_item(&greeting),
            })?;
            self.transport.send(ClientEvent::ResponseCreate)?;
            info!("greeting sent; assistant speaks first");
        }

        self.start_listening();
        Ok(())
    }

    fn start_listening(&mut self) {
        match self.capture.start() {
            Ok(rx) => {
                self.frames = Some(rx);
                self.state = ConversationState::Listening;
                info!("listening");
            }
            Err(e) => {
                warn!("capture unavailable: {}", e);
                self.state = ConversationState::Idle;
            }
        }
    }

    /// Stop the device and drop the frame receiver, so no post-stop frame
    /// can be forwarded.
    fn stop_capture(&mut self) {
        self.capture.stop();
        self.frames = None;
    }

    fn on_frame(&mut self, frame: AudioFrame) -> VoiceResult<()> {
        if self.state != ConversationState::Listening {
            // Stale frame raced the stop; the input buffer is closed.
            return Ok(());
        }
        self.transport.send(ClientEvent::InputAudioAppend {
            audio: frame.to_base64(),
        })
    }

    fn on_speech_stopped(&mut self) -> VoiceResult<()> {
        if self.state != ConversationState::Listening {
            debug!(state = ?self.state, "speech_stopped outside listening; ignoring");
            return Ok(());
        }
        info!("speech ended; committing turn");
        // Capture must be fully stopped before the commit goes out.
        self.stop_capture();
        self.transport.send(ClientEvent::InputAudioCommit)?;
        self.transport.send(ClientEvent::ResponseCreate)?;
        self.state = ConversationState::Committing;
        Ok(())
    }

    fn on_response_started(&mut self) {
        match self.state {
            ConversationState::Committing => {}
            ConversationState::Listening => {
                // Server-initiated response (e.g. the greeting); mute the
                // microphone before any audio comes back.
                info!("server-initiated response; muting capture");
                self.stop_capture();
            }
            other => {
                debug!(state = ?other, "response.created ignored");
                return;
            }
        }

        self.response_audio.reset();

        if self.config.playback_strategy == PlaybackStrategy::Streaming {
            let submission = self.next_submission();
            if let Err(e) = self.playback.begin(submission) {
                self.on_playback_error(e);
                return;
            }
            self.active_submission = Some(submission);
        }

        self.state = ConversationState::AwaitingResponse;
    }

    fn on_audio_delta(&mut self, delta: &str) {
        if self.state != ConversationState::AwaitingResponse {
            debug!(state = ?self.state, "audio delta outside response; ignoring");
            return;
        }
        let chunk = match decode_base64(delta) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("undecodable audio delta: {}", e);
                return;
            }
        };
        self.response_audio.append(&chunk);

        if self.config.playback_strategy == PlaybackStrategy::Streaming {
            if let Err(e) = self.playback.write(&chunk) {
                self.on_playback_error(e);
            }
        }
    }

    fn on_audio_done(&mut self) {
        if self.state != ConversationState::AwaitingResponse {
            debug!(state = ?self.state, "audio done outside response; ignoring");
            return;
        }

        let result = match self.config.playback_strategy {
            PlaybackStrategy::Buffered => {
                let submission = self.next_submission();
                let mut result = self.playback.begin(submission);
                if result.is_ok() {
                    result = self.playback.write(self.response_audio.as_bytes());
                }
                if result.is_ok() {
                    result = self.playback.finish();
                }
                if result.is_ok() {
                    self.active_submission = Some(submission);
                }
                result
            }
            PlaybackStrategy::Streaming => self.playback.finish(),
        };

        match result {
            Ok(()) => {
                info!(
                    bytes = self.response_audio.len(),
                    "response audio complete; playing"
                );
                self.state = ConversationState::Playing;
            }
            Err(e) => self.on_playback_error(e),
        }
    }

    fn on_playback_signal(&mut self, signal: PlaybackEvent) {
        match signal {
            PlaybackEvent::Finished { submission } => {
                if self.state != ConversationState::Playing
                    || self.active_submission != Some(submission)
                {
                    debug!(submission, "stale playback signal; ignoring");
                    return;
                }
                info!(
                    delay_ms = self.config.restart_delay.as_millis() as u64,
                    "playback finished; re-arming capture after quiescence delay"
                );
                self.active_submission = None;
                self.response_audio.reset();
                self.state = ConversationState::Idle;
                // Supersedes any previously scheduled restart.
                self.restart = Some(Box::pin(sleep(self.config.restart_delay)));
            }
            PlaybackEvent::Failed { submission, reason } => {
                if self.active_submission != Some(submission) {
                    debug!(submission, "stale playback failure; ignoring");
                    return;
                }
                warn!("playback failed: {}", reason);
                self.playback.abort();
                self.active_submission = None;
                self.response_audio.reset();
                self.state = ConversationState::Idle;
            }
        }
    }

    fn on_playback_error(&mut self, err: VoiceError) {
        warn!("playback error: {}", err);
        self.playback.abort();
        self.active_submission = None;
        self.response_audio.reset();
        self.state = ConversationState::Idle;
    }

    fn on_capture_failed(&mut self, reason: &VoiceError) {
        warn!("capture failed: {}", reason);
        // Like a speech end, but there is no valid audio to commit.
        self.stop_capture();
        if self.state == ConversationState::Listening {
            self.state = ConversationState::Idle;
        }
    }

    fn on_restart_elapsed(&mut self) {
        self.restart = None;
        if self.state != ConversationState::Idle {
            debug!(state = ?self.state, "restart elapsed outside idle; ignoring");
            return;
        }
        info!("quiescence delay elapsed; listening again");
        self.start_listening();
    }

    fn on_item_created(&mut self, item: ConversationItem) {
        if item.role.as_deref() == Some("assistant") {
            if let Some(observer) = &self.on_assistant_message {
                observer(&item.content.to_string());
            }
        }
    }

    fn on_server_error(&mut self, error: &ErrorBody) {
        // Always the current event's message, never a stale binding.
        let message = error.message.as_str();
        let benign = self
            .config
            .benign_error_patterns
            .iter()
            .any(|pattern| message.contains(pattern.as_str()));
        if benign {
            debug!("ignoring benign server warning: {}", message);
        } else {
            warn!(code = error.code.as_deref().unwrap_or("none"), "server error: {}", message);
        }
    }

    fn next_submission(&mut self) -> u64 {
        self.submission_seq += 1;
        self.submission_seq
    }

    /// Tear everything down as one step relative to other transitions:
    /// stop capture, abort playback, discard buffered audio, cancel any
    /// pending restart. No orphaned timer can resurrect capture afterwards.
    fn reset(&mut self, reason: &str) {
        info!("resetting to idle ({})", reason);
        self.stop_capture();
        self.playback.abort();
        self.active_submission = None;
        self.response_audio.reset();
        self.restart = None;
        self.state = ConversationState::Idle;
    }
}
