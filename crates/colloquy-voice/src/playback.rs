//! Speaker playback behind the [`PlaybackSink`] seam.
//!
//! A submission is one response's worth of audio: `begin` → `write`* →
//! `finish`. The sink emits [`PlaybackEvent::Finished`] exactly once per
//! non-aborted submission, only after the device has drained plus a settle
//! delay: devices buffer internally, and signaling on the last write would
//! truncate the tail of the audio. `abort` stops rendering immediately and
//! suppresses the finished signal for that submission.
//!
//! `RodioPlayback` owns the output stream and is not Send on some platforms;
//! run the coordinator on the task that created it.

use crate::audio::{pcm16le_to_i16, AudioFormat};
use crate::error::{VoiceError, VoiceResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Signals emitted by a playback sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// All bytes of the submission were rendered (device drained + settle).
    Finished { submission: u64 },

    /// The device failed mid-render; no `Finished` follows for this submission.
    Failed { submission: u64, reason: String },
}

/// A sink that renders raw PCM16LE audio.
///
/// Implementations must keep their event sender alive for as long as the
/// sink exists, so the coordinator's receiver never closes early.
pub trait PlaybackSink {
    /// Open a new submission. Fails with [`VoiceError::PlaybackFailed`] if
    /// the device rejects it.
    fn begin(&mut self, submission: u64) -> VoiceResult<()>;

    /// Append PCM16LE bytes to the active submission. An empty chunk is a
    /// no-op.
    fn write(&mut self, pcm: &[u8]) -> VoiceResult<()>;

    /// No more bytes for the active submission; emit `Finished` once fully
    /// rendered.
    fn finish(&mut self) -> VoiceResult<()>;

    /// Stop rendering immediately. Idempotent; the aborted submission never
    /// emits `Finished`.
    fn abort(&mut self);

    /// Whether a submission is currently open or rendering.
    fn is_active(&self) -> bool;
}

/// Configuration for speaker playback.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Output audio format (default: 24 kHz mono).
    pub format: AudioFormat,

    /// Delay after the device reports empty before signaling finished,
    /// covering device-side buffering (default: 500ms).
    pub settle_delay: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::OUTPUT,
            settle_delay: Duration::from_millis(500),
        }
    }
}

struct ActiveRender {
    submission: u64,
    sink: Arc<Sink>,
    aborted: Arc<AtomicBool>,
}

/// Speaker playback using Rodio.
pub struct RodioPlayback {
    config: PlaybackConfig,
    // Keeps the output device open; dropping it kills all sinks.
    _stream: OutputStream,
    handle: OutputStreamHandle,
    events_tx: mpsc::UnboundedSender<PlaybackEvent>,
    current: Option<ActiveRender>,
}

impl RodioPlayback {
    /// Open the default output device.
    pub fn new(
        config: PlaybackConfig,
    ) -> VoiceResult<(Self, mpsc::UnboundedReceiver<PlaybackEvent>)> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| VoiceError::PlaybackUnavailable(e.to_string()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            sample_rate = config.format.sample_rate,
            "playback device ready"
        );

        Ok((
            Self {
                config,
                _stream: stream,
                handle,
                events_tx,
                current: None,
            },
            events_rx,
        ))
    }
}

impl PlaybackSink for RodioPlayback {
    fn begin(&mut self, submission: u64) -> VoiceResult<()> {
        // A fresh Sink per submission; a stopped rodio sink cannot be reused.
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| VoiceError::PlaybackFailed(e.to_string()))?;
        self.current = Some(ActiveRender {
            submission,
            sink: Arc::new(sink),
            aborted: Arc::new(AtomicBool::new(false)),
        });
        debug!(submission, "playback submission opened");
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> VoiceResult<()> {
        if pcm.is_empty() {
            return Ok(());
        }
        let render = self
            .current
            .as_ref()
            .ok_or_else(|| VoiceError::PlaybackFailed("no open submission".to_string()))?;
        let samples = pcm16le_to_i16(pcm);
        let source = SamplesBuffer::new(
            self.config.format.channels,
            self.config.format.sample_rate,
            samples,
        );
        render.sink.append(source);
        Ok(())
    }

    fn finish(&mut self) -> VoiceResult<()> {
        let render = self
            .current
            .as_ref()
            .ok_or_else(|| VoiceError::PlaybackFailed("no open submission".to_string()))?;

        let sink = Arc::clone(&render.sink);
        let aborted = Arc::clone(&render.aborted);
        let events_tx = self.events_tx.clone();
        let settle = self.config.settle_delay;
        let submission = render.submission;

        // Drain watcher: poll the device queue, then settle, then signal.
        std::thread::spawn(move || {
            while !sink.empty() {
                if aborted.load(Ordering::Relaxed) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            std::thread::sleep(settle);
            if aborted.load(Ordering::Relaxed) {
                return;
            }
            let _ = events_tx.send(PlaybackEvent::Finished { submission });
        });

        Ok(())
    }

    fn abort(&mut self) {
        if let Some(render) = self.current.take() {
            render.aborted.store(true, Ordering::Relaxed);
            render.sink.stop();
            debug!(submission = render.submission, "playback aborted");
        }
    }

    fn is_active(&self) -> bool {
        self.current.is_some()
    }
}
