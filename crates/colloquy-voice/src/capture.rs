//! Microphone capture behind the [`CaptureSource`] seam.
//!
//! `CpalCapture` spawns a dedicated thread to own the audio stream
//! (`cpal::Stream` is !Send on some platforms). A ready-handshake channel
//! reports device-open failure synchronously from `start()`; the stream is
//! dropped when the stop signal arrives, so no frames are produced after
//! `stop()` returns.

use crate::audio::{AudioFormat, AudioFrame};
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What the capture stream pushes to the coordinator.
#[derive(Debug)]
pub enum CaptureEvent {
    /// One fixed-format PCM frame.
    Frame(AudioFrame),

    /// The device failed mid-stream; the stream is dead and no further
    /// frames will follow.
    Failed(VoiceError),
}

/// A push-based source of raw audio frames.
///
/// `start` fails with [`VoiceError::CaptureUnavailable`] when the device
/// cannot be opened. `stop` is idempotent: calling it while inactive is a
/// no-op.
pub trait CaptureSource {
    /// Begin producing frames. The receiver yields frames in production
    /// order until `stop()` is called or the device fails.
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<CaptureEvent>>;

    /// Stop producing frames. Idempotent.
    fn stop(&mut self);

    /// Whether the source is currently producing frames.
    fn is_active(&self) -> bool;
}

/// Configuration for microphone capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input audio format (default: 16 kHz mono).
    pub format: AudioFormat,

    /// Frame size in samples (default: 480 = 30ms at 16kHz).
    pub chunk_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::INPUT,
            chunk_samples: 480, // 30ms at 16kHz
        }
    }
}

struct ActiveCapture {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// Microphone capture using CPAL.
pub struct CpalCapture {
    config: CaptureConfig,
    active: Option<ActiveCapture>,
}

impl CpalCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }
}

impl CaptureSource for CpalCapture {
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<CaptureEvent>> {
        if self.active.is_some() {
            return Err(VoiceError::Config("capture already started".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let config = self.config.clone();

        let thread = std::thread::spawn(move || {
            let device = match cpal::default_host().default_input_device() {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err(VoiceError::CaptureUnavailable(
                        "no input device available".to_string(),
                    )));
                    return;
                }
            };

            let stream_config = StreamConfig {
                channels: config.format.channels,
                sample_rate: cpal::SampleRate(config.format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let chunk_samples = config.chunk_samples;
            let mut sample_buffer = Vec::with_capacity(chunk_samples);
            let data_tx = frame_tx.clone();
            let error_tx = frame_tx;

            let stream = device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Accumulate samples into fixed-size frames
                    for &sample in data {
                        sample_buffer.push(sample);
                        if sample_buffer.len() >= chunk_samples {
                            let frame = AudioFrame::from_f32_samples(&sample_buffer);
                            // A send error means the receiver is gone and the
                            // stop signal is imminent; drop the frame.
                            let _ = data_tx.send(CaptureEvent::Frame(frame));
                            sample_buffer.clear();
                        }
                    }
                },
                move |err| {
                    warn!("Capture stream error: {}", err);
                    let _ =
                        error_tx.send(CaptureEvent::Failed(VoiceError::CaptureFailed(err.to_string())));
                },
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.into()));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until the stop signal; dropping it here
            // ends capture.
            let _ = stop_rx.recv();
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VoiceError::CaptureUnavailable(
                    "capture thread died during startup".to_string(),
                ))
            }
        }

        info!(
            sample_rate = self.config.format.sample_rate,
            chunk_samples = self.config.chunk_samples,
            "capture started"
        );

        self.active = Some(ActiveCapture {
            stop_tx,
            thread: Some(thread),
        });

        Ok(frame_rx)
    }

    fn stop(&mut self) {
        if let Some(mut active) = self.active.take() {
            let _ = active.stop_tx.send(());
            if let Some(handle) = active.thread.take() {
                let _ = handle.join();
            }
            info!("capture stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
