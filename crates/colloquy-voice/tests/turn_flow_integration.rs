//! Integration test for the full turn cycle.
//!
//! Drives the coordinator through two complete turns (listen → commit →
//! response → playback → restart) over scripted capture, playback, and
//! transport; no audio hardware or network needed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use colloquy_voice::{
    AudioFrame, CaptureEvent, CaptureSource, ClientEvent, CoordinatorConfig, PlaybackEvent,
    PlaybackSink, ServerEvent, TransportEvent, TransportHandle, TurnCoordinator, VoiceResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::yield_now;

struct ScriptedCapture {
    started: Arc<AtomicUsize>,
    active: Arc<AtomicBool>,
    frame_tx: Arc<Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>>,
}

impl CaptureSource for ScriptedCapture {
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<CaptureEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.frame_tx.lock().unwrap() = Some(tx);
        self.started.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        *self.frame_tx.lock().unwrap() = None;
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct ScriptedSink {
    submissions: Arc<Mutex<Vec<(u64, Vec<u8>)>>>,
    open: Option<(u64, Vec<u8>)>,
    events_tx: mpsc::UnboundedSender<PlaybackEvent>,
}

impl PlaybackSink for ScriptedSink {
    fn begin(&mut self, submission: u64) -> VoiceResult<()> {
        self.open = Some((submission, Vec::new()));
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> VoiceResult<()> {
        if let Some((_, bytes)) = self.open.as_mut() {
            bytes.extend_from_slice(pcm);
        }
        Ok(())
    }

    fn finish(&mut self) -> VoiceResult<()> {
        if let Some((submission, bytes)) = self.open.take() {
            self.submissions.lock().unwrap().push((submission, bytes));
            // Render instantly: the device is imaginary.
            self.events_tx
                .send(PlaybackEvent::Finished { submission })
                .unwrap();
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.open = None;
    }

    fn is_active(&self) -> bool {
        self.open.is_some()
    }
}

async fn drive() {
    for _ in 0..32 {
        yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn two_full_turns_with_restart_between() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();

    let started = Arc::new(AtomicUsize::new(0));
    let frame_tx = Arc::new(Mutex::new(None));
    let submissions: Arc<Mutex<Vec<(u64, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

    let capture = ScriptedCapture {
        started: Arc::clone(&started),
        active: Arc::new(AtomicBool::new(false)),
        frame_tx: Arc::clone(&frame_tx),
    };
    let sink = ScriptedSink {
        submissions: Arc::clone(&submissions),
        open: None,
        events_tx: playback_tx,
    };

    let config = CoordinatorConfig {
        restart_delay: Duration::from_millis(200),
        ..CoordinatorConfig::default()
    };
    let (coordinator, shutdown) = TurnCoordinator::new(
        config,
        Box::new(capture),
        Box::new(sink),
        playback_rx,
        TransportHandle::new(out_tx),
        server_rx,
    );

    let send_frame = |payload: &[u8]| {
        frame_tx
            .lock()
            .unwrap()
            .as_ref()
            .expect("capture not running")
            .send(CaptureEvent::Frame(AudioFrame::new(payload.to_vec())))
            .unwrap();
    };

    let driver = async {
        // Session handshake.
        assert!(matches!(
            out_rx.recv().await.unwrap(),
            ClientEvent::SessionUpdate { .. }
        ));
        server_tx
            .send(TransportEvent::Event(ServerEvent::SessionUpdated))
            .unwrap();
        drive().await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        for turn in 0u8..2 {
            // User speaks.
            send_frame(b"frame-a");
            send_frame(b"frame-b");
            for expected in [b"frame-a".as_slice(), b"frame-b"] {
                match out_rx.recv().await.unwrap() {
                    ClientEvent::InputAudioAppend { audio } => {
                        assert_eq!(audio, BASE64.encode(expected));
                    }
                    other => panic!("expected append, got {:?}", other),
                }
            }

            // Endpoint detects the end of speech.
            server_tx
                .send(TransportEvent::Event(ServerEvent::SpeechStopped))
                .unwrap();
            assert!(matches!(
                out_rx.recv().await.unwrap(),
                ClientEvent::InputAudioCommit
            ));
            assert!(matches!(
                out_rx.recv().await.unwrap(),
                ClientEvent::ResponseCreate
            ));

            // Response comes back in two chunks.
            server_tx
                .send(TransportEvent::Event(ServerEvent::ResponseCreated))
                .unwrap();
            for chunk in [b"audio-1".as_slice(), b"audio-2"] {
                server_tx
                    .send(TransportEvent::Event(ServerEvent::AudioDelta {
                        delta: BASE64.encode(chunk),
                    }))
                    .unwrap();
            }
            server_tx
                .send(TransportEvent::Event(ServerEvent::AudioDone))
                .unwrap();
            drive().await;

            {
                let submissions = submissions.lock().unwrap();
                assert_eq!(submissions.len(), usize::from(turn) + 1);
                let (_, bytes) = &submissions[usize::from(turn)];
                assert_eq!(bytes.as_slice(), b"audio-1audio-2");
            }

            // Playback finished instantly; capture restarts only after the
            // quiescence delay.
            assert_eq!(started.load(Ordering::SeqCst), usize::from(turn) + 1);
            tokio::time::advance(Duration::from_millis(250)).await;
            drive().await;
            assert_eq!(started.load(Ordering::SeqCst), usize::from(turn) + 2);
        }

        shutdown.shutdown();
    };

    let (result, ()) = tokio::join!(coordinator.run(), driver);
    assert!(result.is_ok());
}
