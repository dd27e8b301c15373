//! # Colloquy Voice - Full-Duplex Conversation Core
//!
//! This crate implements the turn coordination for a real-time voice
//! conversation with a remote speech-capable endpoint: microphone frames go
//! out over a bidirectional event connection, synthesized speech comes back
//! and is played through the speaker, and the coordinator guarantees the two
//! are never active at the same time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Turn Coordinator                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐    │
//! │  │ Capture (mic)│ → │ State machine│ → │  Transport   │    │
//! │  │    (cpal)    │   │  (one loop)  │   │ (WebSocket)  │    │
//! │  └──────────────┘   └──────────────┘   └──────────────┘    │
//! │          ▲                  │                  │            │
//! │   restart delay       audio deltas       server events      │
//! │          │                  ▼                  │            │
//! │  ┌──────────────┐   ┌──────────────┐          │            │
//! │  │ Playback     │ ← │ Response     │ ◀────────┘            │
//! │  │   (rodio)    │   │ audio buffer │                       │
//! │  └──────────────┘   └──────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Voice-activity detection and speech recognition/synthesis happen on the
//! endpoint; the client's job is turn discipline.

pub mod audio;
pub mod capture;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod playback;
pub mod transport;

pub use audio::{AudioFormat, AudioFrame};
pub use capture::{CaptureConfig, CaptureEvent, CaptureSource, CpalCapture};
pub use coordinator::{
    ConversationState, CoordinatorConfig, OnAssistantMessage, OnTranscriptDelta,
    PlaybackStrategy, ResponseAudioBuffer, ShutdownHandle, TurnCoordinator,
};
pub use error::{VoiceError, VoiceResult};
pub use events::{ClientEvent, ConversationItem, ErrorBody, ServerEvent, SessionConfig};
pub use playback::{PlaybackConfig, PlaybackEvent, PlaybackSink, RodioPlayback};
pub use transport::{TransportEvent, TransportHandle, WsTransport};
