//! Typed wire events for the realtime endpoint.
//!
//! The wire envelope is a JSON object tagged by `type`; event names contain
//! dots, so every variant carries an explicit rename. The adapter in
//! `transport` moves these events across the socket but contains no
//! state-machine logic.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Events the client sends to the endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Session configuration, sent once before any audio.
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },

    /// One base64 PCM16LE frame appended to the input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// Close the input buffer for the current turn.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Request a response for the committed input.
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Inject a conversation item (used for the optional text greeting).
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: Value },
}

/// Events the endpoint sends to the client. Unknown types fold into
/// [`ServerEvent::Unhandled`] and are ignored by the coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Endpoint confirmed the session configuration.
    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// Server-side VAD detected the start of user speech.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Server-side VAD decided the user finished speaking.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// The committed input was accepted into the conversation.
    #[serde(rename = "input_audio_buffer.committed")]
    InputCommitted,

    /// A response has started; audio deltas will follow.
    #[serde(rename = "response.created")]
    ResponseCreated,

    /// One base64 chunk of response audio.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// All response audio has been sent.
    #[serde(rename = "response.audio.done")]
    AudioDone,

    /// Incremental transcript of the response audio.
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },

    /// Final transcript of the response audio.
    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
    },

    /// The response (all modalities) is complete.
    #[serde(rename = "response.done")]
    ResponseDone,

    /// A conversation item was created (user or assistant).
    #[serde(rename = "conversation.item.created")]
    ItemCreated { item: ConversationItem },

    /// Server error or warning.
    #[serde(rename = "error")]
    Error { error: ErrorBody },

    /// Any event type the coordinator has no interest in.
    #[serde(other)]
    Unhandled,
}

/// The parts of a conversation item the core inspects.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationItem {
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub content: Value,
}

/// Payload of a server `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub code: Option<String>,
}

/// Session configuration rendered into the initial `session.update` payload.
///
/// The endpoint performs voice-activity detection (`server_vad`); the
/// threshold and timing fields tune it. Audio formats are fixed to `pcm16`
/// on both directions for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// System instructions for the assistant.
    pub instructions: String,

    /// Synthesis voice name (alloy, ash, echo, ...).
    pub voice: String,

    /// Model used for input transcription.
    pub transcription_model: String,

    /// Server VAD speech probability threshold (0.0..1.0).
    pub vad_threshold: f32,

    /// Audio retained before detected speech start, in milliseconds.
    pub vad_prefix_padding_ms: u32,

    /// Silence needed before the endpoint declares speech stopped, in milliseconds.
    pub vad_silence_duration_ms: u32,

    /// Sampling temperature for responses.
    pub temperature: f32,

    /// Optional text greeting sent as a user item right after the session is
    /// ready, so the assistant speaks first.
    pub greeting: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: "You are a helpful assistant.".to_string(),
            voice: "alloy".to_string(),
            transcription_model: "whisper-1".to_string(),
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            temperature: 0.8,
            greeting: None,
        }
    }
}

impl SessionConfig {
    /// Render the `session` object for a [`ClientEvent::SessionUpdate`].
    pub fn to_session_payload(&self) -> Value {
        json!({
            "modalities": ["text", "audio"],
            "instructions": self.instructions,
            "voice": self.voice,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": {
                "model": self.transcription_model,
            },
            "turn_detection": {
                "type": "server_vad",
                "threshold": self.vad_threshold,
                "prefix_padding_ms": self.vad_prefix_padding_ms,
                "silence_duration_ms": self.vad_silence_duration_ms,
            },
            "temperature": self.temperature,
            "max_response_output_tokens": "inf",
        })
    }

    /// Render a user text item for [`ClientEvent::ConversationItemCreate`].
    pub fn text_item(text: &str) -> Value {
        json!({
            "type": "message",
            "role": "user",
            "content": [{ "type": "input_text", "text": text }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_event_matches_wire_shape() {
        let event = ClientEvent::InputAudioAppend {
            audio: "cGNt".to_string(),
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({ "type": "input_audio_buffer.append", "audio": "cGNt" })
        );
    }

    #[test]
    fn commit_event_is_bare_tag() {
        let value: Value = serde_json::to_value(&ClientEvent::InputAudioCommit).unwrap();
        assert_eq!(value, json!({ "type": "input_audio_buffer.commit" }));
    }

    #[test]
    fn audio_delta_deserializes() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"response.audio.delta","delta":"YWJj"}"#).unwrap();
        assert!(matches!(event, ServerEvent::AudioDelta { delta } if delta == "YWJj"));
    }

    #[test]
    fn error_event_carries_message() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"error","error":{"message":"buffer too small","code":"input_audio_buffer_commit_empty"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "buffer too small");
                assert_eq!(error.code.as_deref(), Some("input_audio_buffer_commit_empty"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_types_fold_into_unhandled() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unhandled));
    }

    #[test]
    fn session_updated_ignores_extra_fields() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"session.updated","session":{"voice":"ash"}}"#)
                .unwrap();
        assert!(matches!(event, ServerEvent::SessionUpdated));
    }

    #[test]
    fn session_payload_pins_pcm16_both_directions() {
        let payload = SessionConfig::default().to_session_payload();
        assert_eq!(payload["input_audio_format"], "pcm16");
        assert_eq!(payload["output_audio_format"], "pcm16");
        assert_eq!(payload["turn_detection"]["type"], "server_vad");
    }
}
