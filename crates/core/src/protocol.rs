//! The JSON wire vocabulary the relay sends or inspects.
//!
//! The relay forwards client and upstream messages verbatim, so only three
//! things are modeled here: the one-time `session.update` configuration
//! message, the synthetic notices the relay itself sends to the client, and
//! a lightweight classification of relayed messages for logging.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AUDIO_APPEND: &str = "input_audio_buffer.append";
pub const SPEECH_STARTED: &str = "input_audio_buffer.speech_started";
pub const SPEECH_STOPPED: &str = "input_audio_buffer.speech_stopped";
pub const TRANSCRIPT_DONE: &str = "response.audio_transcript.done";

/// Input transcription settings of a realtime session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioTranscription {
    pub model: String,
}

/// Server-side voice activity detection settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

/// The `session` object of a `session.update` message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: AudioTranscription,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
    pub max_response_output_tokens: u32,
}

impl SessionConfig {
    /// Builds the fixed session configuration around the given instruction text.
    ///
    /// The tuning values favor short turns: a sensitive VAD threshold, short
    /// prefix padding and silence windows, and a capped response length.
    pub fn with_instructions(instructions: impl Into<String>) -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: instructions.into(),
            voice: "alloy".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: AudioTranscription {
                model: "whisper-1".to_string(),
            },
            turn_detection: TurnDetection::ServerVad {
                threshold: 0.4,
                prefix_padding_ms: 150,
                silence_duration_ms: 400,
            },
            temperature: 0.8,
            max_response_output_tokens: 800,
        }
    }
}

/// The configuration message sent upstream once per session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename = "session.update")]
pub struct SessionUpdate {
    pub session: SessionConfig,
}

impl SessionUpdate {
    pub fn new(session: SessionConfig) -> Self {
        Self { session }
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages the relay itself originates. These only ever go to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum RelayNotice {
    /// The upstream session is configured and relaying may begin.
    #[serde(rename = "connection.ready")]
    ConnectionReady { message: String },
    /// The upstream connection closed; the client connection closes next.
    #[serde(rename = "connection.closed")]
    ConnectionClosed { message: String },
    /// The upstream connection failed.
    #[serde(rename = "error")]
    Error { message: String },
}

impl RelayNotice {
    pub fn ready() -> Self {
        Self::ConnectionReady {
            message: "Realtime API ready".to_string(),
        }
    }

    pub fn closed() -> Self {
        Self::ConnectionClosed {
            message: "OpenAI connection closed".to_string(),
        }
    }

    pub fn upstream_error() -> Self {
        Self::Error {
            message: "OpenAI connection error".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// What a relayed message is, as far as logging cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    AudioAppend,
    SpeechStarted,
    SpeechStopped,
    TranscriptDone { transcript: Option<String> },
    Other(String),
    /// Valid JSON without a string `type` field.
    Untyped,
}

impl EventKind {
    /// Parses `text` as JSON and classifies it. Any JSON value is accepted.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(&value))
    }

    pub fn classify(value: &Value) -> Self {
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Self::Untyped;
        };
        match kind {
            AUDIO_APPEND => Self::AudioAppend,
            SPEECH_STARTED => Self::SpeechStarted,
            SPEECH_STOPPED => Self::SpeechStopped,
            TRANSCRIPT_DONE => Self::TranscriptDone {
                transcript: value
                    .get("transcript")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            other => Self::Other(other.to_string()),
        }
    }

    /// The `type` string for logging, if any.
    pub fn type_name(&self) -> &str {
        match self {
            Self::AudioAppend => AUDIO_APPEND,
            Self::SpeechStarted => SPEECH_STARTED,
            Self::SpeechStopped => SPEECH_STOPPED,
            Self::TranscriptDone { .. } => TRANSCRIPT_DONE,
            Self::Other(kind) => kind,
            Self::Untyped => "<untyped>",
        }
    }
}
