//! WebSocket control-frame types and egress routing.
//!
//! Control frames are JSON with a `type` tag; audio travels as raw binary
//! frames in both directions. Outbound traffic is routed through a single
//! channel so one sender task owns the socket sink; binary routes carry the
//! interrupt generation they belong to, and the sender drops any audio whose
//! generation is stale.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// Required first frame; optionally restores a saved session.
    Hello {
        sample_rate: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Barge-in.
    Interrupt,
    /// Load a saved history mid-connection.
    LoadSession { session_id: String },
    /// Direct text input bypassing STT.
    TextInput { text: String },
}

/// Error codes carried on `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Protocol,
    Busy,
    SttFailed,
    TtsFailed,
    BackendTransient,
    BackendUnavailable,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Transcription {
        text: String,
    },
    LlmResponse {
        text: String,
    },
    /// Brackets a TTS audio burst; advertises the PCM sample rate.
    TtsStart {
        sample_rate: u32,
    },
    TtsStop,
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl OutgoingMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        OutgoingMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Route for the single socket sender task.
pub enum MessageRoute {
    Outgoing(OutgoingMessage),
    /// PCM16LE audio stamped with the generation it was synthesized under.
    Audio { data: Bytes, generation: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_deserializes_with_optional_session() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"hello","sample_rate":16000}"#).expect("parse");
        assert_eq!(
            msg,
            IncomingMessage::Hello {
                sample_rate: 16000,
                session_id: None
            }
        );

        let msg: IncomingMessage = serde_json::from_str(
            r#"{"type":"hello","sample_rate":16000,"session_id":"abc"}"#,
        )
        .expect("parse");
        assert_eq!(
            msg,
            IncomingMessage::Hello {
                sample_rate: 16000,
                session_id: Some("abc".to_string())
            }
        );
    }

    #[test]
    fn interrupt_is_a_bare_tag() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"interrupt"}"#).expect("parse");
        assert_eq!(msg, IncomingMessage::Interrupt);
    }

    #[test]
    fn load_session_requires_an_id() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"load_session","session_id":"s1"}"#).expect("parse");
        assert_eq!(
            msg,
            IncomingMessage::LoadSession {
                session_id: "s1".to_string()
            }
        );
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"load_session"}"#).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn outgoing_frames_use_snake_case_tags() {
        let json = serde_json::to_string(&OutgoingMessage::TtsStart { sample_rate: 22050 })
            .expect("serialize");
        assert_eq!(json, r#"{"type":"tts_start","sample_rate":22050}"#);

        let json = serde_json::to_string(&OutgoingMessage::TtsStop).expect("serialize");
        assert_eq!(json, r#"{"type":"tts_stop"}"#);

        let json = serde_json::to_string(&OutgoingMessage::Transcription {
            text: "hi".to_string(),
        })
        .expect("serialize");
        assert_eq!(json, r#"{"type":"transcription","text":"hi"}"#);
    }

    #[test]
    fn error_frame_carries_code_and_message() {
        let json = serde_json::to_string(&OutgoingMessage::error(
            ErrorCode::BackendTransient,
            "stream broke",
        ))
        .expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"error","code":"backend_transient","message":"stream broke"}"#
        );
    }
}
