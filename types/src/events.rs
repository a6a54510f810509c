//! Events streamed to operator consoles and live log viewers.

use crate::state::{PlaybackState, SessionId};
use serde::{Deserialize, Serialize};

/// Which output stream of a pipeline stage a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Event types that can be broadcast to all connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CastEvent {
    /// Informational lifecycle message
    Info { message: String },
    /// Error message, optionally with the underlying cause
    Error {
        message: String,
        cause: Option<String>,
    },
    /// One line printed by a pipeline stage
    ProcessOutput {
        /// Name of the command that produced the line (e.g. "yt-dlp")
        command: String,
        stream: OutputStream,
        line: String,
    },
    /// The playback session moved to a new state
    StateChanged {
        session_id: Option<SessionId>,
        state: PlaybackState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format_is_tagged() {
        let event = CastEvent::Info {
            message: "Downloading".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Info");
        assert_eq!(json["data"]["message"], "Downloading");
    }

    #[test]
    fn test_process_output_wire_format() {
        let event = CastEvent::ProcessOutput {
            command: "yt-dlp".to_string(),
            stream: OutputStream::Stderr,
            line: "[download] 10.0%".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ProcessOutput");
        assert_eq!(json["data"]["stream"], "stderr");
        assert_eq!(json["data"]["command"], "yt-dlp");
    }
}
