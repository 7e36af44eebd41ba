// ABOUTME: Recoverable conditions surfaced to the UI as transient notices.
// ABOUTME: Also defines the synchronous rejection reasons for an outbound send.

use std::fmt;

/// A recoverable condition the UI shows and then dismisses. None are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ConnectionFailed { reason: String },
    SendFailed { reason: String },
    PermissionDenied { reason: String },
    TranscriptionFailed { reason: String },
    PersistenceFailed { reason: String },
    ExportFailed { reason: String },
    AttachmentFailed { reason: String },
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "Connection failed",
            Self::SendFailed { .. } => "Message not sent",
            Self::PermissionDenied { .. } => "Microphone unavailable",
            Self::TranscriptionFailed { .. } => "Transcription failed",
            Self::PersistenceFailed { .. } => "History not saved",
            Self::ExportFailed { .. } => "Export failed",
            Self::AttachmentFailed { .. } => "File not attached",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::ConnectionFailed { reason }
            | Self::SendFailed { reason }
            | Self::PermissionDenied { reason }
            | Self::TranscriptionFailed { reason }
            | Self::PersistenceFailed { reason }
            | Self::ExportFailed { reason }
            | Self::AttachmentFailed { reason } => reason,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.reason())
    }
}

/// Why `send_message` refused to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejected {
    EmptyContent,
    NotConnected,
    /// A previous send is still awaiting completion
    Busy,
    NoSession,
}

impl fmt::Display for SendRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyContent => write!(f, "message is empty"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Busy => write!(f, "waiting for the previous message"),
            Self::NoSession => write!(f, "no active session"),
        }
    }
}

impl std::error::Error for SendRejected {}
