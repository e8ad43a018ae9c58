//! Message vocabulary.
//!
//! Commands flow client -> backend ([`ClientMessage`]), events flow
//! backend -> client ([`ServerMessage`], wrapped in an [`Envelope`]).

use serde::{Deserialize, Serialize};

// ============================================================================
// Client -> Backend
// ============================================================================

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a run. Only valid while the session is idle.
    RunCode { code: String },

    /// Answer the outstanding `input_request`. Never empty.
    InputResponse { input: String },
}

impl ClientMessage {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunCode { .. } => "run_code",
            Self::InputResponse { .. } => "input_response",
        }
    }
}

// ============================================================================
// Backend -> Client
// ============================================================================

/// Messages sent by the execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A fragment of program output. Fragments carry no line alignment.
    Output { text: String },

    /// The program is blocked reading a line of input.
    InputRequest {
        #[serde(default)]
        prompt: String,
    },

    /// The run finished normally. Terminal.
    ExecutionComplete,

    /// The run failed. Terminal, exclusive with `execution_complete`.
    Error {
        #[serde(default)]
        error: String,
    },
}

impl ServerMessage {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::InputRequest { .. } => "input_request",
            Self::ExecutionComplete => "execution_complete",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this message ends the current run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ExecutionComplete | Self::Error { .. })
    }
}

/// A backend message with its per-connection sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Monotonic per connection, starting at 0. Absent from older backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    #[serde(flatten)]
    pub message: ServerMessage,
}

impl Envelope {
    pub fn new(seq: u64, message: ServerMessage) -> Self {
        Self {
            seq: Some(seq),
            message,
        }
    }

    /// An envelope without ordering information.
    pub fn unsequenced(message: ServerMessage) -> Self {
        Self { seq: None, message }
    }
}
