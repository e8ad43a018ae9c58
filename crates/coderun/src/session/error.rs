//! Error taxonomy surfaced by the client session.
//!
//! Connection failures live in [`crate::channel::ConnectionError`]; they are
//! kept apart from [`ExecutionError`] so a broken channel is never shown as a
//! program failure.

use thiserror::Error;

use super::machine::Status;

/// A local request rejected before anything touched the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("code must not be empty")]
    EmptyCode,

    #[error("input must not be empty")]
    EmptyInput,

    #[error("no input request is pending")]
    NoPendingPrompt,

    #[error("a run is already in progress")]
    RunInProgress,
}

/// A backend message arrived in a state that does not accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unexpected `{message}` while {status}")]
pub struct ProtocolViolation {
    /// Wire type of the offending message.
    pub message: &'static str,
    /// Session status when it arrived.
    pub status: Status,
}

/// The backend reported that the run failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}
