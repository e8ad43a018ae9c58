//! Client session state machine.
//!
//! [`transition`] is a pure function `(state, event) -> (state, effects)`.
//! It never touches the channel; the [`super::Session`] driver carries out
//! the returned [`Effect`]s.

use std::fmt;

use coderun_protocol::{ClientMessage, ServerMessage};

use super::error::{ExecutionError, ProtocolViolation, ValidationError};
use super::input::InputRelay;
use super::output::OutputAggregator;
use crate::channel::ConnectionError;

/// Shown when the backend reports a failure without a message.
pub const DEFAULT_ERROR: &str = "Error occurred";

/// Where the session is in its run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Running,
    AwaitingInput,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Running => write!(f, "running"),
            Status::AwaitingInput => write!(f, "awaiting_input"),
        }
    }
}

/// How the most recent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
}

/// Everything the client knows about its session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    status: Status,
    submitted_code: String,
    output: OutputAggregator,
    error: Option<String>,
    relay: InputRelay,
    last_outcome: Option<RunOutcome>,
    closed: bool,
}

impl SessionState {
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn submitted_code(&self) -> &str {
        &self.submitted_code
    }

    pub fn output(&self) -> &OutputAggregator {
        &self.output
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.relay.pending()
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome
    }

    /// The channel is gone; the session cannot be used again.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.status = Status::Idle;
        self.relay.clear();
        self.last_outcome = Some(outcome);
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone)]
pub enum Event {
    /// Caller asks to run code.
    Start { code: String },
    /// Caller answers the pending prompt.
    Submit { input: String },
    /// A message arrived from the backend.
    Received(ServerMessage),
    /// The channel failed or closed.
    ChannelLost(ConnectionError),
}

/// What the caller observes. Successes and every error kind share this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    RunStarted,
    Output { text: String },
    InputRequested { prompt: String },
    InputSent,
    RunCompleted,
    RunFailed(ExecutionError),
    Rejected(ValidationError),
    ProtocolViolation(ProtocolViolation),
    Disconnected(ConnectionError),
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(ClientMessage),
    Notify(Notice),
}

#[derive(Debug)]
pub struct Transition {
    pub state: SessionState,
    pub effects: Vec<Effect>,
}

/// Apply one event.
pub fn transition(mut state: SessionState, event: Event) -> Transition {
    let mut effects = Vec::new();

    match event {
        Event::Start { code } => {
            if state.closed {
                effects.push(Effect::Notify(Notice::Disconnected(ConnectionError::Closed)));
            } else if state.status != Status::Idle {
                effects.push(reject(ValidationError::RunInProgress));
            } else if code.trim().is_empty() {
                effects.push(reject(ValidationError::EmptyCode));
            } else {
                state.output.reset();
                state.error = None;
                state.relay.clear();
                state.last_outcome = None;
                state.submitted_code = code.clone();
                state.status = Status::Running;
                effects.push(Effect::Send(ClientMessage::RunCode { code }));
                effects.push(Effect::Notify(Notice::RunStarted));
            }
        }

        Event::Submit { input } => {
            if state.closed {
                effects.push(Effect::Notify(Notice::Disconnected(ConnectionError::Closed)));
            } else {
                match state.relay.submit(&input) {
                    Ok(message) => {
                        state.status = Status::Running;
                        effects.push(Effect::Send(message));
                        effects.push(Effect::Notify(Notice::InputSent));
                    }
                    Err(err) => effects.push(reject(err)),
                }
            }
        }

        Event::Received(message) => receive(&mut state, message, &mut effects),

        Event::ChannelLost(err) => {
            if !state.closed {
                state.closed = true;
                state.status = Status::Idle;
                state.relay.clear();
                effects.push(Effect::Notify(Notice::Disconnected(err)));
            }
        }
    }

    Transition { state, effects }
}

fn receive(state: &mut SessionState, message: ServerMessage, effects: &mut Vec<Effect>) {
    let violation = ProtocolViolation {
        message: message.kind(),
        status: state.status,
    };

    if state.closed || state.status == Status::Idle {
        effects.push(Effect::Notify(Notice::ProtocolViolation(violation)));
        return;
    }

    match message {
        ServerMessage::Output { text } => {
            state.output.append(text.clone());
            effects.push(Effect::Notify(Notice::Output { text }));
        }

        ServerMessage::InputRequest { prompt } => {
            if state.relay.prompt_received(prompt) {
                effects.push(Effect::Notify(Notice::ProtocolViolation(violation)));
            }
            state.status = Status::AwaitingInput;
            let prompt = state.relay.pending().unwrap_or_default().to_string();
            effects.push(Effect::Notify(Notice::InputRequested { prompt }));
        }

        ServerMessage::ExecutionComplete => {
            state.finish(RunOutcome::Completed);
            effects.push(Effect::Notify(Notice::RunCompleted));
        }

        ServerMessage::Error { error } => {
            let message = if error.is_empty() {
                DEFAULT_ERROR.to_string()
            } else {
                error
            };
            state.error = Some(message.clone());
            state.finish(RunOutcome::Failed);
            effects.push(Effect::Notify(Notice::RunFailed(ExecutionError { message })));
        }
    }
}

fn reject(err: ValidationError) -> Effect {
    Effect::Notify(Notice::Rejected(err))
}
