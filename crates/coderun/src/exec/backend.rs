//! Backend side of a session: the client machine with roles inverted.
//!
//! The client drives `run_code`/`input_response`; the process drives output,
//! prompts and termination. [`Backend::handle`] is synchronous and returns
//! [`Action`]s for the connection task to perform.

use std::fmt;

use coderun_protocol::{ClientMessage, ServerMessage};
use log::{debug, warn};

use super::launch::ExecEvent;

/// Sent when the process is killed by the wall-clock limit.
pub const TIMEOUT_MESSAGE: &str = "Code execution timed out";

/// Sent for `run_code` with blank code.
pub const EMPTY_CODE_MESSAGE: &str = "No code provided";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    AwaitingInput,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::AwaitingInput => write!(f, "awaiting_input"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Input {
    Client(ClientMessage),
    Process(ExecEvent),
    /// Starting the process failed.
    LaunchFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Emit(ServerMessage),
    Launch(String),
    WriteStdin(String),
}

/// Per-connection execution state.
#[derive(Debug, Default)]
pub struct Backend {
    state: RunState,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != RunState::Idle
    }

    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        match input {
            Input::Client(message) => self.client(message),
            Input::Process(event) => self.process(event),
            Input::LaunchFailed(reason) => {
                if self.state == RunState::Idle {
                    return Vec::new();
                }
                self.state = RunState::Idle;
                vec![Action::Emit(ServerMessage::Error { error: reason })]
            }
        }
    }

    fn client(&mut self, message: ClientMessage) -> Vec<Action> {
        match (self.state, message) {
            (RunState::Idle, ClientMessage::RunCode { code }) => {
                if code.trim().is_empty() {
                    return vec![Action::Emit(ServerMessage::Error {
                        error: EMPTY_CODE_MESSAGE.to_string(),
                    })];
                }
                self.state = RunState::Running;
                vec![Action::Launch(code)]
            }
            (RunState::AwaitingInput, ClientMessage::InputResponse { input })
                if !input.trim().is_empty() =>
            {
                self.state = RunState::Running;
                vec![Action::WriteStdin(input)]
            }
            (state, message) => {
                warn!(
                    "Ignoring out-of-turn `{}` while {}",
                    message.kind(),
                    state
                );
                Vec::new()
            }
        }
    }

    fn process(&mut self, event: ExecEvent) -> Vec<Action> {
        if self.state == RunState::Idle {
            debug!("Dropping stale process event {:?}", event);
            return Vec::new();
        }

        match event {
            ExecEvent::Output(text) => vec![Action::Emit(ServerMessage::Output { text })],
            ExecEvent::Prompt(prompt) => {
                if self.state == RunState::AwaitingInput {
                    warn!("Process asked for input twice without an answer, dropping prompt");
                    return Vec::new();
                }
                self.state = RunState::AwaitingInput;
                vec![Action::Emit(ServerMessage::InputRequest { prompt })]
            }
            ExecEvent::Exited { code, stderr } => {
                self.state = RunState::Idle;
                match code {
                    Some(0) => {
                        let mut actions = Vec::new();
                        if !stderr.is_empty() {
                            actions.push(Action::Emit(ServerMessage::Output { text: stderr }));
                        }
                        actions.push(Action::Emit(ServerMessage::ExecutionComplete));
                        actions
                    }
                    _ => {
                        let error = if stderr.trim().is_empty() {
                            match code {
                                Some(code) => format!("Process exited with status {}", code),
                                None => "Process was terminated by a signal".to_string(),
                            }
                        } else {
                            stderr
                        };
                        vec![Action::Emit(ServerMessage::Error { error })]
                    }
                }
            }
            ExecEvent::TimedOut => {
                self.state = RunState::Idle;
                vec![Action::Emit(ServerMessage::Error {
                    error: TIMEOUT_MESSAGE.to_string(),
                })]
            }
            ExecEvent::Failed(reason) => {
                self.state = RunState::Idle;
                vec![Action::Emit(ServerMessage::Error { error: reason })]
            }
        }
    }
}
