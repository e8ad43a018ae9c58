//! Client side of an interactive execution session.
//!
//! ```text
//!   caller ── start / submit ──┐
//!                              ▼
//!   channel ── ServerMessage ─► transition(state, event) ─► effects
//!                                                            │
//!                         Outbound::send ◄── Effect::Send ───┤
//!                         caller       ◄── Effect::Notify ───┘
//! ```
//!
//! The session owns its state and an [`Outbound`] sink. Every call returns
//! the [`Notice`]s it produced, so successes, rejections, protocol violations
//! and connection loss all reach the caller the same way.

mod error;
mod input;
mod machine;
mod output;

use std::collections::VecDeque;

use coderun_protocol::{ClientMessage, ServerMessage};
use log::{debug, info, warn};

use crate::channel::{ChannelEvent, ConnectionError};

pub use error::{ExecutionError, ProtocolViolation, ValidationError};
pub use input::{DEFAULT_PROMPT, InputRelay};
pub use machine::{
    DEFAULT_ERROR, Effect, Event, Notice, RunOutcome, SessionState, Status, Transition,
    transition,
};
pub use output::OutputAggregator;

/// Where a session's outbound messages go.
pub trait Outbound {
    fn send(&mut self, message: ClientMessage) -> Result<(), ConnectionError>;
}

/// Records messages instead of sending them.
impl Outbound for Vec<ClientMessage> {
    fn send(&mut self, message: ClientMessage) -> Result<(), ConnectionError> {
        self.push(message);
        Ok(())
    }
}

/// One execution session bound to one outbound channel.
#[derive(Debug)]
pub struct Session<O> {
    state: SessionState,
    outbound: O,
}

impl<O: Outbound> Session<O> {
    pub fn new(outbound: O) -> Self {
        Self {
            state: SessionState::default(),
            outbound,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Output of the current (or most recent) run.
    pub fn snapshot(&self) -> &str {
        self.state.output().snapshot()
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error()
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.state.pending_prompt()
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.state.last_outcome()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn outbound(&self) -> &O {
        &self.outbound
    }

    pub fn start(&mut self, code: impl Into<String>) -> Vec<Notice> {
        self.dispatch(Event::Start { code: code.into() })
    }

    pub fn submit(&mut self, input: impl Into<String>) -> Vec<Notice> {
        self.dispatch(Event::Submit {
            input: input.into(),
        })
    }

    pub fn receive(&mut self, message: ServerMessage) -> Vec<Notice> {
        self.dispatch(Event::Received(message))
    }

    pub fn connection_lost(&mut self, error: ConnectionError) -> Vec<Notice> {
        self.dispatch(Event::ChannelLost(error))
    }

    /// Feed one event from the transport.
    pub fn handle(&mut self, event: ChannelEvent) -> Vec<Notice> {
        match event {
            ChannelEvent::Message(message) => self.receive(message),
            ChannelEvent::Closed(error) => self.connection_lost(error),
        }
    }

    /// Run an event through the machine and carry out its effects.
    ///
    /// A failed send becomes a `ChannelLost` event processed right after.
    pub fn dispatch(&mut self, event: Event) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let Transition { state, effects } =
                transition(std::mem::take(&mut self.state), event);
            self.state = state;

            for effect in effects {
                match effect {
                    Effect::Send(message) => {
                        debug!("sending {}", message.kind());
                        if let Err(err) = self.outbound.send(message) {
                            queue.push_back(Event::ChannelLost(err));
                        }
                    }
                    Effect::Notify(notice) => {
                        log_notice(&notice);
                        notices.push(notice);
                    }
                }
            }
        }

        notices
    }
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::ProtocolViolation(violation) => {
            warn!("ignoring protocol violation: {}", violation);
        }
        Notice::Rejected(err) => debug!("rejected locally: {}", err),
        Notice::Disconnected(err) => info!("session channel lost: {}", err),
        Notice::RunFailed(err) => debug!("run failed: {}", err),
        _ => {}
    }
}
