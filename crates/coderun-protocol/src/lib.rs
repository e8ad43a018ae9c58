//! Wire protocol for the coderun execution channel.
//!
//! One client and one execution backend talk over a single persistent,
//! ordered WebSocket. Every frame is a JSON object tagged by `type`:
//!
//! ```text
//! Client                                   Backend
//!   |  run_code {code}            ------->   |
//!   |  <-------  output {text}               |   (zero or more)
//!   |  <-------  input_request {prompt}       |   (at most one outstanding)
//!   |  input_response {input}     ------->   |
//!   |  <-------  execution_complete | error   |   (exactly one per run)
//! ```
//!
//! Backend frames are wrapped in an [`Envelope`] carrying a per-connection
//! sequence number so a client can restore emission order with a
//! [`Resequencer`] even if the transport ever stops guaranteeing it.

pub mod messages;
pub mod sequence;

pub use messages::{ClientMessage, Envelope, ServerMessage};
pub use sequence::Resequencer;
