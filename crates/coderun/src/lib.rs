//! Interactive code execution over a persistent channel.
//!
//! The client side ([`session`], [`channel`]) keeps exactly one run in flight
//! per connection and relays mid-run input prompts. The server side
//! ([`exec`], [`api`]) runs submitted code as a child process and mirrors the
//! same state machine with the roles inverted.

pub mod api;
pub mod channel;
pub mod config;
pub mod exec;
pub mod session;
pub mod upload;

pub use coderun_protocol as protocol;
