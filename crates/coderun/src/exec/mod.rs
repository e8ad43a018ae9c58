//! Execution backend.
//!
//! ```text
//!  WebSocket ──ClientMessage──► Backend ──Action::Launch──► launch() ──► child process
//!      ▲                          │  ▲                                       │
//!      └──────ServerMessage───────┘  └──────────── ExecEvent ◄── demux ◄─────┘ stdout
//! ```

mod backend;
mod demux;
mod launch;
mod utf8;

pub use backend::{Action, Backend, EMPTY_CODE_MESSAGE, Input, RunState, TIMEOUT_MESSAGE};
pub use demux::{Chunk, MARKER_CLOSE, MARKER_OPEN, MAX_PROMPT_BYTES, MarkerDemux};
pub use launch::{
    ExecEvent, Execution, FILE_PLACEHOLDER, LaunchError, LaunchSpec, PRELUDE_PLACEHOLDER,
    PYTHON_PRELUDE, RunEnd, RunReport, launch,
};
pub use utf8::Utf8Assembler;
