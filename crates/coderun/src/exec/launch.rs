//! Launching submitted code as a child process.
//!
//! The code is written to a scratch file and handed to the configured
//! interpreter with piped stdio. A supervisor task pumps stdout through the
//! marker demultiplexer and UTF-8 assembler, collects stderr, enforces the
//! wall-clock limit, and reports everything on one ordered event channel.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use super::demux::{Chunk, MarkerDemux};
use super::utf8::Utf8Assembler;

/// Placeholder in `args` replaced by the scratch file path.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Placeholder in `args` replaced by [`PYTHON_PRELUDE`].
pub const PRELUDE_PLACEHOLDER: &str = "{prelude}";

/// Installed before user code when running under Python.
///
/// Replaces `input()` so a blocking read is announced on stdout with the
/// marker understood by [`MarkerDemux`], then runs the scratch file as
/// `__main__`. Tracebacks start at the first frame of the user's file.
pub const PYTHON_PRELUDE: &str = r#"import builtins, os, runpy, sys, traceback

def _coderun_input(prompt=""):
    sys.stdout.write("\x1b]coderun;input;" + str(prompt).replace("\x07", "") + "\x07")
    sys.stdout.flush()
    line = sys.stdin.readline()
    if not line:
        raise EOFError("EOF when reading a line")
    return line[:-1] if line.endswith("\n") else line

def _coderun_main(path):
    sys.argv = sys.argv[1:]
    sys.path[0] = os.path.dirname(os.path.abspath(path))
    try:
        runpy.run_path(path, run_name="__main__")
    except SystemExit:
        raise
    except BaseException as exc:
        tb = exc.__traceback__
        while tb is not None and tb.tb_frame.f_code.co_filename != path:
            tb = tb.tb_next
        traceback.print_exception(type(exc), exc, tb)
        sys.exit(1)

builtins.input = _coderun_input
_coderun_main(sys.argv[1])
"#;

const READ_CHUNK: usize = 4096;
const EVENT_BUFFER_SIZE: usize = 64;

/// How to start one run.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Suffix of the scratch file (e.g. `.py`).
    pub script_suffix: String,
    pub work_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl LaunchSpec {
    /// `python3 -u -c {prelude} {file}`.
    pub fn python(timeout: Duration) -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![
                "-u".to_string(),
                "-c".to_string(),
                PRELUDE_PLACEHOLDER.to_string(),
                FILE_PLACEHOLDER.to_string(),
            ],
            script_suffix: ".py".to_string(),
            work_dir: None,
            env: HashMap::new(),
            timeout,
        }
    }

    fn expand_args(&self, script: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace(PRELUDE_PLACEHOLDER, PYTHON_PRELUDE)
                    .replace(FILE_PLACEHOLDER, script)
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to write code to a scratch file: {0}")]
    Script(#[source] std::io::Error),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
}

/// Everything a running process reports, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// Decoded stdout text.
    Output(String),
    /// The program is blocked waiting for a line of input.
    Prompt(String),
    /// The process exited. `code` is `None` when killed by a signal.
    Exited { code: Option<i32>, stderr: String },
    /// The wall-clock limit was hit; the process was killed.
    TimedOut,
    /// Waiting on the process failed.
    Failed(String),
}

impl ExecEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecEvent::Exited { .. } | ExecEvent::TimedOut | ExecEvent::Failed(_)
        )
    }
}

/// How a non-interactive run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Exited(Option<i32>),
    TimedOut,
    Failed(String),
}

/// Collected result of a run driven to completion with stdin closed.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub output: String,
    pub errors: String,
    pub end: RunEnd,
}

/// Handle to a running process. Dropping it kills the process.
#[derive(Debug)]
pub struct Execution {
    stdin: Option<ChildStdin>,
    events: mpsc::Receiver<ExecEvent>,
    _cancel: oneshot::Sender<()>,
}

impl Execution {
    /// Write one line to the program's stdin.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin is closed")
        })?;
        stdin.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await
    }

    /// Signal end of input to the program.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    pub async fn next_event(&mut self) -> Option<ExecEvent> {
        self.events.recv().await
    }

    /// Drive the run to its end with stdin closed, collecting all output.
    ///
    /// Prompts are folded into the output, as a terminal would show them.
    pub async fn run_to_completion(mut self) -> RunReport {
        self.close_stdin();
        let mut output = String::new();

        while let Some(event) = self.next_event().await {
            match event {
                ExecEvent::Output(text) | ExecEvent::Prompt(text) => output.push_str(&text),
                ExecEvent::Exited { code, stderr } => {
                    return RunReport {
                        output,
                        errors: stderr,
                        end: RunEnd::Exited(code),
                    };
                }
                ExecEvent::TimedOut => {
                    return RunReport {
                        output,
                        errors: String::new(),
                        end: RunEnd::TimedOut,
                    };
                }
                ExecEvent::Failed(reason) => {
                    return RunReport {
                        output,
                        errors: String::new(),
                        end: RunEnd::Failed(reason),
                    };
                }
            }
        }

        RunReport {
            output,
            errors: String::new(),
            end: RunEnd::Failed("execution ended without a status".to_string()),
        }
    }
}

/// Start `code` under `spec`.
pub async fn launch(spec: &LaunchSpec, code: &str) -> Result<Execution, LaunchError> {
    let suffix = spec.script_suffix.clone();
    let source = code.to_owned();
    let script = tokio::task::spawn_blocking(move || write_script(&suffix, &source))
        .await
        .map_err(|e| LaunchError::Script(std::io::Error::other(e)))?
        .map_err(LaunchError::Script)?;

    let script_path = script.path().to_string_lossy().into_owned();
    let mut cmd = Command::new(&spec.program);
    cmd.args(spec.expand_args(&script_path));
    if let Some(ref dir) = spec.work_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(&spec.env);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let pid = child.id();
    info!("Started {} (pid={:?}) for {}", spec.program, pid, script_path);

    let stdin = child.stdin.take().ok_or(LaunchError::MissingPipe("stdin"))?;
    let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;

    let (event_tx, events) = mpsc::channel(EVENT_BUFFER_SIZE);
    let (cancel_tx, cancel_rx) = oneshot::channel();

    tokio::spawn(supervise(
        child,
        stdout,
        stderr,
        script,
        event_tx,
        cancel_rx,
        spec.timeout,
    ));

    Ok(Execution {
        stdin: Some(stdin),
        events,
        _cancel: cancel_tx,
    })
}

fn write_script(suffix: &str, code: &str) -> std::io::Result<NamedTempFile> {
    let mut script = tempfile::Builder::new()
        .prefix("coderun-")
        .suffix(suffix)
        .tempfile()?;
    script.write_all(code.as_bytes())?;
    script.flush()?;
    Ok(script)
}

async fn supervise(
    mut child: Child,
    stdout: impl AsyncRead + Unpin,
    stderr: impl AsyncRead + Unpin,
    script: NamedTempFile,
    tx: mpsc::Sender<ExecEvent>,
    mut cancel: oneshot::Receiver<()>,
    limit: Duration,
) {
    let outcome = {
        let run = async {
            let ((), stderr) = tokio::join!(pump_stdout(stdout, &tx), read_all(stderr));
            let status = child.wait().await;
            (status, stderr)
        };
        tokio::select! {
            res = tokio::time::timeout(limit, run) => Some(res),
            _ = &mut cancel => None,
        }
    };

    let event = match outcome {
        None => {
            debug!("Execution abandoned, killing process");
            let _ = child.kill().await;
            return;
        }
        Some(Err(_)) => {
            warn!("Execution exceeded {:?}, killing process", limit);
            let _ = child.kill().await;
            ExecEvent::TimedOut
        }
        Some(Ok((Ok(status), stderr))) => {
            debug!("Process exited with {}", status);
            ExecEvent::Exited {
                code: status.code(),
                stderr,
            }
        }
        Some(Ok((Err(e), _))) => ExecEvent::Failed(format!("failed to wait for process: {}", e)),
    };

    drop(script);
    let _ = tx.send(event).await;
}

async fn pump_stdout(mut stdout: impl AsyncRead + Unpin, tx: &mpsc::Sender<ExecEvent>) {
    let mut demux = MarkerDemux::new();
    let mut text = Utf8Assembler::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to read process stdout: {}", e);
                break;
            }
        };
        for chunk in demux.feed(&buf[..n]) {
            forward(chunk, &mut text, tx).await;
        }
    }

    if let Some(chunk) = demux.finish() {
        forward(chunk, &mut text, tx).await;
    }
    let tail = text.finish();
    if !tail.is_empty() {
        let _ = tx.send(ExecEvent::Output(tail)).await;
    }
}

async fn forward(chunk: Chunk, text: &mut Utf8Assembler, tx: &mpsc::Sender<ExecEvent>) {
    match chunk {
        Chunk::Output(bytes) => {
            let decoded = text.push(&bytes);
            if !decoded.is_empty() {
                let _ = tx.send(ExecEvent::Output(decoded)).await;
            }
        }
        Chunk::Prompt(bytes) => {
            let held = text.finish();
            if !held.is_empty() {
                let _ = tx.send(ExecEvent::Output(held)).await;
            }
            let prompt = String::from_utf8_lossy(&bytes).into_owned();
            let _ = tx.send(ExecEvent::Prompt(prompt)).await;
        }
    }
}

async fn read_all(mut reader: impl AsyncRead + Unpin) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = reader.read_to_end(&mut bytes).await {
        warn!("Failed to read process stderr: {}", e);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
