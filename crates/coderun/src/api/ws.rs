//! Execution channel: one [`Backend`] and at most one process per WebSocket.

use std::collections::VecDeque;
use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use coderun_protocol::{ClientMessage, Envelope, ServerMessage};

use crate::exec::{Action, Backend, ExecEvent, Execution, Input, launch};

use super::state::AppState;

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().simple().to_string();
    info!("Execution channel {} opened", conn_id);

    let (sender, mut receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let send_task = tokio::spawn(write_loop(sender, out_rx, state.ping_interval));

    let mut backend = Backend::new();
    let mut execution: Option<Execution> = None;

    loop {
        let input = tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(message) => {
                            debug!("[{}] received {}", conn_id, message.kind());
                            Input::Client(message)
                        }
                        Err(e) => {
                            warn!("[{}] ignoring unparseable message: {} - {}", conn_id, e, text.as_str());
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("[{}] socket error: {}", conn_id, e);
                    break;
                }
            },
            event = next_process_event(&mut execution) => {
                Input::Process(event.unwrap_or_else(|| {
                    ExecEvent::Failed("execution ended without a status".to_string())
                }))
            }
        };

        let terminal = matches!(&input, Input::Process(event) if event.is_terminal());
        let actions = backend.handle(input);
        if terminal {
            execution = None;
        }

        if !apply(actions, &state, &mut backend, &mut execution, &out_tx).await {
            break;
        }
    }

    if execution.take().is_some() {
        info!("[{}] client left mid-run, killing process", conn_id);
    }
    drop(out_tx);
    let _ = send_task.await;
    info!("Execution channel {} closed", conn_id);
}

/// Numbers and writes outbound messages; pings on a fixed interval.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
    ping_interval: Duration,
) {
    let mut seq: u64 = 0;
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let json = match serde_json::to_string(&Envelope::new(seq, message)) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                seq += 1;
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
}

async fn next_process_event(execution: &mut Option<Execution>) -> Option<ExecEvent> {
    match execution {
        Some(execution) => execution.next_event().await,
        None => std::future::pending().await,
    }
}

/// Carry out backend actions. Returns `false` once the client is gone.
async fn apply(
    actions: Vec<Action>,
    state: &AppState,
    backend: &mut Backend,
    execution: &mut Option<Execution>,
    outbound: &mpsc::UnboundedSender<ServerMessage>,
) -> bool {
    let mut queue = VecDeque::from(actions);

    while let Some(action) = queue.pop_front() {
        match action {
            Action::Emit(message) => {
                debug!("sending {}", message.kind());
                if outbound.send(message).is_err() {
                    return false;
                }
            }
            Action::Launch(code) => match launch(&state.interactive, &code).await {
                Ok(started) => *execution = Some(started),
                Err(e) => {
                    warn!("Failed to launch code: {}", e);
                    queue.extend(backend.handle(Input::LaunchFailed(e.to_string())));
                }
            },
            Action::WriteStdin(line) => match execution.as_mut() {
                Some(running) => {
                    if let Err(e) = running.send_line(&line).await {
                        warn!("Failed to write input to process: {}", e);
                    }
                }
                None => debug!("No process to receive input"),
            },
        }
    }

    true
}
