//! Shared fixtures: an app that runs code with `sh` and stores uploads in a
//! temporary directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use coderun::api::{self, AppState};
use coderun::protocol::{Envelope, ServerMessage};
use coderun::exec::{FILE_PLACEHOLDER, LaunchSpec};
use coderun::upload::{DisabledOcr, ImageStore, UploadService};

pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn sh_spec(timeout: Duration) -> LaunchSpec {
    LaunchSpec {
        program: "sh".to_string(),
        args: vec![FILE_PLACEHOLDER.to_string()],
        script_suffix: ".sh".to_string(),
        work_dir: None,
        env: HashMap::new(),
        timeout,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub upload_dir: TempDir,
}

pub fn test_state() -> TestApp {
    let upload_dir = tempfile::tempdir().expect("create upload dir");
    let uploads = UploadService::new(ImageStore::new(upload_dir.path()), Arc::new(DisabledOcr));
    let state = AppState::new(
        sh_spec(Duration::from_secs(30)),
        sh_spec(COMPILE_TIMEOUT),
        uploads,
    );
    TestApp { state, upload_dir }
}

pub fn test_app() -> (Router, TestApp) {
    let app = test_state();
    (api::create_router(app.state.clone()), app)
}

/// Serve on an ephemeral port; returns the `ws://` endpoint.
pub async fn spawn_server(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(api::serve(listener, state, std::future::pending()));
    format!("ws://{}/ws", addr)
}

/// Accept one connection, answer the first client frame with a single
/// `output` frame carrying `partial`, then drop the socket without a close
/// handshake. Returns the `ws://` endpoint.
pub async fn spawn_dropping_server(partial: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let frame = serde_json::to_string(&Envelope::new(
        0,
        ServerMessage::Output {
            text: partial.to_string(),
        },
    ))
    .expect("serialize frame");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket handshake");
        let _ = ws.next().await;
        ws.send(Message::Text(frame.into()))
            .await
            .expect("send output frame");
        drop(ws);
    });
    format!("ws://{}/ws", addr)
}
