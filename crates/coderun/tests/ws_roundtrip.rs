//! Live round-trips: client session and channel against a real server.

use std::time::Duration;

use coderun::channel::{Channel, ChannelSender, ConnectionError};
use coderun::session::{Notice, RunOutcome, Session, Status};

mod common;
use common::{spawn_dropping_server, spawn_server, test_state};

const WAIT: Duration = Duration::from_secs(10);

/// Drive channel events into the session until `done` says stop.
async fn pump<F>(
    channel: &mut Channel,
    session: &mut Session<ChannelSender>,
    mut done: F,
) -> Vec<Notice>
where
    F: FnMut(&Notice) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(WAIT, channel.next_event())
            .await
            .expect("timed out waiting for server")
            .expect("channel shut down");
        for notice in session.handle(event) {
            let stop = done(&notice);
            seen.push(notice);
            if stop {
                return seen;
            }
        }
    }
}

fn is_terminal(notice: &Notice) -> bool {
    matches!(
        notice,
        Notice::RunCompleted | Notice::RunFailed(_) | Notice::Disconnected(_)
    )
}

#[tokio::test]
async fn test_run_with_prompt_and_reply() {
    let fixture = test_state();
    let endpoint = spawn_server(fixture.state.clone()).await;
    let mut channel = Channel::open(&endpoint).await.unwrap();
    let mut session = Session::new(channel.sender());

    let code = "echo start\nprintf '\\033]coderun;input;Name: \\007'\nread name\necho \"Hi $name\"\n";
    assert_eq!(session.start(code), vec![Notice::RunStarted]);

    let seen = pump(&mut channel, &mut session, |n| {
        matches!(n, Notice::InputRequested { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&Notice::InputRequested {
            prompt: "Name: ".into()
        })
    );
    assert_eq!(session.status(), Status::AwaitingInput);

    assert_eq!(session.submit("Ada"), vec![Notice::InputSent]);
    pump(&mut channel, &mut session, is_terminal).await;

    assert_eq!(session.last_outcome(), Some(RunOutcome::Completed));
    assert_eq!(session.snapshot(), "start\nHi Ada\n");
    assert_eq!(session.status(), Status::Idle);

    channel.close().await;
}

#[tokio::test]
async fn test_failed_run_then_reuse_session() {
    let fixture = test_state();
    let endpoint = spawn_server(fixture.state.clone()).await;
    let mut channel = Channel::open(&endpoint).await.unwrap();
    let mut session = Session::new(channel.sender());

    session.start("echo 'Traceback...' >&2\nexit 1\n");
    let seen = pump(&mut channel, &mut session, is_terminal).await;
    assert!(matches!(seen.last(), Some(Notice::RunFailed(_))));
    assert_eq!(session.error(), Some("Traceback...\n"));

    session.start("echo again\n");
    pump(&mut channel, &mut session, is_terminal).await;
    assert_eq!(session.last_outcome(), Some(RunOutcome::Completed));
    assert_eq!(session.snapshot(), "again\n");

    channel.close().await;
}

#[tokio::test]
async fn test_timeout_reported_as_execution_error() {
    let mut fixture = test_state();
    fixture.state.interactive = std::sync::Arc::new(common::sh_spec(Duration::from_millis(300)));
    let endpoint = spawn_server(fixture.state.clone()).await;
    let mut channel = Channel::open(&endpoint).await.unwrap();
    let mut session = Session::new(channel.sender());

    session.start("sleep 10\n");
    pump(&mut channel, &mut session, is_terminal).await;
    assert_eq!(session.error(), Some("Code execution timed out"));
    assert!(!session.is_closed());

    channel.close().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_disconnect_kills_running_process() {
    let fixture = test_state();
    let endpoint = spawn_server(fixture.state.clone()).await;
    let mut channel = Channel::open(&endpoint).await.unwrap();
    let mut session = Session::new(channel.sender());

    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    session.start(format!(
        "echo $$ > '{}'\nexec sleep 30\n",
        pid_file.display()
    ));

    let pid = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(&pid_file).await {
                if text.ends_with('\n') {
                    return text.trim().to_string();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process never wrote its pid");
    let proc_dir = std::path::Path::new("/proc").join(&pid);
    assert!(proc_dir.exists());

    channel.close().await;

    tokio::time::timeout(WAIT, async {
        while proc_dir.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process still running after the client left");
}

#[tokio::test]
async fn test_server_drop_mid_run_disconnects_once() {
    let endpoint = spawn_dropping_server("partial").await;
    let mut channel = Channel::open(&endpoint).await.unwrap();
    let mut session = Session::new(channel.sender());

    assert_eq!(session.start("sleep 30\n"), vec![Notice::RunStarted]);
    let mut seen = pump(&mut channel, &mut session, is_terminal).await;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), channel.next_event()).await
    {
        seen.extend(session.handle(event));
    }

    let disconnects = seen
        .iter()
        .filter(|n| matches!(n, Notice::Disconnected(ConnectionError::Dropped(_))))
        .count();
    assert_eq!(disconnects, 1, "{:?}", seen);
    assert!(!seen.iter().any(|n| matches!(n, Notice::RunFailed(_))));
    assert_eq!(session.snapshot(), "partial");
    assert!(session.is_closed());

    assert_eq!(
        session.start("echo again\n"),
        vec![Notice::Disconnected(ConnectionError::Closed)]
    );
    assert_eq!(
        session.submit("x"),
        vec![Notice::Disconnected(ConnectionError::Closed)]
    );
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Channel::open(&format!("ws://{}/ws", addr))
        .await
        .err()
        .expect("connect should fail");
    assert!(matches!(err, ConnectionError::Connect { .. }));
}
