use revp_docker::{HostObserver, ObserverConfig};
use revp_ssh::{CommandOutput, LineStream, MockRemoteExecutor};
use revp_types::{ConnectionState, ContainerStatus, HostEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INSPECT_WEB: &str = r#"{"Id":"abc123","Name":"/web","State":{"Status":"running"},"Config":{"Image":"nginx:latest","Labels":{"snadboy.revp.80.domain":"app.example.com"}},"NetworkSettings":{"Ports":{"80/tcp":[{"HostIp":"0.0.0.0","HostPort":"8080"}]}}}"#;

fn output(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Executor whose snapshot returns one container and whose event stream
/// is fed by the test
fn scripted_executor(
    stream_tx: Arc<Mutex<Option<mpsc::Sender<String>>>>,
) -> MockRemoteExecutor {
    let mut executor = MockRemoteExecutor::new();

    executor.expect_run().returning(|_, argv, _| {
        if argv.contains(&"ps".to_string()) {
            Ok(output(0, "abc123\n"))
        } else {
            Ok(output(0, &format!("{}\n", INSPECT_WEB)))
        }
    });

    executor.expect_stream().returning(move |_, _| {
        let (tx, rx) = mpsc::channel(16);
        *stream_tx.lock().unwrap() = Some(tx);
        Ok(LineStream::new(rx, CancellationToken::new()))
    });

    executor
}

async fn next_event(events: &mut mpsc::Receiver<HostEvent>) -> HostEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for host event")
        .expect("event channel closed")
}

#[tokio::test]
async fn observer_snapshots_then_follows_events() {
    let stream_tx = Arc::new(Mutex::new(None));
    let executor = Arc::new(scripted_executor(stream_tx.clone()));

    let (events_tx, mut events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let observer = HostObserver::new(
        "h1".to_string(),
        executor,
        events_tx,
        ObserverConfig::default(),
        cancel.clone(),
    );
    let handle = tokio::spawn(observer.run());

    // Connecting, then the authoritative snapshot, then Connected
    match next_event(&mut events).await {
        HostEvent::Connection { host, state } => {
            assert_eq!(host, "h1");
            assert_eq!(state, ConnectionState::Connecting);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        HostEvent::Sync { host, containers } => {
            assert_eq!(host, "h1");
            assert_eq!(containers.len(), 1);
            assert_eq!(containers[0].id, "abc123");
            assert_eq!(containers[0].status, ContainerStatus::Running);
            assert_eq!(containers[0].published_port(80), Some(8080));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        HostEvent::Connection { state, .. } => assert_eq!(state, ConnectionState::Connected),
        other => panic!("unexpected event: {:?}", other),
    }

    // Wait for the observer to subscribe, then inject a start event
    let tx = loop {
        if let Some(tx) = stream_tx.lock().unwrap().clone() {
            break tx;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    tx.send(
        r#"{"Type":"container","Action":"start","Actor":{"ID":"abc123"}}"#.to_string(),
    )
    .await
    .unwrap();

    match next_event(&mut events).await {
        HostEvent::Changed(record) => assert_eq!(record.id, "abc123"),
        other => panic!("unexpected event: {:?}", other),
    }

    // Destroy skips the inspect and reports removal directly
    tx.send(
        r#"{"Type":"container","Action":"destroy","Actor":{"ID":"abc123"}}"#.to_string(),
    )
    .await
    .unwrap();

    match next_event(&mut events).await {
        HostEvent::Removed { host, id } => {
            assert_eq!(host, "h1");
            assert_eq!(id, "abc123");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn observer_halts_on_permanent_failure() {
    let mut executor = MockRemoteExecutor::new();
    executor.expect_run().returning(|_, _, _| {
        Err(revp_ssh::SshError::AuthFailed {
            host: "h1".to_string(),
            detail: "Permission denied".to_string(),
        })
    });
    executor.expect_stream().never();

    let (events_tx, mut events) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let observer = HostObserver::new(
        "h1".to_string(),
        Arc::new(executor),
        events_tx,
        ObserverConfig::default(),
        cancel.clone(),
    );
    let handle = tokio::spawn(observer.run());

    match next_event(&mut events).await {
        HostEvent::Connection { state, .. } => assert_eq!(state, ConnectionState::Connecting),
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        HostEvent::Connection { state, .. } => {
            assert!(matches!(state, ConnectionState::Failed(_)))
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // No retry after a permanent failure; the observer parks
    cancel.cancel();
    handle.await.unwrap();
}
