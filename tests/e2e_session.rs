//! End-to-end session tests over an in-memory duplex transport.
//!
//! Both peers run a full connection (handshake, pumps, dealers); only
//! the byte stream is in-memory.

use std::sync::Arc;
use std::time::Duration;

use peerwire::{Connection, JsonCodec, ProtocolError, ResponseKind, Role};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    from: String,
    text: String,
}

/// Establish two fully connected peers over an in-memory stream.
async fn connected_pair() -> (Connection, Connection) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let (client, server) = tokio::io::duplex(64 * 1024);
    let acceptor = tokio::spawn(Connection::establish(
        server,
        Role::Acceptor,
        Arc::new(JsonCodec::new()),
    ));
    let a = Connection::establish(client, Role::Initiator, Arc::new(JsonCodec::new()))
        .await
        .expect("initiator handshake failed");
    let b = acceptor
        .await
        .unwrap()
        .expect("acceptor handshake failed");
    (a, b)
}

#[tokio::test]
async fn test_request_gets_terminal_done_response() {
    let (a, b) = connected_pair().await;

    b.on_request("sum", |req, res| async move {
        let operands: Vec<i64> = req.read_to().unwrap();
        res.done(&operands.iter().sum::<i64>()).await.unwrap();
    })
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();
    a.send_request("sum", &vec![1, 2], false, move |res| {
        let tx = tx.clone();
        async move {
            assert!(res.is_done());
            tx.send(res.read_to().unwrap()).unwrap();
        }
    })
    .await
    .unwrap();

    let total = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no response within timeout")
        .unwrap();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn test_progress_responses_arrive_in_order_before_terminal() {
    let (a, b) = connected_pair().await;

    b.on_request("steps", |_req, res| async move {
        res.progress(&"a").await.unwrap();
        res.progress(&"b").await.unwrap();
        res.done(&"c").await.unwrap();
    })
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<(Option<ResponseKind>, String)>();
    a.send_request("steps", &(), true, move |res| {
        let tx = tx.clone();
        async move {
            tx.send((res.kind(), res.read_to().unwrap())).unwrap();
        }
    })
    .await
    .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let item = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("response callbacks did not arrive")
            .unwrap();
        seen.push(item);
    }
    assert_eq!(
        seen,
        vec![
            (Some(ResponseKind::Progress), "a".to_string()),
            (Some(ResponseKind::Progress), "b".to_string()),
            (Some(ResponseKind::Done), "c".to_string()),
        ]
    );
    // The terminal response ended the exchange; nothing else may arrive.
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_events_fan_out_to_every_subscriber() {
    let (a, b) = connected_pair().await;

    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ChatMessage)>();
    for slot in 0..3 {
        let tx = tx.clone();
        b.on_event("chat.message", move |event| {
            let tx = tx.clone();
            async move {
                tx.send((slot, event.read_to().unwrap())).unwrap();
            }
        });
    }

    let message = ChatMessage {
        from: "alice".into(),
        text: "Hello".into(),
    };
    a.send_event("chat.message", &message).await.unwrap();

    let mut slots = Vec::new();
    for _ in 0..3 {
        let (slot, received) = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("not every subscriber saw the event")
            .unwrap();
        assert_eq!(received, message);
        slots.push(slot);
    }
    slots.sort_unstable();
    assert_eq!(slots, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_event_without_subscriber_does_not_disturb_the_session() {
    let (a, b) = connected_pair().await;

    a.send_event("nobody.listens", &"dropped").await.unwrap();

    // The session keeps working after the unroutable event.
    b.on_request("echo", |req, res| async move {
        let text: String = req.read_to().unwrap();
        res.done(&text).await.unwrap();
    })
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    a.send_request("echo", &"still alive", false, move |res| {
        let tx = tx.clone();
        async move {
            tx.send(res.read_to().unwrap()).unwrap();
        }
    })
    .await
    .unwrap();

    let echoed = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("session stalled after unroutable event")
        .unwrap();
    assert_eq!(echoed, "still alive");
}

#[tokio::test]
async fn test_cancel_aborts_remote_handler_and_reports_cancelled() {
    let (a, b) = connected_pair().await;

    let (started_tx, mut started_rx) = mpsc::unbounded_channel::<()>();
    b.on_request("slow", move |_req, _res| {
        let started_tx = started_tx.clone();
        async move {
            started_tx.send(()).unwrap();
            std::future::pending::<()>().await;
        }
    })
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<Option<ResponseKind>>();
    let request_id = a
        .send_request("slow", &(), false, move |res| {
            let tx = tx.clone();
            async move {
                tx.send(res.kind()).unwrap();
            }
        })
        .await
        .unwrap();

    // Wait until the remote handler is actually running before cancelling.
    timeout(Duration::from_secs(5), started_rx.recv())
        .await
        .expect("remote handler never started")
        .unwrap();
    a.cancel_request(request_id).await.unwrap();

    let kind = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no cancelled response")
        .unwrap();
    assert_eq!(kind, Some(ResponseKind::Cancelled));
}

#[tokio::test]
async fn test_duplicate_request_handler_registration_is_rejected() {
    let (_a, b) = connected_pair().await;

    b.on_request("sum", |_req, _res| async {}).unwrap();
    let err = b.on_request("sum", |_req, _res| async {}).unwrap_err();
    assert!(matches!(err, ProtocolError::AlreadyRegistered(_)));
}

#[tokio::test]
async fn test_error_response_is_terminal() {
    let (a, b) = connected_pair().await;

    b.on_request("fails", |_req, res| async move {
        res.error(&"boom").await.unwrap();
    })
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<(Option<ResponseKind>, String)>();
    a.send_request("fails", &(), false, move |res| {
        let tx = tx.clone();
        async move {
            tx.send((res.kind(), res.read_to().unwrap())).unwrap();
        }
    })
    .await
    .unwrap();

    let (kind, body) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no error response")
        .unwrap();
    assert_eq!(kind, Some(ResponseKind::Error));
    assert_eq!(body, "boom");
}

#[tokio::test]
async fn test_close_terminates_the_peer_session() {
    let (a, b) = connected_pair().await;

    a.close("done for today").await.unwrap();

    timeout(Duration::from_secs(5), b.closed())
        .await
        .expect("peer session did not observe the close");

    // The closed peer's senders now fail fast.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.send_event("anything", &()).await.is_err());
}

#[tokio::test]
async fn test_dropping_a_peer_resolves_closed_on_the_other() {
    let (a, b) = connected_pair().await;
    drop(b);

    timeout(Duration::from_secs(5), a.closed())
        .await
        .expect("surviving peer did not observe the disconnect");
}

#[tokio::test]
async fn test_drain_waits_for_running_handlers() {
    let (a, b) = connected_pair().await;

    let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
    let gate_rx = Arc::new(tokio::sync::Mutex::new(Some(gate_rx)));
    b.on_event("gated", move |_event| {
        let gate_rx = Arc::clone(&gate_rx);
        async move {
            if let Some(rx) = gate_rx.lock().await.take() {
                let _ = rx.await;
            }
        }
    });

    a.send_event("gated", &()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The handler is parked on the gate, so drain must not finish yet.
    assert!(
        timeout(Duration::from_millis(100), b.drain()).await.is_err(),
        "drain finished while a handler was still running"
    );

    gate_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), b.drain())
        .await
        .expect("drain did not finish after the handler completed");
}
