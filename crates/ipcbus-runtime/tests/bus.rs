//! Bus behaviour over an in-memory transport pair.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;

use ipcbus_core::{BusError, Envelope, Inbound, RequestError, Transport};
use ipcbus_runtime::{Bus, Notification};
use ipcbus_transport::{MemoryTransport, StreamTransport};

/// A bus plus the raw far end of its transport, for scripting the peer by hand.
fn scripted_bus(timeout: Duration) -> (Bus, MemoryTransport, Inbound) {
    let (local, remote) = MemoryTransport::pair();
    let wire = remote.take_inbound().unwrap();
    let bus = Bus::builder(Arc::new(local))
        .request_timeout(timeout)
        .build()
        .unwrap();
    (bus, remote, wire)
}

/// Two buses talking to each other; the worker answers `+` and `echo`.
fn connected_buses() -> (Bus, Arc<Bus>) {
    let (local, remote) = MemoryTransport::pair();
    let parent = Bus::new(Arc::new(local)).unwrap();
    let worker = Arc::new(Bus::new(Arc::new(remote)).unwrap());

    let mut requests = worker.subscribe();
    let responder = Arc::clone(&worker);
    tokio::spawn(async move {
        while let Some(notification) = requests.recv().await {
            let Notification::Request(request) = notification else {
                continue;
            };
            let payload = request.payload.clone().unwrap_or(Value::Null);
            let result = match request.cmd() {
                "+" => {
                    let sum = payload["a"].as_i64().unwrap_or(0) + payload["b"].as_i64().unwrap_or(0);
                    json!(sum)
                }
                "echo" => payload,
                _ => continue,
            };
            let _ = responder.respond_to(&request, result);
        }
    });

    (parent, worker)
}

async fn next_request_id(wire: &mut Inbound) -> String {
    let sent = wire.recv().await.unwrap();
    let envelope = Envelope::parse(sent).unwrap();
    envelope.id().unwrap().to_string()
}

#[tokio::test]
async fn test_round_trip_resolves_with_response_payload() {
    let (parent, _worker) = connected_buses();

    let result = parent.request("+", json!({ "a": 5, "b": 7 })).await.unwrap();
    assert_eq!(result, json!(12));
    assert_eq!(parent.pending_count(), 0);
}

#[tokio::test]
async fn test_many_sequential_requests() {
    let (parent, _worker) = connected_buses();

    for i in 0..100 {
        let result = parent.request("+", json!({ "a": i, "b": i })).await.unwrap();
        assert_eq!(result, json!(2 * i));
    }
    assert_eq!(parent.pending_count(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_each_get_their_own_payload() {
    let (parent, _worker) = connected_buses();

    let requests = (0..20).map(|i| parent.request("echo", json!({ "n": i })));
    let results = join_all(requests).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!({ "n": i }));
    }
}

#[tokio::test]
async fn test_out_of_order_responses() {
    let (bus, remote, mut wire) = scripted_bus(Duration::from_secs(5));

    let a = bus.request("first", json!({}));
    let b = bus.request("second", json!({}));
    let id_a = next_request_id(&mut wire).await;
    let id_b = next_request_id(&mut wire).await;
    assert_eq!(a.id(), Some(id_a.as_str()));
    assert_eq!(b.id(), Some(id_b.as_str()));

    remote
        .send(Envelope::response(&id_b, "second", Some(json!("B"))).into_value())
        .unwrap();
    remote
        .send(Envelope::response(&id_a, "first", Some(json!("A"))).into_value())
        .unwrap();

    assert_eq!(b.await.unwrap(), json!("B"));
    assert_eq!(a.await.unwrap(), json!("A"));
}

#[tokio::test]
async fn test_response_without_payload_resolves_null() {
    let (bus, remote, mut wire) = scripted_bus(Duration::from_secs(5));

    let response = bus.request("ping", json!({}));
    let id = next_request_id(&mut wire).await;
    remote
        .send(Envelope::response(&id, "ping", None).into_value())
        .unwrap();

    assert_eq!(response.await.unwrap(), Value::Null);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_names_command() {
    let (bus, _remote, _wire) = scripted_bus(Duration::from_secs(5));

    let start = Instant::now();
    let response = bus.request_with_timeout("noop", json!({}), Duration::from_millis(50));
    let id = response.id().unwrap().to_string();

    let err = response.await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout());
    assert!(err.to_string().contains("noop"));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(100));
    assert!(!bus.is_pending(&id));
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_applies() {
    let (bus, _remote, _wire) = scripted_bus(Duration::from_millis(200));

    let start = Instant::now();
    let err = bus.request("noop", json!({})).await.unwrap_err();

    assert!(matches!(err, RequestError::Timeout { timeout, .. } if timeout == Duration::from_millis(200)));
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_late_response_after_timeout_is_dropped() {
    let (bus, remote, mut wire) = scripted_bus(Duration::from_secs(5));
    let mut notifications = bus.subscribe();

    let response = bus.request_with_timeout("slow", json!({}), Duration::from_millis(10));
    let id = next_request_id(&mut wire).await;
    assert!(response.await.unwrap_err().is_timeout());

    remote
        .send(Envelope::response(&id, "slow", Some(json!(1))).into_value())
        .unwrap();

    // Still observable, but settles nothing.
    let notification = notifications.recv().await.unwrap();
    assert_eq!(notification.name(), "response");
    assert_eq!(bus.pending_count(), 0);
}

#[tokio::test]
async fn test_resolved_request_leaves_table() {
    let (bus, remote, mut wire) = scripted_bus(Duration::from_secs(5));

    let response = bus.request("+", json!({ "a": 1, "b": 1 }));
    let id = next_request_id(&mut wire).await;
    assert!(bus.is_pending(&id));

    remote
        .send(Envelope::response(&id, "+", Some(json!(2))).into_value())
        .unwrap();
    assert_eq!(response.await.unwrap(), json!(2));
    assert!(!bus.is_pending(&id));
}

#[tokio::test]
async fn test_duplicate_response_settles_once() {
    let (bus, remote, mut wire) = scripted_bus(Duration::from_secs(5));
    let mut notifications = bus.subscribe();

    let response = bus.request("+", json!({}));
    let id = next_request_id(&mut wire).await;
    for payload in [1, 2] {
        remote
            .send(Envelope::response(&id, "+", Some(json!(payload))).into_value())
            .unwrap();
    }

    assert_eq!(response.await.unwrap(), json!(1));
    notifications.recv().await.unwrap();
    notifications.recv().await.unwrap();
    assert_eq!(bus.pending_count(), 0);
}

#[tokio::test]
async fn test_destroy_cancels_all_pending() {
    let (bus, _remote, _wire) = scripted_bus(Duration::from_secs(5));

    let pending: Vec<_> = (0..5).map(|i| bus.request(format!("job-{i}"), json!(i))).collect();
    assert_eq!(bus.pending_count(), 5);

    bus.destroy();

    for (i, result) in join_all(pending).await.into_iter().enumerate() {
        match result {
            Err(RequestError::Cancelled { cmd }) => assert_eq!(cmd, format!("job-{i}")),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
    assert_eq!(bus.pending_count(), 0);
}

#[tokio::test]
async fn test_inbound_after_destroy_is_ignored() {
    let (bus, remote, _wire) = scripted_bus(Duration::from_secs(5));
    let mut notifications = bus.subscribe();

    bus.destroy();
    // The inbound stream may already be gone; either way nothing is processed.
    let _ = remote.send(Envelope::event("late", None).into_value());
    let _ = remote.send(json!("garbage"));
    tokio::task::yield_now().await;

    assert_eq!(notifications.recv().await, None);
    assert_eq!(bus.subscribe().recv().await, None);
}

#[tokio::test]
async fn test_notifications_end_when_peer_goes_away() {
    let (bus, remote, _wire) = scripted_bus(Duration::from_secs(5));
    let mut notifications = bus.subscribe();

    remote.send(Envelope::event("bye", None).into_value()).unwrap();
    drop(remote);

    assert_eq!(notifications.recv().await.unwrap().name(), "event");
    assert_eq!(notifications.recv().await, None);
}

#[tokio::test]
async fn test_request_burst_is_delivered_in_full() {
    let (bus, remote, _wire) = scripted_bus(Duration::from_secs(5));
    let mut notifications = bus.subscribe();

    for i in 0..1000 {
        remote
            .send(Envelope::request(format!("r{i}"), "+", Some(json!(i))).into_value())
            .unwrap();
    }
    // Let the pump dispatch the whole burst before anything is read.
    tokio::time::timeout(Duration::from_secs(5), async {
        while notifications.len() < 1000 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    for i in 0..1000 {
        match notifications.recv().await.unwrap() {
            Notification::Request(request) => {
                assert_eq!(request.id(), Some(format!("r{i}").as_str()));
            }
            other => panic!("expected a request, got {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_from_thread_outside_runtime() {
    let (parent, _worker) = connected_buses();
    let parent = Arc::new(parent);

    let caller = Arc::clone(&parent);
    let result = tokio::task::spawn_blocking(move || {
        std::thread::spawn(move || {
            futures::executor::block_on(caller.request("+", json!({ "a": 2, "b": 3 })))
        })
        .join()
        .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap(), json!(5));
    assert_eq!(parent.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_from_thread_outside_runtime() {
    let (bus, _remote, _wire) = scripted_bus(Duration::from_secs(5));
    let bus = Arc::new(bus);

    let caller = Arc::clone(&bus);
    let result = tokio::task::spawn_blocking(move || {
        std::thread::spawn(move || {
            let response = caller.request_with_timeout("noop", json!({}), Duration::from_millis(20));
            futures::executor::block_on(response)
        })
        .join()
        .unwrap()
    })
    .await
    .unwrap();

    assert!(result.unwrap_err().is_timeout());
}

#[test]
fn test_build_outside_runtime_fails() {
    let (local, _remote) = MemoryTransport::pair();
    assert!(matches!(
        Bus::new(Arc::new(local)),
        Err(BusError::NoRuntime(_))
    ));
}

#[tokio::test]
async fn test_calls_after_destroy_fail_fast() {
    let (bus, _remote, _wire) = scripted_bus(Duration::from_secs(5));
    bus.destroy();

    let response = bus.request("+", json!({}));
    assert_eq!(response.id(), None);
    assert!(matches!(response.await, Err(RequestError::Destroyed)));

    assert!(matches!(bus.event("e", json!({})), Err(BusError::Destroyed)));
    assert!(matches!(bus.task("t", json!({})), Err(BusError::Destroyed)));
    assert!(matches!(bus.message(json!("m")), Err(BusError::Destroyed)));
    assert!(matches!(
        bus.response("id", "+", json!(1)),
        Err(BusError::Destroyed)
    ));
    assert!(matches!(bus.send_raw(json!({})), Err(BusError::Destroyed)));
}

#[tokio::test]
async fn test_malformed_inbound_raises_one_invalid_message() {
    let (bus, remote, _wire) = scripted_bus(Duration::from_secs(5));
    let mut notifications = bus.subscribe();
    let _pending = bus.request("+", json!({}));

    remote.send(json!("This is an invalid message!")).unwrap();

    let notification = notifications.recv().await.unwrap();
    assert_eq!(
        notification,
        Notification::InvalidMessage(json!("This is an invalid message!"))
    );
    tokio::task::yield_now().await;
    assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(bus.pending_count(), 1);
}

#[tokio::test]
async fn test_garbage_bytes_on_stream_do_not_lose_later_responses() {
    let (local, remote) = tokio::io::duplex(4096);
    let (local_read, local_write) = tokio::io::split(local);
    let bus = Bus::new(Arc::new(StreamTransport::new(local_read, local_write))).unwrap();
    let mut notifications = bus.subscribe();

    let (remote_read, mut remote_write) = tokio::io::split(remote);
    let mut sent = BufReader::new(remote_read).lines();

    let response = bus.request("+", json!({ "a": 1, "b": 1 }));
    let request: Value = serde_json::from_str(&sent.next_line().await.unwrap().unwrap()).unwrap();
    let id = request["header"]["id"].as_str().unwrap().to_string();

    remote_write.write_all(b"\xff\xfe\n").await.unwrap();
    let reply = Envelope::response(&id, "+", Some(json!(2))).into_value();
    remote_write
        .write_all(format!("{reply}\n").as_bytes())
        .await
        .unwrap();

    assert_eq!(notifications.recv().await.unwrap().name(), "invalidMessage");
    assert_eq!(response.await.unwrap(), json!(2));
    assert_eq!(notifications.recv().await.unwrap().name(), "response");
}

#[tokio::test]
async fn test_response_without_id_is_invalid() {
    let (bus, remote, _wire) = scripted_bus(Duration::from_secs(5));
    let mut notifications = bus.subscribe();

    remote
        .send(json!({ "header": { "cmd": "+", "type": 1 }, "payload": 12 }))
        .unwrap();

    assert_eq!(notifications.recv().await.unwrap().name(), "invalidMessage");
}

#[tokio::test]
async fn test_fire_and_forget_kinds_are_notified() {
    let (parent, worker) = connected_buses();
    let mut notifications = parent.subscribe();

    worker.event("started", json!({ "pid": 1 })).unwrap();
    worker.task("sendInvalidMessage", json!({})).unwrap();
    worker.message(json!("hello")).unwrap();

    let names: Vec<_> = [
        notifications.recv().await.unwrap(),
        notifications.recv().await.unwrap(),
        notifications.recv().await.unwrap(),
    ]
    .iter()
    .map(|n| (n.name(), n.envelope().unwrap().cmd().to_string()))
    .collect();

    assert_eq!(
        names,
        vec![
            ("event", "started".to_string()),
            ("task", "sendInvalidMessage".to_string()),
            ("message", "message".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_invalid_message_from_peer_bus() {
    let (parent, worker) = connected_buses();
    let mut notifications = parent.subscribe();

    worker.send_raw(json!("This is an invalid message!")).unwrap();

    assert_eq!(notifications.recv().await.unwrap().name(), "invalidMessage");
}

#[tokio::test]
async fn test_cancel_single_request() {
    let (bus, _remote, _wire) = scripted_bus(Duration::from_secs(5));

    let keep = bus.request("keep", json!({}));
    let drop_me = bus.request("drop", json!({}));
    let id = drop_me.id().unwrap().to_string();

    assert!(bus.cancel(&id));
    assert!(!bus.cancel(&id));
    assert!(drop_me.await.unwrap_err().is_cancelled());
    assert!(bus.is_pending(keep.id().unwrap()));
}

#[test]
fn test_static_validate() {
    assert!(!Bus::validate(&json!({})));
    assert!(Bus::validate(&json!({ "header": { "cmd": "test", "type": 2 } })));
    assert!(!Bus::validate(&json!({ "header": { "cmd": "test", "type": 0 } })));
}
