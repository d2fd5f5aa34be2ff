//! End-to-end tests: gateway against a scripted peer or a `Responder`.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use ponche_gateway::channel::FramedReader;
use ponche_gateway::codec::WireCodec;
use ponche_gateway::methods::{Swipe, SwipeOutcome};
use ponche_gateway::protocol::{build_frame, WireRequest, WireResponse};
use ponche_gateway::transport::{BoxedReader, BoxedWriter};
use ponche_gateway::{
    ChannelError, DataLayerClient, DispatcherState, HandlerError, QueryError, QueryGateway,
    Responder, Transport,
};
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Peer side of an in-process transport, driven by the test.
struct ScriptedPeer {
    reader: FramedReader<BoxedReader>,
    writer: BoxedWriter,
}

impl ScriptedPeer {
    async fn next_request(&mut self) -> WireRequest {
        let body = self.reader.read_message().await.unwrap();
        WireCodec::MsgPack.decode(&body).unwrap()
    }

    async fn send(&mut self, response: &WireResponse) {
        self.send_raw(response).await;
    }

    async fn send_raw<T: serde::Serialize>(&mut self, record: &T) {
        let body = WireCodec::MsgPack.encode(record).unwrap();
        self.writer.write_all(&build_frame(&body)).await.unwrap();
    }
}

fn scripted() -> (QueryGateway, ScriptedPeer) {
    let (ours, theirs) = Transport::in_process(256 * 1024);
    let gateway = QueryGateway::builder().start(ours);
    let peer = ScriptedPeer {
        reader: FramedReader::new(theirs.reader),
        writer: theirs.writer,
    };
    (gateway, peer)
}

fn mock_data_layer() -> Responder {
    Responder::new()
        .handle("get_next_candidate", |_req: Value, ctx| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.respond(&json!({"name": "Boethiah", "distance": "some distance"}))
                .await
        })
        .handle("post_swipe", |swipe: Swipe, ctx| async move {
            ctx.respond(&SwipeOutcome {
                match_created: swipe.outcome && swipe.candidate_id == "2",
            })
            .await
        })
        .handle("get_login_user_info", |req: Value, ctx| async move {
            match req["user_id"].as_str() {
                Some("1") => ctx.respond(&json!({"name": "Azura", "matches": []})).await,
                other => {
                    let id = other.unwrap_or_default();
                    ctx.respond(&json!({"error": format!("Invalid user id: '{id}'")}))
                        .await
                }
            }
        })
        .handle("get_json", |_req: Value, _ctx| async move {
            Err(HandlerError::failed("object store unavailable"))
        })
        .handle("get_datespot_suggestions", |_req: Value, _ctx| async move {
            // Never answers in time.
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
}

fn with_responder(responder: Responder, codec: WireCodec) -> QueryGateway {
    let (ours, theirs) = Transport::in_process(256 * 1024);
    let gateway = QueryGateway::builder()
        .codec(codec)
        .default_timeout(TIMEOUT)
        .ready_signal(responder.ready_signal())
        .start(ours);
    tokio::spawn(responder.codec(codec).serve_transport(theirs));
    gateway
}

#[tokio::test]
async fn test_concurrent_requests_resolved_out_of_order() {
    let (gateway, mut peer) = scripted();

    let mut calls = Vec::new();
    for i in 0..16 {
        let gateway = gateway.clone();
        calls.push(tokio::spawn(async move {
            let resp = gateway
                .query("get_json", &json!({"n": i}), Duration::from_secs(5))
                .await
                .unwrap();
            (i, resp.payload)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..16 {
        requests.push(peer.next_request().await);
    }
    for request in requests.iter().rev() {
        let echoed = json!({"echo": request.payload["n"]});
        peer.send(&WireResponse::ok(request.id.clone(), echoed))
            .await;
    }

    for call in calls {
        let (i, payload) = call.await.unwrap();
        assert_eq!(payload, json!({"echo": i}));
    }
    assert_eq!(gateway.pending_count(), 0);
}

#[tokio::test]
async fn test_unknown_id_is_dropped() {
    let (gateway, mut peer) = scripted();

    let pending = gateway
        .submit("get_json", &json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    let request = peer.next_request().await;

    peer.send(&WireResponse::ok("nobody-asked".into(), json!("stray")))
        .await;
    peer.send(&WireResponse::ok(request.id, json!("mine"))).await;

    assert_eq!(pending.await.unwrap().payload, json!("mine"));
    assert!(matches!(gateway.state(), DispatcherState::Running));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_response_is_noop() {
    let (gateway, mut peer) = scripted();
    let (held_tx, held_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let peer_task = tokio::spawn(async move {
        let held = peer.next_request().await;
        held_tx.send(held.id.clone()).unwrap();
        release_rx.await.unwrap();
        peer.send(&WireResponse::ok(held.id, json!("too late"))).await;

        let next = peer.next_request().await;
        peer.send(&WireResponse::ok(next.id, json!("on time"))).await;
        peer
    });

    let started = Instant::now();
    let err = gateway
        .query("get_next_candidate", &json!({"user_id": "1"}), TIMEOUT)
        .await
        .unwrap_err();
    let held_id = held_rx.await.unwrap();

    match err {
        QueryError::Timeout { id, elapsed } => {
            assert_eq!(id, held_id);
            assert!(elapsed >= TIMEOUT);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= TIMEOUT);
    assert_eq!(gateway.pending_count(), 0);

    release_tx.send(()).unwrap();
    let resp = gateway
        .query("get_next_candidate", &json!({"user_id": "1"}), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(resp.payload, json!("on time"));
    drop(peer_task.await.unwrap());
}

#[tokio::test]
async fn test_boethiah_scenario() {
    let gateway = with_responder(mock_data_layer(), WireCodec::MsgPack);

    let resp = gateway
        .query("get_next_candidate", &json!({"user_id": "1"}), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        resp.payload,
        json!({"name": "Boethiah", "distance": "some distance"})
    );

    let client = DataLayerClient::new(gateway);
    let candidate = client.get_next_candidate("1").await.unwrap();
    assert_eq!(candidate.name, "Boethiah");
    assert_eq!(candidate.distance.as_deref(), Some("some distance"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_data_layer_times_out_after_two_seconds() {
    let gateway = with_responder(mock_data_layer(), WireCodec::MsgPack);

    let started = Instant::now();
    let err = gateway
        .query("get_datespot_suggestions", &json!({"match_id": "m1"}), TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Timeout { .. }));
    assert!(err.is_upstream_unavailable());
    assert_eq!(err.http_status(), 504);
    let waited = started.elapsed();
    assert!(waited >= TIMEOUT && waited < TIMEOUT + Duration::from_millis(100));
}

#[tokio::test]
async fn test_typed_client_over_json_codec() {
    let client = DataLayerClient::new(with_responder(mock_data_layer(), WireCodec::Json));

    let outcome = client
        .post_swipe(&Swipe {
            user_id: "1".into(),
            candidate_id: "2".into(),
            outcome: true,
        })
        .await
        .unwrap();
    assert!(outcome.match_created);

    let profile = client.get_login_user_info("1").await.unwrap();
    assert_eq!(profile["name"], json!("Azura"));
}

#[tokio::test]
async fn test_remote_errors_are_not_upstream_unavailable() {
    let gateway = with_responder(mock_data_layer(), WireCodec::MsgPack);
    let client = DataLayerClient::new(gateway.clone());

    let err = client.get_login_user_info("404").await.unwrap_err();
    assert!(
        matches!(err, QueryError::Remote { ref message, .. } if message.contains("'404'")),
        "got {err:?}"
    );
    assert!(!err.is_upstream_unavailable());

    let err = gateway
        .query_default("get_json", &json!({"object_model_name": "user"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Remote { ref message, .. } if message == "object store unavailable"
    ));
    assert_eq!(err.http_status(), 502);
}

#[tokio::test]
async fn test_methods_outside_ready_signal_are_rejected() {
    let gateway = with_responder(mock_data_layer(), WireCodec::MsgPack);

    let err = gateway
        .query_default("put_json", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedMethod(ref m) if m == "put_json"));
}

#[tokio::test]
async fn test_responder_answers_unknown_method() {
    // Gateway without a ready signal sends anything.
    let (ours, theirs) = Transport::in_process(64 * 1024);
    let gateway = QueryGateway::builder().start(ours);
    tokio::spawn(mock_data_layer().serve_transport(theirs));

    let err = gateway
        .query("drop_tables", &json!({}), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Remote { ref message, .. } if message.contains("drop_tables")
    ));
}

#[tokio::test]
async fn test_responder_answers_bad_payload() {
    let gateway = with_responder(mock_data_layer(), WireCodec::MsgPack);

    let err = gateway
        .query("post_swipe", &json!({"user_id": "1"}), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Remote { ref message, .. } if message.contains("invalid payload")
    ));
}

#[tokio::test]
async fn test_eof_fails_pending_and_later_submits() {
    let (gateway, mut peer) = scripted();

    let mut pending = Vec::new();
    for _ in 0..3 {
        pending.push(
            gateway
                .submit("get_json", &json!({}), Duration::from_secs(30))
                .await
                .unwrap(),
        );
    }
    for _ in 0..3 {
        peer.next_request().await;
    }
    drop(peer);

    for query in pending {
        assert!(matches!(
            query.await,
            Err(QueryError::Transport(ChannelError::Closed))
        ));
    }

    assert!(matches!(gateway.closed().await, ChannelError::Closed));
    assert!(gateway.state().is_faulted());
    assert_eq!(gateway.pending_count(), 0);

    let err = gateway
        .submit("get_json", &json!({}), Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Transport(_)));
    assert_eq!(err.http_status(), 503);
}

/// Writer that discards bytes until switched off, then fails every write.
struct FlakyWriter {
    broken: Arc<AtomicBool>,
}

impl AsyncWrite for FlakyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken.load(Ordering::Acquire) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk on fire")));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_write_failure_faults_channel() {
    let (_keep_open, inbound) = tokio::io::duplex(1024);
    let broken = Arc::new(AtomicBool::new(false));
    let gateway = QueryGateway::builder().connect(
        inbound,
        FlakyWriter {
            broken: broken.clone(),
        },
    );

    let earlier = gateway
        .submit("get_json", &json!({}), Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(gateway.pending_count(), 1);

    broken.store(true, Ordering::Release);
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        gateway.query("get_json", &json!({}), Duration::from_secs(30)),
    )
    .await
    .expect("write failure must not wait for the request timeout");
    assert!(matches!(
        result,
        Err(QueryError::Transport(ChannelError::IoFailure(_)))
    ));

    // Requests already waiting fail with the same error instead of timing out.
    let earlier = tokio::time::timeout(Duration::from_secs(1), earlier)
        .await
        .expect("pending requests must fail with the channel");
    assert!(matches!(
        earlier,
        Err(QueryError::Transport(ChannelError::IoFailure(_)))
    ));
    assert!(gateway.state().is_faulted());
    assert!(matches!(gateway.closed().await, ChannelError::IoFailure(_)));
    assert_eq!(gateway.pending_count(), 0);

    let again = gateway
        .submit("get_json", &json!({}), Duration::from_secs(30))
        .await;
    assert!(matches!(again, Err(QueryError::Transport(_))));
    assert_eq!(gateway.pending_count(), 0);
}

#[tokio::test]
async fn test_malformed_response_is_protocol_error() {
    let (gateway, mut peer) = scripted();

    let pending = gateway
        .submit("get_json", &json!({}), TIMEOUT)
        .await
        .unwrap();
    let request = peer.next_request().await;
    peer.send_raw(&json!({"id": request.id.as_str(), "payload": 1, "error": 42}))
        .await;

    let err = tokio::time::timeout(Duration::from_millis(500), pending)
        .await
        .expect("a malformed answer must not wait for the deadline")
        .unwrap_err();
    assert!(matches!(err, QueryError::Protocol(_)), "got {err:?}");
    assert!(!err.is_upstream_unavailable());
    assert_eq!(err.http_status(), 502);

    // The channel itself is still healthy.
    let next = gateway
        .submit("get_json", &json!({}), TIMEOUT)
        .await
        .unwrap();
    let request = peer.next_request().await;
    peer.send(&WireResponse::ok(request.id, json!("fine"))).await;
    assert_eq!(next.await.unwrap().payload, json!("fine"));
}

#[tokio::test]
async fn test_dropping_pending_query_deregisters() {
    let (gateway, mut peer) = scripted();

    let pending = gateway
        .submit("get_json", &json!({}), Duration::from_secs(30))
        .await
        .unwrap();
    let id = pending.id().clone();
    assert_eq!(gateway.pending_count(), 1);

    pending.cancel();
    assert_eq!(gateway.pending_count(), 0);

    // The request was already written; its answer is simply discarded.
    let request = peer.next_request().await;
    assert_eq!(request.id, id);
    peer.send(&WireResponse::ok(request.id, json!(1))).await;

    let next = gateway
        .submit("get_json", &json!({}), Duration::from_secs(30))
        .await
        .unwrap();
    let request = peer.next_request().await;
    peer.send(&WireResponse::ok(request.id, json!(2))).await;
    assert_eq!(next.await.unwrap().payload, json!(2));
}

#[tokio::test]
async fn test_many_clients_share_one_channel() {
    let gateway = with_responder(mock_data_layer(), WireCodec::MsgPack);
    let (tx, mut rx) = mpsc::channel(64);

    for i in 0..50 {
        let client = DataLayerClient::new(gateway.clone());
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = client
                .post_swipe(&Swipe {
                    user_id: i.to_string(),
                    candidate_id: (i % 3).to_string(),
                    outcome: true,
                })
                .await
                .unwrap();
            tx.send((i, outcome.match_created)).await.unwrap();
        });
    }
    drop(tx);

    let mut seen = 0;
    while let Some((i, created)) = rx.recv().await {
        assert_eq!(created, i % 3 == 2);
        seen += 1;
    }
    assert_eq!(seen, 50);
    assert_eq!(gateway.pending_count(), 0);
}
