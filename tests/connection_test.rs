//! End-to-end connection tests over in-memory duplex streams

use framerpc::core::{encode_frame, BufferPool, Frame, FrameReader};
use framerpc::{
    from_async_fn, from_sync_fn, CallError, Cancellation, Connection, ConnectionBuilder, Error,
    MethodSpec, MethodTable, Result,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

fn multiply(a: i64, b: i64) -> Result<i64> {
    Ok(a * b)
}

async fn sleep_then(ms: u64, value: String) -> Result<String> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(value)
}

async fn hang(token: Cancellation) -> Result<&'static str> {
    token.cancelled().await;
    Ok("woke up")
}

async fn echo_cancellable(value: i64, _cancel: Cancellation) -> Result<i64> {
    Ok(value)
}

fn table() -> MethodTable {
    MethodTable::builder()
        .method("multiply", from_sync_fn(multiply))
        .method("sleep_then", from_async_fn(sleep_then))
        .method("hang", from_async_fn(hang))
        .method("echo_cancellable", from_async_fn(echo_cancellable))
        .method("ping", from_sync_fn(|| -> Result<&'static str> { Ok("pong") }))
        .method(
            "divide",
            MethodSpec::new()
                .named(["dividend", "divisor"])
                .sync(|a: i64, b: i64| -> Result<i64> {
                    if b == 0 {
                        return Err(Error::InvalidParams("division by zero".into()));
                    }
                    Ok(a / b)
                })
                .unwrap(),
        )
        .build()
        .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pair(server: ConnectionBuilder, client: ConnectionBuilder) -> (Connection, Connection) {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    (
        server.spawn(left_read, left_write),
        client.spawn(right_read, right_write),
    )
}

fn default_pair() -> (Connection, Connection) {
    pair(ConnectionBuilder::new().methods(table()), ConnectionBuilder::new())
}

/// A peer that speaks raw frames
struct RawPeer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl RawPeer {
    fn connect(builder: ConnectionBuilder) -> (Connection, RawPeer) {
        init_tracing();
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let connection = builder.spawn(left_read, left_write);
        let peer = RawPeer {
            reader: FrameReader::new(right_read, BufferPool::default(), 1 << 20),
            writer: right_write,
        };
        (connection, peer)
    }

    async fn send(&mut self, json: &str) {
        self.send_bytes(&encode_frame(json.as_bytes())).await;
    }

    async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(
            Duration::from_secs(5),
            self.reader.next_message(&CancellationToken::new()),
        )
        .await
        .expect("a frame within 5s")
        .unwrap();
        match frame {
            Frame::Message(buffer) => serde_json::from_slice(&buffer).unwrap(),
            other => panic!("expected a message, got {other:?}"),
        }
    }
}

async fn eventually(connection: &Connection, check: impl Fn(&framerpc::ConnectionStats) -> bool) {
    for _ in 0..200 {
        if check(&connection.stats()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", connection.stats());
}

#[tokio::test]
async fn test_call_round_trip() {
    let (_server, client) = default_pair();
    let product: i64 = client.call("multiply", &[114, 514]).await.unwrap();
    assert_eq!(product, 58596);

    let quotient: i64 = client
        .call("divide", &json!({"divisor": 4, "dividend": 20}))
        .await
        .unwrap();
    assert_eq!(quotient, 5);
}

#[tokio::test]
async fn test_typed_failures() {
    let (_server, client) = default_pair();

    let missing = client.call::<_, i64>("subtract", &[1, 2]).await;
    assert!(matches!(missing, Err(CallError::MethodNotFound(_))));

    let bad_args = client.call::<_, i64>("multiply", &["a", "b"]).await;
    assert!(matches!(bad_args, Err(CallError::InvalidParams(_))));

    let validation = client
        .call::<_, i64>("divide", &json!({"dividend": 1, "divisor": 0}))
        .await;
    assert!(matches!(validation, Err(CallError::InvalidParams(p)) if p.message.contains("division by zero")));

    let wrong_type = client.call::<_, bool>("ping", &()).await;
    assert!(matches!(wrong_type, Err(CallError::Decode(_))));
}

#[tokio::test]
async fn test_responses_correlate_out_of_order() {
    let (_server, client) = default_pair();

    let slow_params = json!([200, "slow"]);
    let fast_params = json!([1, "fast"]);
    let slow = client.call::<_, String>("sleep_then", &slow_params);
    let fast = client.call::<_, String>("sleep_then", &fast_params);
    let product = client.call::<_, i64>("multiply", &[114, 514]);

    let (slow, fast, product) = tokio::join!(slow, fast, product);
    assert_eq!(slow.unwrap(), "slow");
    assert_eq!(fast.unwrap(), "fast");
    assert_eq!(product.unwrap(), 58596);
}

#[tokio::test]
async fn test_many_concurrent_calls() {
    let (_server, client) = default_pair();
    let calls = (0..500i64).map(|i| {
        let client = client.clone();
        async move { (i, client.call::<_, i64>("multiply", &[i, i]).await) }
    });
    for (i, result) in futures::future::join_all(calls).await {
        assert_eq!(result.unwrap(), i * i);
    }
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_invalid_json_gets_parse_error() {
    let (server, mut peer) = RawPeer::connect(ConnectionBuilder::new().methods(table()));

    peer.send("{not json").await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["id"], Value::Null);
    assert_eq!(server.stats().invalid_messages, 1);
}

#[tokio::test]
async fn test_invalid_envelope_answers_only_with_id() {
    let (_server, mut peer) = RawPeer::connect(ConnectionBuilder::new().methods(table()));

    // No id: nothing comes back, so the next frame is the ping response.
    peer.send(r#"{"jsonrpc":"1.0","method":"ping"}"#).await;
    peer.send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).await;
    let response = peer.recv().await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"], "pong");

    peer.send(r#"{"method":"ping","id":"abc"}"#).await;
    let response = peer.recv().await;
    assert_eq!(response["id"], "abc");
    assert_eq!(response["error"]["code"], -32600);
}

#[tokio::test]
async fn test_notifications_never_answered() {
    let (server, mut peer) = RawPeer::connect(ConnectionBuilder::new().methods(table()));

    peer.send(r#"{"jsonrpc":"2.0","method":"multiply","params":[2,3]}"#).await;
    peer.send(r#"{"jsonrpc":"2.0","method":"missing"}"#).await;
    peer.send(r#"{"jsonrpc":"2.0","method":"multiply","params":["x"]}"#).await;
    peer.send(r#"{"jsonrpc":"2.0","method":"ping","id":9}"#).await;

    let response = peer.recv().await;
    assert_eq!(response["id"], 9);
    assert_eq!(server.stats().calls_dispatched, 4);
}

#[tokio::test]
async fn test_malformed_header_then_recovery() {
    let (server, mut peer) = RawPeer::connect(ConnectionBuilder::new().methods(table()));

    peer.send_bytes(b"Content-Length: abc\r\n\r\n").await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(server.stats().malformed_frames, 1);

    peer.send(r#"{"jsonrpc":"2.0","method":"multiply","params":[114,514],"id":2}"#).await;
    let response = peer.recv().await;
    assert_eq!(response["result"], 58596);
}

#[tokio::test]
async fn test_peer_cancellation_discards_result() {
    let (server, mut peer) = RawPeer::connect(ConnectionBuilder::new().methods(table()));

    peer.send(r#"{"jsonrpc":"2.0","method":"hang","id":5}"#).await;
    eventually(&server, |s| s.calls_dispatched == 1).await;
    peer.send(r#"{"jsonrpc":"2.0","method":"$/cancelRequest","params":{"id":5}}"#).await;
    eventually(&server, |s| s.discarded_results == 1).await;

    peer.send(r#"{"jsonrpc":"2.0","method":"ping","id":6}"#).await;
    let response = peer.recv().await;
    assert_eq!(response["id"], 6);
}

#[tokio::test]
async fn test_reused_request_id_keeps_earlier_dispatch_cancellable() {
    let (server, mut peer) = RawPeer::connect(ConnectionBuilder::new().methods(table()));

    peer.send(r#"{"jsonrpc":"2.0","method":"hang","id":7}"#).await;
    eventually(&server, |s| s.calls_dispatched == 1).await;
    peer.send(r#"{"jsonrpc":"2.0","method":"echo_cancellable","params":[42],"id":7}"#).await;
    let response = peer.recv().await;
    assert_eq!(response["id"], 7);
    assert_eq!(response["result"], 42);

    // The finished dispatch must not take the running one's token with it.
    peer.send(r#"{"jsonrpc":"2.0","method":"$/cancelRequest","params":{"id":7}}"#).await;
    eventually(&server, |s| s.discarded_results == 1).await;

    peer.send(r#"{"jsonrpc":"2.0","method":"ping","id":8}"#).await;
    assert_eq!(peer.recv().await["id"], 8);
}

#[tokio::test]
async fn test_cancellation_reaches_every_dispatch_sharing_an_id() {
    let (server, mut peer) = RawPeer::connect(ConnectionBuilder::new().methods(table()));

    peer.send(r#"{"jsonrpc":"2.0","method":"hang","id":9}"#).await;
    peer.send(r#"{"jsonrpc":"2.0","method":"hang","id":9}"#).await;
    eventually(&server, |s| s.calls_dispatched == 2).await;

    peer.send(r#"{"jsonrpc":"2.0","method":"$/cancelRequest","params":{"id":9}}"#).await;
    eventually(&server, |s| s.discarded_results == 2).await;

    peer.send(r#"{"jsonrpc":"2.0","method":"ping","id":10}"#).await;
    assert_eq!(peer.recv().await["id"], 10);
}

#[tokio::test]
async fn test_local_cancel_notifies_peer() {
    let (server, client) = default_pair();

    let (id, call) = client.begin_call("hang", &()).unwrap();
    eventually(&server, |s| s.calls_dispatched == 1).await;

    assert!(client.cancel(&id));
    assert_eq!(call.await, Err(CallError::Cancelled));
    assert!(!client.cancel(&id));

    // The handler observed the cancellation and its result was dropped.
    eventually(&server, |s| s.discarded_results == 1).await;
}

#[tokio::test]
async fn test_call_with_cancellation_token() {
    let (_server, client) = default_pair();
    let token = CancellationToken::new();

    let pending = {
        let client = client.clone();
        let token = token.clone();
        tokio::spawn(async move { client.call_with_cancellation::<_, String>("hang", &(), token).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    assert_eq!(pending.await.unwrap(), Err(CallError::Cancelled));
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_request_timeout() {
    let (server, client) = pair(
        ConnectionBuilder::new().methods(table()),
        ConnectionBuilder::new().request_timeout(Duration::from_millis(50)),
    );

    let result = client.call::<_, String>("hang", &()).await;
    assert_eq!(result, Err(CallError::Timeout));
    assert!(client.pending().is_empty());
    eventually(&server, |s| s.discarded_results == 1).await;
}

#[tokio::test]
async fn test_late_and_duplicate_responses_are_reported() {
    let (client, mut peer) = RawPeer::connect(ConnectionBuilder::new());

    peer.send(r#"{"jsonrpc":"2.0","id":999,"result":1}"#).await;
    eventually(&client, |s| s.unknown_responses == 1).await;

    let (id, call) = client.begin_call("echo", &["x"]).unwrap();
    let request = peer.recv().await;
    assert_eq!(request["method"], "echo");
    assert_eq!(request["id"], json!(id));

    let response = format!(r#"{{"jsonrpc":"2.0","id":{},"result":"x"}}"#, request["id"]);
    peer.send(&response).await;
    peer.send(&response).await;

    assert_eq!(call.await.unwrap().deserialize::<String>().unwrap(), "x");
    eventually(&client, |s| s.duplicate_responses == 1).await;
}

#[tokio::test]
async fn test_unidentified_errors_are_kept() {
    let (client, mut peer) = RawPeer::connect(ConnectionBuilder::new());

    peer.send(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#)
        .await;
    eventually(&client, |s| s.unidentified_responses == 1).await;

    let errors = client.pending().take_unidentified();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, -32700);
}

#[tokio::test]
async fn test_stream_end_fails_pending_calls() {
    let (client, peer) = RawPeer::connect(ConnectionBuilder::new());

    let (_, call) = client.begin_call("never", &()).unwrap();
    drop(peer);

    assert_eq!(call.await, Err(CallError::ConnectionClosed));
    tokio::time::timeout(Duration::from_secs(5), client.closed())
        .await
        .unwrap();
    assert!(client.is_closed());
    assert!(matches!(
        client.call::<_, ()>("after", &()).await,
        Err(CallError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_no_call_can_begin_after_close() {
    let (client, peer) = RawPeer::connect(ConnectionBuilder::new());
    drop(peer);
    tokio::time::timeout(Duration::from_secs(5), client.closed())
        .await
        .unwrap();

    // The registry itself refuses, even when the connection-level check is bypassed.
    assert!(client.pending().is_closed());
    assert_eq!(
        client.pending().begin("late").err(),
        Some(CallError::ConnectionClosed)
    );
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_running_handlers() {
    let (server, client) = default_pair();
    let (_, call) = client.begin_call("hang", &()).unwrap();
    eventually(&server, |s| s.calls_dispatched == 1).await;

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), server.closed())
        .await
        .unwrap();
    eventually(&server, |s| s.discarded_results == 1).await;

    // The server never answers, so the client call is still pending until it gives up.
    assert!(client.cancel(call.id()));
}

#[tokio::test]
async fn test_buffers_return_to_pool() {
    let (server, client) = default_pair();
    for i in 0..50i64 {
        let _: i64 = client.call("multiply", &[i, 2]).await.unwrap();
    }
    let _: String = client.call("sleep_then", &json!([5, "done"])).await.unwrap();

    for _ in 0..200 {
        if server.buffers_outstanding() == 0 && client.buffers_outstanding() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "buffers leaked: server {} client {}",
        server.buffers_outstanding(),
        client.buffers_outstanding()
    );
}
