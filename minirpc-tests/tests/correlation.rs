//! Late and unmatched responses

use futures::{SinkExt, StreamExt};
use minirpc_core::Error;
use minirpc_rpc::{
    builtin_registry, Envelope, Payload, Request, Response, RpcClientBuilder, Value, WireCodec,
};
use minirpc_tests::init_test_logging;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

fn correlation_id(envelope: &Envelope) -> String {
    match &envelope.payload {
        Payload::Request(request) => request.correlation_id.clone(),
        other => panic!("expected a request, got {:?}", other),
    }
}

#[tokio::test]
async fn test_late_and_unknown_responses_are_dropped() {
    init_test_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = Framed::new(stream, WireCodec::new(builtin_registry()));

        // Hold the first call until the second one arrives
        let slow = frames.next().await.unwrap().unwrap();
        let fast = frames.next().await.unwrap().unwrap();
        let (codec, compression) = (fast.codec, fast.compression);

        for response in [
            Response::success("ghost", Value::from("nobody asked")),
            Response::success(correlation_id(&slow), Value::from("too late")),
            Response::success(correlation_id(&fast), Value::from("on time")),
        ] {
            frames
                .send(Envelope::response(codec, compression, response))
                .await
                .unwrap();
        }
        frames
    });

    let client = RpcClientBuilder::new().build(builtin_registry()).unwrap();

    let slow = client
        .send_to(addr, Request::new("slow", "Hello:g1:v1", "hello", vec![]))
        .await
        .unwrap();
    assert!(matches!(
        slow.timeout(Duration::from_millis(50)).await,
        Err(Error::Timeout(_))
    ));
    assert_eq!(client.pending_calls(), 0);

    let fast = client
        .send_to(addr, Request::new("fast", "Hello:g1:v1", "hello", vec![]))
        .await
        .unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), fast)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.correlation_id, "fast");
    assert_eq!(response.data, Some(Value::from("on time")));
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(client.connection_count(), 1);

    let _frames = peer.await.unwrap();
}

#[tokio::test]
async fn test_duplicate_correlation_id_is_rejected_locally() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = Framed::new(stream, WireCodec::new(builtin_registry()));
        while frames.next().await.is_some() {}
    });

    let client = RpcClientBuilder::new().build(builtin_registry()).unwrap();
    let _first = client
        .send_to(addr, Request::new("same", "Hello:g1:v1", "hello", vec![]))
        .await
        .unwrap();
    let second = client
        .send_to(addr, Request::new("same", "Hello:g1:v1", "hello", vec![]))
        .await;
    assert!(matches!(second, Err(Error::DuplicateCorrelation(id)) if id == "same"));
    assert_eq!(client.pending_calls(), 1);
}
