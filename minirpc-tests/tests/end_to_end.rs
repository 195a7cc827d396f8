//! Client and server talking over loopback TCP

use minirpc_core::Error;
use minirpc_net::ServiceDiscovery;
use minirpc_rpc::{Request, StatusCode, Value};
use minirpc_tests::{hello_key, test_config, TestEnvironment};
use std::collections::HashSet;

#[tokio::test]
async fn test_hello_ping_pong() {
    let env = TestEnvironment::start().await.unwrap();

    let request = Request::new("r1", "Hello:g1:v1", "hello", vec![Value::from("ping")]);
    let response = env.client.call(request).await.unwrap();

    assert_eq!(response.correlation_id, "r1");
    assert_eq!(response.status, StatusCode::Success);
    assert_eq!(response.data, Some(Value::from("pong")));
    assert_eq!(env.client.pending_calls(), 0);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_typed_stub() {
    let env = TestEnvironment::start().await.unwrap();
    let stub = env.hello_stub();

    assert_eq!(stub.hello("ping").await.unwrap(), "pong");
    assert_eq!(stub.hello("world").await.unwrap(), "hello world");
    assert_eq!(stub.whoami().await.unwrap(), "server-0");

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_failures_do_not_break_the_connection() {
    let env = TestEnvironment::start().await.unwrap();
    let proxy = env.client.proxy(hello_key());

    let err = proxy.call("missing", vec![]).await.unwrap_err();
    assert!(matches!(&err, Error::RemoteFailure(message) if message.contains("Method not found")));

    let err = proxy.call("nap", vec![Value::I64(-1)]).await.unwrap_err();
    assert!(matches!(&err, Error::RemoteFailure(message) if message.contains("negative duration")));

    assert_eq!(env.hello_stub().hello("ping").await.unwrap(), "pong");
    assert_eq!(env.client.connection_count(), 1);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_codec_combination() {
    for serializer in ["json", "msgpack", "bincode"] {
        for compress in ["none", "gzip", "deflate"] {
            let env = TestEnvironment::start_with(test_config(), 1, |c| c, |b| {
                b.serializer(serializer).compress(compress)
            })
            .await
            .unwrap();

            let nested = Value::Map(vec![
                ("list".to_string(), Value::List(vec![Value::I64(-1), Value::Null])),
                ("bytes".to_string(), Value::Bytes(vec![0, 255])),
            ]);
            let reply = env
                .client
                .proxy(hello_key())
                .call("hello", vec![Value::String(nested.to_string())])
                .await
                .unwrap();
            assert_eq!(
                reply,
                Some(Value::String(format!("hello {}", nested))),
                "{} + {}",
                serializer,
                compress
            );

            env.shutdown().await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_concurrent_callers_share_one_connection() {
    let env = TestEnvironment::start().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..50 {
        let stub = env.hello_stub();
        tasks.push(tokio::spawn(async move { stub.hello(&format!("caller-{}", i)).await }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), format!("hello caller-{}", i));
    }
    assert_eq!(env.client.connection_count(), 1);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_service_is_a_lookup_error() {
    let env = TestEnvironment::start().await.unwrap();

    let request = Request::new("r1", "Hello:g2:v1", "hello", vec![Value::from("ping")]);
    assert!(matches!(env.client.call(request).await, Err(Error::ServiceNotFound(_))));
    assert_eq!(env.client.connection_count(), 0);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_consistent_hash_routing() {
    let env = TestEnvironment::start_with(test_config(), 3, |c| c, |b| b).await.unwrap();
    let stub = env.hello_stub();

    // Identical calls stick to one server
    let mut owners = HashSet::new();
    for _ in 0..10 {
        owners.insert(stub.whoami().await.unwrap());
    }
    assert_eq!(owners.len(), 1);

    // Varied arguments spread across servers
    let keys: Vec<String> = (0..60).map(|i| format!("key-{}", i)).collect();
    let mut before = Vec::new();
    for key in &keys {
        before.push(stub.owner_of(key).await.unwrap());
    }
    let distinct: HashSet<&String> = before.iter().collect();
    assert!(distinct.len() > 1);
    assert!(env.client.connection_count() > 1);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removing_a_server_only_moves_its_keys() {
    let mut env = TestEnvironment::start_with(test_config(), 3, |c| c, |b| b).await.unwrap();
    let stub = env.hello_stub();

    let keys: Vec<String> = (0..40).map(|i| format!("key-{}", i)).collect();
    let mut before = Vec::new();
    for key in &keys {
        before.push(stub.owner_of(key).await.unwrap());
    }

    let removed = before[0].clone();
    let index: usize = removed.trim_start_matches("server-").parse().unwrap();
    env.servers[index].shutdown().await.unwrap();

    let discovery = env.plugins.resolve::<dyn ServiceDiscovery>("memory").unwrap();
    assert_eq!(discovery.lookup("Hello:g1:v1").await.unwrap().len(), 2);

    for (key, old_owner) in keys.iter().zip(&before) {
        let new_owner = stub.owner_of(key).await.unwrap();
        if *old_owner == removed {
            assert_ne!(new_owner, removed);
        } else {
            assert_eq!(&new_owner, old_owner, "{} moved", key);
        }
    }

    env.shutdown().await.unwrap();
}
