//! Backpressure and cancellation across concurrent calls.

mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use grpcore::codec::{string_deserializer, string_serializer};
use grpcore::prelude::*;

use common::{Harness, SERVICE, greeter, method};

/// Sends on drop, so a test can observe its handler being torn down.
struct DropSignal(mpsc::UnboundedSender<()>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

#[tokio::test]
async fn test_slow_reader_pauses_inbound() {
    let registry = ServiceRegistry::builder()
        .add_service(greeter())
        .add_method(
            SERVICE,
            MethodDescriptor::client_streaming(
                "SlowCount",
                string_deserializer(),
                string_serializer(),
                |mut requests: Streaming<String>, _ctx| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let mut count = 0;
                    while requests.message().await?.is_some() {
                        count += 1;
                    }
                    Ok::<_, Status>(count.to_string())
                },
            ),
        )
        .build();
    let server = Server::builder(registry)
        .config(ServerConfig::builder().request_buffer(1).build())
        .build();
    let harness = Harness::with_server(server);

    let requests = futures::stream::iter((0..32).map(|n| n.to_string()));
    let count = harness
        .client
        .client_streaming(&method("SlowCount"), requests, CallOptions::new())
        .await
        .unwrap();
    assert_eq!(count, "32");
    assert!(harness.connection.pause_count() > 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_reset_cancels_only_its_call() {
    let (dropped_tx, mut dropped) = mpsc::unbounded_channel();
    let registry = ServiceRegistry::builder()
        .add_service(greeter())
        .add_method(
            SERVICE,
            MethodDescriptor::bidi_streaming(
                "Hang",
                string_deserializer(),
                string_serializer(),
                move |_requests: Streaming<String>, _ctx| {
                    let signal = DropSignal(dropped_tx.clone());
                    async move {
                        let _signal = signal;
                        std::future::pending::<()>().await;
                        Ok::<_, Status>(futures::stream::empty::<Result<String, Status>>())
                    }
                },
            ),
        )
        .build();
    let harness = Harness::with_server(Server::new(registry));

    let (mut hanging, _responses) = harness
        .client
        .bidi_streaming(&method("Hang"), CallOptions::new())
        .await
        .unwrap();
    hanging.send(&"wait".to_string()).await.unwrap();

    let (mut echo, mut echoed) = harness
        .client
        .bidi_streaming(&method("Echo"), CallOptions::new())
        .await
        .unwrap();
    echo.send(&"first".to_string()).await.unwrap();
    assert_eq!(echoed.message().await.unwrap().as_deref(), Some("echo first"));

    hanging.reset();
    tokio::time::timeout(Duration::from_secs(5), dropped.recv())
        .await
        .expect("handler was not cancelled");

    echo.send(&"second".to_string()).await.unwrap();
    assert_eq!(echoed.message().await.unwrap().as_deref(), Some("echo second"));
    echo.close().await.unwrap();
    assert_eq!(echoed.message().await.unwrap(), None);

    let metrics = harness.server.metrics();
    assert_eq!(metrics.calls_started, 2);
    assert_eq!(metrics.calls_succeeded, 1);
    assert_eq!(metrics.calls_failed, 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_reset_after_half_close_cancels_handler() {
    let (dropped_tx, mut dropped) = mpsc::unbounded_channel();
    let (drained_tx, mut drained) = mpsc::unbounded_channel();
    let registry = ServiceRegistry::builder()
        .add_method(
            SERVICE,
            MethodDescriptor::bidi_streaming(
                "Linger",
                string_deserializer(),
                string_serializer(),
                move |mut requests: Streaming<String>, _ctx| {
                    let signal = DropSignal(dropped_tx.clone());
                    let drained = drained_tx.clone();
                    async move {
                        let _signal = signal;
                        while requests.message().await?.is_some() {}
                        let _ = drained.send(());
                        std::future::pending::<()>().await;
                        Ok::<_, Status>(futures::stream::empty::<Result<String, Status>>())
                    }
                },
            ),
        )
        .build();
    let harness = Harness::with_server(Server::new(registry));

    let (mut requests, _responses) = harness
        .client
        .bidi_streaming(&method("Linger"), CallOptions::new())
        .await
        .unwrap();
    requests.send(&"only".to_string()).await.unwrap();
    requests.close().await.unwrap();
    drained.recv().await.unwrap();

    requests.reset();
    tokio::time::timeout(Duration::from_secs(5), dropped.recv())
        .await
        .expect("handler was not cancelled");

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.server.metrics().active_calls > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("call still active");
    let metrics = harness.server.metrics();
    assert_eq!(metrics.calls_failed, 1);
    assert_eq!(metrics.calls_succeeded, 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_deadline_reaches_handler() {
    let registry = ServiceRegistry::builder()
        .add_method(
            SERVICE,
            MethodDescriptor::unary(
                "Deadline",
                string_deserializer(),
                string_serializer(),
                |_: String, ctx: RequestContext| async move {
                    Ok::<_, Status>(
                        ctx.deadline()
                            .map(|d| d.as_millis().to_string())
                            .unwrap_or_default(),
                    )
                },
            ),
        )
        .build();
    let harness = Harness::with_server(Server::new(registry));

    let with_deadline = harness
        .client
        .unary(
            &method("Deadline"),
            &String::new(),
            CallOptions::new().timeout(Duration::from_millis(1500)),
        )
        .await
        .unwrap();
    assert_eq!(with_deadline, "1500");

    let without = harness
        .client
        .unary(&method("Deadline"), &String::new(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(without, "");
    harness.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_unary_calls() {
    let harness = Harness::start();

    let mut calls = tokio::task::JoinSet::new();
    for n in 0..20 {
        let client = harness.client.clone();
        calls.spawn(async move {
            let reply = client
                .unary(&method("SayHello"), &n.to_string(), CallOptions::new())
                .await
                .unwrap();
            assert_eq!(reply, format!("Hello {n}"));
        });
    }
    while let Some(joined) = calls.join_next().await {
        joined.unwrap();
    }
    assert_eq!(harness.server.metrics().calls_succeeded, 20);
    harness.shutdown().await;
}
