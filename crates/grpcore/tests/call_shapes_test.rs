//! End-to-end coverage of the four call shapes over an in-process connection.

mod common;

use futures::StreamExt;

use grpcore::prelude::*;
use grpcore::transport::memory;
use grpcore::{CompressionRegistry, ServerConfig};

use common::{Harness, greeter, method};

#[tokio::test]
async fn test_unary_say_hello() {
    let harness = Harness::start();

    let reply = harness
        .client
        .unary(&method("SayHello"), &"world".to_string(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(reply, "Hello world");

    let metrics = harness.server.metrics();
    assert_eq!(metrics.calls_started, 1);
    assert_eq!(metrics.calls_succeeded, 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_server_streaming_countdown() {
    let harness = Harness::start();

    let mut responses = harness
        .client
        .server_streaming(&method("Countdown"), &"3".to_string(), CallOptions::new())
        .await
        .unwrap();
    let mut received = Vec::new();
    while let Some(n) = responses.message().await.unwrap() {
        received.push(n);
    }
    assert_eq!(received, ["3", "2", "1"]);
    assert_eq!(responses.status().map(Status::code), Some(Code::Ok));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_server_streaming_handler_error() {
    let harness = Harness::start();

    let mut responses = harness
        .client
        .server_streaming(&method("Countdown"), &"many".to_string(), CallOptions::new())
        .await
        .unwrap();
    let status = responses.message().await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), Some("not a number: many"));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_client_streaming_join() {
    let harness = Harness::start();

    let words = ["a", "b", "c"].map(String::from);
    let joined = harness
        .client
        .client_streaming(&method("Join"), futures::stream::iter(words), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(joined, "a,b,c");

    let empty = harness
        .client
        .client_streaming(
            &method("Join"),
            futures::stream::empty::<String>(),
            CallOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(empty, "");
    harness.shutdown().await;
}

#[tokio::test]
async fn test_bidi_echo_interleaves() {
    let harness = Harness::start();

    let (mut requests, mut responses) = harness
        .client
        .bidi_streaming(&method("Echo"), CallOptions::new())
        .await
        .unwrap();

    for word in ["ping", "pong"] {
        requests.send(&word.to_string()).await.unwrap();
        let echoed = responses.message().await.unwrap();
        assert_eq!(echoed.as_deref(), Some(format!("echo {word}").as_str()));
    }
    requests.close().await.unwrap();
    assert_eq!(responses.message().await.unwrap(), None);
    assert!(responses.trailers().is_some());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_bidi_responses_as_stream() {
    let harness = Harness::start();

    let (mut requests, responses) = harness
        .client
        .bidi_streaming(&method("Echo"), CallOptions::new())
        .await
        .unwrap();
    for n in 0..5 {
        requests.send(&n.to_string()).await.unwrap();
    }
    requests.close().await.unwrap();

    let echoed: Vec<String> = responses
        .into_stream()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(echoed.len(), 5);
    assert_eq!(echoed[4], "echo 4");
    harness.shutdown().await;
}

#[tokio::test]
async fn test_request_metadata_reaches_handler() {
    let harness = Harness::start();

    let anonymous = harness
        .client
        .unary(&method("WhoAmI"), &String::new(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(anonymous, "anonymous");

    let named = harness
        .client
        .unary(
            &method("WhoAmI"),
            &String::new(),
            CallOptions::new().metadata("x-user", "ada"),
        )
        .await
        .unwrap();
    assert_eq!(named, "ada");
    harness.shutdown().await;
}

#[tokio::test]
async fn test_gzip_in_both_directions() {
    let server = Server::builder(ServiceRegistry::builder().add_service(greeter()).build())
        .config(ServerConfig::builder().response_encoding("gzip").build())
        .build();
    let options = ChannelOptions::default().send_encoding("gzip");
    let harness = Harness::with_options(server, options);

    let mut call = harness
        .client
        .make_request("/helloworld.Greeter/SayHello", CallOptions::new())
        .await
        .unwrap();
    let long_name = "x".repeat(4096);
    call.sender().send_last(long_name.as_bytes()).await.unwrap();

    let reply = call.receiver().message().await.unwrap().unwrap();
    assert_eq!(reply.len(), "Hello ".len() + 4096);
    let headers = call.receiver().headers().unwrap();
    assert_eq!(headers.get("grpc-encoding"), Some("gzip"));
    assert_eq!(call.receiver().message().await.unwrap(), None);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_only_client_gets_plain_responses() {
    let server = Server::builder(ServiceRegistry::builder().add_service(greeter()).build())
        .config(ServerConfig::builder().response_encoding("gzip").build())
        .build();
    let (connection, acceptor) = memory::pair();
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve_connection(acceptor).await }
    });
    let client = Client::with_compression(
        connection,
        "localhost",
        ChannelOptions::default(),
        CompressionRegistry::identity_only(),
    );

    let mut call = client
        .make_request("/helloworld.Greeter/SayHello", CallOptions::new())
        .await
        .unwrap();
    call.sender().send_last(b"plain").await.unwrap();
    let reply = call.receiver().message().await.unwrap().unwrap();
    assert_eq!(&reply[..], b"Hello plain");
    assert_eq!(call.receiver().headers().unwrap().get("grpc-encoding"), None);

    client.finish();
    serving.await.unwrap();
}

#[tokio::test]
async fn test_finish_lets_calls_in_flight_complete() {
    let harness = Harness::start();

    let (mut requests, mut responses) = harness
        .client
        .bidi_streaming(&method("Echo"), CallOptions::new())
        .await
        .unwrap();
    harness.client.finish();

    let refused = harness
        .client
        .unary(&method("SayHello"), &"late".to_string(), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(refused.code(), Code::Unavailable);

    requests.send(&"still here".to_string()).await.unwrap();
    assert_eq!(
        responses.message().await.unwrap().as_deref(),
        Some("echo still here")
    );
    requests.close().await.unwrap();
    assert_eq!(responses.message().await.unwrap(), None);
    harness.shutdown().await;
}
