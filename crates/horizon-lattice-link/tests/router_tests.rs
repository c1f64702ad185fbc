//! Integration tests for the transport router.
//!
//! Queries and mutations go to a wiremock server over HTTP; subscriptions
//! go to the in-memory streaming server. The connector's attempt counter
//! shows whether the streaming transport was touched.

mod support;

use std::sync::Arc;

use horizon_lattice_link::http::HttpClient;
use horizon_lattice_link::transport::{HttpRequestTransport, StreamingTransport};
use horizon_lattice_link::{
    Dispatched, Endpoints, HeaderSet, Link, LinkError, Operation, Result, SubscriptionMessage,
    TransportRouter,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{MockConnector, ServerSide, expect_data, test_config, within};

struct Harness {
    router: TransportRouter,
    connector: Arc<MockConnector>,
    accepted: tokio::sync::mpsc::UnboundedReceiver<ServerSide>,
}

fn harness(server: &MockServer) -> Harness {
    let (connector, accepted) = MockConnector::new();
    let endpoints = Endpoints::derive(&server.uri(), "").expect("valid origin");
    let http = HttpClient::builder().build().expect("Failed to build client");
    let router = TransportRouter::new(
        Arc::new(HttpRequestTransport::new(http)),
        Arc::new(StreamingTransport::new(test_config(), connector.clone())),
        endpoints,
        HeaderSet::new().with("Authorization", "Bearer secret"),
    );
    Harness {
        router,
        connector,
        accepted,
    }
}

#[tokio::test]
async fn test_queries_and_mutations_never_open_a_socket() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(&server);

    let query = h.router.dispatch(Operation::query("{ runs { id } }")).await;
    let mutation = h
        .router
        .dispatch(Operation::mutation("mutation { cancelRun(id: 1) { id } }"))
        .await;
    let raw = h.router.dispatch(Operation::new("query Runs { runs { id } }")).await;

    for dispatched in [query, mutation, raw] {
        let response = dispatched
            .into_single()
            .expect("single response")
            .expect("request succeeds");
        assert_eq!(response.data, Some(json!({"ok": true})));
    }

    assert_eq!(h.connector.attempts(), 0);
    assert!(h.router.streaming().current().is_none());
}

#[tokio::test]
async fn test_subscription_takes_the_streaming_transport() {
    let server = MockServer::start().await;
    let mut h = harness(&server);

    let mut stream = h
        .router
        .dispatch(Operation::new(
            "subscription RunUpdates { runUpdated { id } }",
        ))
        .await
        .into_stream()
        .expect("stream");

    let mut socket = within(h.accepted.recv()).await.expect("connection accepted");
    assert!(socket.request.url.starts_with("ws://"));
    assert!(socket.request.url.ends_with("/graphql"));
    assert_eq!(socket.accept().await, json!({"Authorization": "Bearer secret"}));

    let (id, payload) = socket.expect_subscribe().await;
    assert_eq!(payload["operationName"], "RunUpdates");
    socket.next(&id, json!({"runUpdated": {"id": 1}}));
    assert_eq!(
        expect_data(within(stream.next()).await),
        json!({"runUpdated": {"id": 1}})
    );

    assert_eq!(h.connector.attempts(), 1);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_subscriptions_share_one_connection() {
    let server = MockServer::start().await;
    let mut h = harness(&server);

    let _first = h
        .router
        .dispatch(Operation::subscription("subscription { a }"))
        .await
        .into_stream()
        .expect("stream");
    let _second = h
        .router
        .dispatch(Operation::subscription("subscription { b }"))
        .await
        .into_stream()
        .expect("stream");

    let mut socket = within(h.accepted.recv()).await.expect("connection accepted");
    socket.accept().await;
    socket.expect_subscribe().await;
    socket.expect_subscribe().await;
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test]
async fn test_unclassifiable_operation_is_rejected() {
    let server = MockServer::start().await;
    let h = harness(&server);

    let dispatched = h
        .router
        .dispatch(Operation::new("fragment RunFields on Run { id }"))
        .await;

    assert!(matches!(
        dispatched.into_single(),
        Some(Err(LinkError::Classification(_)))
    ));
    assert_eq!(h.connector.attempts(), 0);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

struct TraceLink;

impl Link for TraceLink {
    fn apply(&self, operation: Operation) -> Result<Operation> {
        Ok(operation.header("X-Trace", "abc123"))
    }
}

#[tokio::test]
async fn test_links_run_before_routing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("X-Trace", "abc123"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    h.router = h.router.link(Arc::new(TraceLink));

    let query = h.router.dispatch(Operation::query("{ ok }")).await;
    assert!(matches!(query, Dispatched::Single(Ok(_))));

    let Dispatched::Stream(_stream) = h
        .router
        .dispatch(Operation::new("subscription RunUpdates { runUpdated { id } }"))
        .await
    else {
        panic!("expected a stream");
    };
    let mut socket = within(h.accepted.recv()).await.expect("connection accepted");
    socket.accept().await;
    let (_, payload) = socket.expect_subscribe().await;
    assert_eq!(payload["extensions"]["headers"]["X-Trace"], "abc123");
}

#[tokio::test]
async fn test_request_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"operationName": "Runs"})))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    let result = h.router.execute(&Operation::new("query Runs { runs { id } }")).await;

    assert!(matches!(result, Err(LinkError::HttpStatus { status: 503, .. })));
}

#[tokio::test]
async fn test_stream_dispatch_after_failure_reports_error() {
    let server = MockServer::start().await;
    let h = harness(&server);
    h.connector.refuse(true);

    let dispatched = h
        .router
        .dispatch(Operation::subscription("subscription { a }"))
        .await;
    assert!(matches!(dispatched, Dispatched::Stream(_)));

    let mut stream = dispatched.into_stream().expect("stream");
    // Default retry cap in the test config is 10 quick attempts.
    match within(stream.next()).await {
        Some(SubscriptionMessage::Error(LinkError::ConnectionFailed { attempts })) => {
            assert_eq!(attempts, 10);
        }
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
}
