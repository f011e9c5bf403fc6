//! End-to-end tests for azure_rest_core against a local mock server.

use async_trait::async_trait;
use azure_rest_core::auth::RestCredential;
use azure_rest_core::client::RestClient;
use azure_rest_core::context::Context;
use azure_rest_core::paging::ContinuationStyle;
use azure_rest_core::policy::{Next, Policy};
use azure_rest_core::request::{Request, Response};
use azure_rest_core::retry::{RetryOptions, RetryPolicy};
use azure_rest_core::{RestError, RestResult};
use futures::TryStreamExt;
use http::Method;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_KEY: &str = "MTIzNDU2Nzg5MA==";

/// Records the headers each attempt carries when it reaches this policy.
#[derive(Debug, Default, Clone)]
struct AuditPolicy {
    seen: Arc<Mutex<Vec<(Option<String>, Option<String>)>>>,
}

#[async_trait]
impl Policy for AuditPolicy {
    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> RestResult<Response> {
        self.seen.lock().unwrap().push((
            request.header("authorization").map(str::to_string),
            request.header("x-ms-client-request-id").map(str::to_string),
        ));
        next.run(ctx, request).await
    }
}

fn client(server: &MockServer) -> RestClient {
    RestClient::builder()
        .endpoint(server.uri())
        .credential(RestCredential::access_key(TEST_KEY).unwrap())
        .api_version("2024-01-01")
        .retry_options(RetryOptions::fixed(3, Duration::from_millis(5)))
        .build()
        .expect("should build client")
}

#[tokio::test]
async fn every_attempt_is_signed_and_seen_by_custom_policies() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/queues/q1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queues/q1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "q1"})))
        .mount(&server)
        .await;

    let audit = AuditPolicy::default();
    let client = RestClient::builder()
        .endpoint(server.uri())
        .credential(RestCredential::access_key(TEST_KEY).unwrap())
        .retry_options(RetryOptions::fixed(3, Duration::from_millis(5)))
        .add_policy(audit.clone())
        .build()
        .unwrap();

    let body: serde_json::Value = client
        .get_json(&Context::new(), "queues/q1")
        .await
        .unwrap();
    assert_eq!(body["id"], "q1");

    let seen = audit.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for (authorization, request_id) in &seen {
        let authorization = authorization.as_deref().expect("signed before custom policy");
        assert!(authorization.starts_with("HMAC-SHA256 SignedHeaders=date;host;x-ms-content-sha256&Signature="));
        assert_eq!(request_id, &seen[0].1, "request id is stable across attempts");
    }

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
    for request in &received {
        assert!(request.headers.contains_key("date"));
        assert!(request.headers.contains_key("x-ms-content-sha256"));
    }
}

#[tokio::test]
async fn retry_exhaustion_surfaces_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/queues/q1"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": { "code": "InternalError", "message": "try later" }
        })))
        .expect(4)
        .mount(&server)
        .await;

    let client = client(&server);
    let mut request = client.request(Method::PUT, "queues/q1").unwrap();
    request.set_json(&serde_json::json!({ "name": "q1" })).unwrap();

    let err = client.send(&Context::new(), request).await.unwrap_err();

    match err {
        RestError::Service {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 500);
            assert_eq!(code.as_deref(), Some("InternalError"));
            assert_eq!(message, "try later");
        }
        other => panic!("Expected Service error, got {other:?}"),
    }
}

#[test]
fn custom_retry_policy_and_options_conflict() {
    let result = RestClient::builder()
        .endpoint("https://contoso.communication.azure.com")
        .credential(RestCredential::access_key(TEST_KEY).unwrap())
        .retry_policy(RetryPolicy::new(RetryOptions::fixed(3, Duration::from_millis(5))))
        .retry_options(RetryOptions::default())
        .build();

    assert!(matches!(result, Err(RestError::Configuration(_))));
}

#[test]
fn malformed_access_key_is_a_configuration_error() {
    let result = RestCredential::access_key("%%% not base64 %%%");
    assert!(matches!(result, Err(RestError::Configuration(_))));
}

#[tokio::test]
async fn pages_follow_next_link() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/queues"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": ["c"] })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queues"))
        .and(query_param("api-version", "2024-01-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": ["a", "b"],
            "nextLink": format!("{}/queues?page=2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let request = client.request(Method::GET, "queues").unwrap();
    let items: Vec<String> = client
        .pager(&Context::new(), request, ContinuationStyle::NextLink)
        .into_stream()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(items, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn deadline_cancels_slow_call() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let client = client(&server);
    let ctx = Context::new().with_timeout(Duration::from_millis(200));

    let err = client
        .get_json::<serde_json::Value>(&ctx, "slow")
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "got {err:?}");
    assert!(!err.is_retriable());
}
