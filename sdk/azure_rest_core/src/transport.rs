//! Transport boundary.
//!
//! The pipeline only depends on [`HttpClient`]; [`reqwest::Client`] is the
//! default implementation, and anything else (a test double, a different
//! HTTP stack) can be plugged in through
//! [`ClientBuilder::http_client`](crate::client::ClientBuilder::http_client).

use crate::error::{RestError, RestResult};
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/response timeout (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends a single HTTP request.
///
/// Implementations must be safe for concurrent use; the pipeline shares one
/// transport between every in-flight call. Any status code is a successful
/// send; only connection-level failures are errors.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    async fn send(&self, request: &Request) -> RestResult<Response>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn send(&self, request: &Request) -> RestResult<Response> {
        (**self).send(request).await
    }
}

#[async_trait]
impl HttpClient for reqwest::Client {
    async fn send(&self, request: &Request) -> RestResult<Response> {
        let mut builder = self
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Response::new(status, headers, body))
    }
}

/// Build the default `reqwest` transport.
pub fn default_http_client(
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    proxy: Option<&str>,
) -> RestResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
        .timeout(read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT));

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| RestError::configuration(format!("invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| RestError::configuration(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reqwest_transport_round_trips_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/jobs"))
            .and(header("x-test", "1"))
            .and(body_string("payload"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-ms-request-id", "abc")
                    .set_body_string("created"),
            )
            .mount(&server)
            .await;

        let client = default_http_client(None, None, None).unwrap();
        let mut request = Request::new(
            Method::POST,
            Url::parse(&format!("{}/jobs", server.uri())).unwrap(),
        );
        request.insert_header("x-test", "1").unwrap();
        request.set_body("payload");

        let response = HttpClient::send(&client, &request).await.unwrap();

        assert_eq!(response.status(), 201);
        assert_eq!(response.header("x-ms-request-id"), Some("abc"));
        assert_eq!(response.text(), "created");
    }

    #[tokio::test]
    async fn error_statuses_are_not_transport_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = default_http_client(None, None, None).unwrap();
        let request = Request::new(
            Method::GET,
            Url::parse(&format!("{}/missing", server.uri())).unwrap(),
        );

        let response = HttpClient::send(&client, &request).await.unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn read_timeout_surfaces_as_transport_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("OK")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = default_http_client(None, Some(Duration::from_millis(200)), None).unwrap();
        let request = Request::new(
            Method::GET,
            Url::parse(&format!("{}/slow", server.uri())).unwrap(),
        );

        let err = HttpClient::send(&client, &request).await.unwrap_err();
        assert!(
            matches!(err, RestError::Transport { .. }),
            "Expected Transport error from timeout, got {:?}",
            err
        );
    }

    #[test]
    fn invalid_proxy_is_a_configuration_error() {
        let result = default_http_client(None, None, Some("::not a url::"));
        assert!(matches!(result, Err(RestError::Configuration(_))));
    }
}
