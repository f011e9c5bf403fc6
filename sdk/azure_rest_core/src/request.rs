//! Request and response values passed through the pipeline.

use crate::error::{RestError, RestResult};
use crate::logging::truncate_message;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, IntoHeaderName, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// An outgoing HTTP request.
///
/// Created fresh for each logical call and mutated in place by policies on
/// its way to the transport.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Insert or replace a header.
    pub fn insert_header<K: IntoHeaderName>(&mut self, name: K, value: &str) -> RestResult<()> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| RestError::invalid_request("header value contains invalid characters"))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Insert a header whose value must never be logged.
    pub fn insert_sensitive_header(&mut self, name: HeaderName, value: &str) -> RestResult<()> {
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| RestError::invalid_request("header value contains invalid characters"))?;
        value.set_sensitive(true);
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    /// Serialize `value` as the JSON body and set `content-type`.
    pub fn set_json<T: Serialize + ?Sized>(&mut self, value: &T) -> RestResult<()> {
        let body = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(())
    }

    /// `host` or `host:port` when the URL names a non-default port.
    pub fn host(&self) -> Option<String> {
        let host = self.url.host_str()?;
        Some(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Path plus `?query` when a query is present.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Set a query parameter, replacing any existing values for `name`.
    pub fn set_query_param(&mut self, name: &str, value: &str) {
        let retained: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| k != name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut pairs = self.url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &retained {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(name, value);
    }
}

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> RestResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn a non-success response into [`RestError::Service`].
    ///
    /// Azure error bodies of the form `{"error": {"code": .., "message": ..}}`
    /// are parsed; anything else is reported as the raw body. Messages are
    /// sanitized and truncated before they leave this function.
    pub fn into_result(self) -> RestResult<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let status = self.status.as_u16();
        let body = self.text();

        if let Ok(error) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(err_obj) = error.get("error") {
                let code = err_obj
                    .get("code")
                    .and_then(|c| c.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let message = err_obj
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or(&body);
                return Err(RestError::service(
                    status,
                    Some(code),
                    truncate_message(message),
                ));
            }
        }

        let message = if body.is_empty() {
            self.status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            truncate_message(&body)
        };
        Err(RestError::service(status, None, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn host_includes_explicit_port() {
        assert_eq!(
            request("https://contoso.communication.azure.com/queues").host(),
            Some("contoso.communication.azure.com".to_string())
        );
        assert_eq!(
            request("http://127.0.0.1:8080/queues").host(),
            Some("127.0.0.1:8080".to_string())
        );
        // Default port for the scheme is not repeated.
        assert_eq!(
            request("https://example.com:443/").host(),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn path_and_query_keeps_query() {
        let req = request("https://example.com/queues?api-version=2024-01-01&top=5");
        assert_eq!(req.path_and_query(), "/queues?api-version=2024-01-01&top=5");

        let req = request("https://example.com/queues");
        assert_eq!(req.path_and_query(), "/queues");
    }

    #[test]
    fn set_query_param_replaces_existing_value() {
        let mut req = request("https://example.com/jobs?api-version=1&continuationToken=old");
        req.set_query_param("continuationToken", "new");

        assert_eq!(
            req.url().as_str(),
            "https://example.com/jobs?api-version=1&continuationToken=new"
        );
    }

    #[test]
    fn set_json_sets_content_type() {
        let mut req = request("https://example.com/jobs");
        req.set_json(&serde_json::json!({"priority": 1})).unwrap();

        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.body().unwrap().as_ref(), br#"{"priority":1}"#);
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let mut req = request("https://example.com/jobs");
        let err = req.insert_header("x-custom", "line\nbreak").unwrap_err();
        assert!(matches!(err, RestError::InvalidRequest(_)));
    }

    #[test]
    fn into_result_parses_azure_error_body() {
        let body = serde_json::json!({
            "error": {"code": "QueueNotFound", "message": "queue 'q1' does not exist"}
        });
        let response = Response::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            serde_json::to_vec(&body).unwrap(),
        );

        match response.into_result() {
            Err(RestError::Service {
                status,
                code,
                message,
            }) => {
                assert_eq!(status, 404);
                assert_eq!(code.as_deref(), Some("QueueNotFound"));
                assert_eq!(message, "queue 'q1' does not exist");
            }
            other => panic!("expected Service error, got {other:?}"),
        }
    }

    #[test]
    fn into_result_preserves_hyphenated_names_in_message() {
        let body = serde_json::json!({
            "error": {
                "code": "QueueNotFound",
                "message": "queue 'task-queue' on disk-2 was not found"
            }
        });
        let response = Response::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            serde_json::to_vec(&body).unwrap(),
        );

        match response.into_result() {
            Err(RestError::Service { message, .. }) => {
                assert_eq!(message, "queue 'task-queue' on disk-2 was not found");
            }
            other => panic!("expected Service error, got {other:?}"),
        }
    }

    #[test]
    fn into_result_falls_back_to_raw_body() {
        let response = Response::new(StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), "busy");
        match response.into_result() {
            Err(RestError::Service { status, code, message }) => {
                assert_eq!(status, 503);
                assert!(code.is_none());
                assert_eq!(message, "busy");
            }
            other => panic!("expected Service error, got {other:?}"),
        }
    }

    #[test]
    fn into_result_uses_reason_for_empty_body() {
        let response = Response::new(StatusCode::FORBIDDEN, HeaderMap::new(), Bytes::new());
        let err = response.into_result().unwrap_err();
        assert!(err.to_string().contains("Forbidden"));
    }

    #[test]
    fn into_result_redacts_tokens() {
        let response = Response::new(
            StatusCode::UNAUTHORIZED,
            HeaderMap::new(),
            "rejected header Authorization: Bearer eyJhbGciOi.secret",
        );
        let err = response.into_result().unwrap_err().to_string();
        assert!(!err.contains("eyJhbGciOi"));
        assert!(err.contains("[REDACTED]"));
    }

    #[test]
    fn success_passes_through() {
        let response = Response::new(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new());
        assert!(response.into_result().is_ok());
    }
}
