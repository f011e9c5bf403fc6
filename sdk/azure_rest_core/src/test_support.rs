//! In-memory transport for exercising pipelines without a network.
//!
//! Enabled for this crate's own tests and, for service crates built on top
//! of it, through the `test-support` feature.

use crate::error::{RestError, RestResult};
use crate::request::{Request, Response};
use crate::transport::HttpClient;
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Respond(Response),
    Fail(String),
}

#[derive(Debug)]
struct State {
    script: VecDeque<Scripted>,
    fallback: Scripted,
    requests: Vec<Request>,
    delay: Option<Duration>,
}

/// A scripted [`HttpClient`].
///
/// Queued outcomes are returned in order; once the queue is empty every
/// further request gets the fallback outcome (`200` with an empty body
/// unless changed with [`with_status`](Self::with_status)). Every request
/// that reaches the transport is recorded. Clones share the same script and
/// record.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                script: VecDeque::new(),
                fallback: Scripted::Respond(status_response(200, HeaderMap::new(), "")),
                requests: Vec::new(),
                delay: None,
            })),
        }
    }

    /// Status returned once the script is exhausted.
    pub fn with_status(self, status: u16) -> Self {
        self.lock().fallback = Scripted::Respond(status_response(status, HeaderMap::new(), ""));
        self
    }

    /// Wait this long before answering each request.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    pub fn push_response(self, response: Response) -> Self {
        self.lock().script.push_back(Scripted::Respond(response));
        self
    }

    pub fn push_status(self, status: u16) -> Self {
        self.push_response(status_response(status, HeaderMap::new(), ""))
    }

    pub fn push_status_with_header(self, status: u16, name: &'static str, value: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
        self.push_response(status_response(status, headers, ""))
    }

    pub fn push_json(self, status: u16, body: serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.push_response(status_response(status, headers, body.to_string()))
    }

    pub fn push_transport_error(self, message: &str) -> Self {
        self.lock().script.push_back(Scripted::Fail(message.to_string()));
        self
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn status_response(status: u16, headers: HeaderMap, body: impl Into<bytes::Bytes>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::new(status, headers, body)
}

#[async_trait]
impl HttpClient for MockTransport {
    async fn send(&self, request: &Request) -> RestResult<Response> {
        let (outcome, delay) = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            let outcome = state
                .script
                .pop_front()
                .unwrap_or_else(|| state.fallback.clone());
            (outcome, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            Scripted::Respond(response) => Ok(response),
            Scripted::Fail(message) => Err(RestError::transport(message)),
        }
    }
}
