use crate::context::Context;
use crate::error::RestResult;
use crate::policy::{Next, Policy};
use crate::request::{Request, Response};
use async_trait::async_trait;
use http::HeaderMap;
use std::collections::HashSet;
use std::time::Instant;
use url::Url;

/// Maximum length for error messages and logged bodies.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Replacement for header and query values that are not allowed in logs.
pub const REDACTED: &str = "REDACTED";

const SECRET_MARKER: &str = "[REDACTED]";

const DEFAULT_ALLOWED_HEADERS: &[&str] = &[
    "accept",
    "cache-control",
    "connection",
    "content-length",
    "content-type",
    "date",
    "etag",
    "expires",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-unmodified-since",
    "last-modified",
    "pragma",
    "request-id",
    "retry-after",
    "retry-after-ms",
    "server",
    "traceparent",
    "transfer-encoding",
    "user-agent",
    "www-authenticate",
    "x-ms-client-request-id",
    "x-ms-request-id",
    "x-ms-retry-after-ms",
    "x-ms-return-client-request-id",
];

const DEFAULT_ALLOWED_QUERY_PARAMS: &[&str] = &["api-version"];

/// How much of each request and response the [`LoggingPolicy`] records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpLogDetailLevel {
    /// Nothing is logged.
    None,
    /// Method, URL, status, and elapsed time.
    #[default]
    Basic,
    /// `Basic` plus headers.
    Headers,
    /// `Headers` plus bodies.
    BodyAndHeaders,
}

/// Options for the [`LoggingPolicy`].
///
/// Header and query parameter names are matched case-insensitively. Values of
/// anything not in the allow-lists are logged as `REDACTED`.
#[derive(Debug, Clone)]
pub struct HttpLogOptions {
    level: HttpLogDetailLevel,
    allowed_headers: HashSet<String>,
    allowed_query_params: HashSet<String>,
}

impl Default for HttpLogOptions {
    fn default() -> Self {
        Self {
            level: HttpLogDetailLevel::default(),
            allowed_headers: DEFAULT_ALLOWED_HEADERS.iter().map(|h| h.to_string()).collect(),
            allowed_query_params: DEFAULT_ALLOWED_QUERY_PARAMS
                .iter()
                .map(|q| q.to_string())
                .collect(),
        }
    }
}

impl HttpLogOptions {
    pub fn new(level: HttpLogDetailLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn level(&self) -> HttpLogDetailLevel {
        self.level
    }

    pub fn with_level(mut self, level: HttpLogDetailLevel) -> Self {
        self.level = level;
        self
    }

    /// Allow the value of header `name` to appear in logs.
    pub fn allow_header(mut self, name: impl AsRef<str>) -> Self {
        self.allowed_headers.insert(name.as_ref().to_ascii_lowercase());
        self
    }

    /// Allow the value of query parameter `name` to appear in logs.
    pub fn allow_query_param(mut self, name: impl AsRef<str>) -> Self {
        self.allowed_query_params
            .insert(name.as_ref().to_ascii_lowercase());
        self
    }

    pub fn is_header_allowed(&self, name: &str) -> bool {
        self.allowed_headers.contains(&name.to_ascii_lowercase())
    }

    pub fn is_query_param_allowed(&self, name: &str) -> bool {
        self.allowed_query_params
            .contains(&name.to_ascii_lowercase())
    }

    /// The URL with disallowed query values replaced by `REDACTED`.
    pub fn redact_url(&self, url: &Url) -> String {
        if url.query().is_none() {
            return url.to_string();
        }

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| {
                let value = if self.is_query_param_allowed(&name) {
                    value.into_owned()
                } else {
                    REDACTED.to_string()
                };
                (name.into_owned(), value)
            })
            .collect();

        let mut redacted = url.clone();
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
        redacted.to_string()
    }

    /// Headers formatted as `name: value` pairs with disallowed or sensitive
    /// values replaced by `REDACTED`.
    pub fn redact_headers(&self, headers: &HeaderMap) -> String {
        headers
            .iter()
            .map(|(name, value)| {
                let shown = if value.is_sensitive() || !self.is_header_allowed(name.as_str()) {
                    REDACTED
                } else {
                    value.to_str().unwrap_or(REDACTED)
                };
                format!("{name}: {shown}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Records each request and response as `tracing` events.
///
/// Sits directly above the transport, so it logs every attempt with the
/// headers actually sent, authorization included (always redacted).
#[derive(Debug, Clone, Default)]
pub struct LoggingPolicy {
    options: HttpLogOptions,
}

impl LoggingPolicy {
    pub fn new(options: HttpLogOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HttpLogOptions {
        &self.options
    }

    fn log_request(&self, request: &Request) {
        let url = self.options.redact_url(request.url());
        match self.options.level {
            HttpLogDetailLevel::None => {}
            HttpLogDetailLevel::Basic => {
                tracing::debug!(method = %request.method(), %url, "sending request");
            }
            HttpLogDetailLevel::Headers => {
                tracing::debug!(
                    method = %request.method(),
                    %url,
                    headers = %self.options.redact_headers(request.headers()),
                    "sending request"
                );
            }
            HttpLogDetailLevel::BodyAndHeaders => {
                let body = request
                    .body()
                    .map(|b| truncate_message(&String::from_utf8_lossy(b)))
                    .unwrap_or_default();
                tracing::debug!(
                    method = %request.method(),
                    %url,
                    headers = %self.options.redact_headers(request.headers()),
                    %body,
                    "sending request"
                );
            }
        }
    }

    fn log_response(&self, response: &Response, elapsed_ms: u64) {
        let status = response.status().as_u16();
        match self.options.level {
            HttpLogDetailLevel::None => {}
            HttpLogDetailLevel::Basic => {
                tracing::debug!(status, elapsed_ms, "received response");
            }
            HttpLogDetailLevel::Headers => {
                tracing::debug!(
                    status,
                    elapsed_ms,
                    headers = %self.options.redact_headers(response.headers()),
                    "received response"
                );
            }
            HttpLogDetailLevel::BodyAndHeaders => {
                tracing::debug!(
                    status,
                    elapsed_ms,
                    headers = %self.options.redact_headers(response.headers()),
                    body = %truncate_message(&response.text()),
                    "received response"
                );
            }
        }
    }
}

#[async_trait]
impl Policy for LoggingPolicy {
    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> RestResult<Response> {
        self.log_request(request);
        let start = Instant::now();

        let result = next.run(ctx, request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => self.log_response(response, elapsed_ms),
            Err(err) if self.options.level != HttpLogDetailLevel::None => {
                tracing::debug!(
                    elapsed_ms,
                    error = %truncate_message(&err.to_string()),
                    "request failed"
                );
            }
            Err(_) => {}
        }
        result
    }
}

/// Redact bearer tokens from `msg`. Everything else is left as written.
pub fn sanitize_message(msg: &str) -> String {
    let mut result = msg.to_string();

    // "Bearer <token>"; the offset keeps already redacted tokens from looping
    let mut search_start = 0;
    while let Some(relative_pos) = result[search_start..].find("Bearer ") {
        let token_start = search_start + relative_pos + "Bearer ".len();
        if token_start >= result.len() {
            break;
        }
        if result[token_start..].starts_with(SECRET_MARKER) {
            search_start = token_start + SECRET_MARKER.len();
            continue;
        }

        let token_end = secret_end(&result, token_start);
        if token_end > token_start {
            result.replace_range(token_start..token_end, SECRET_MARKER);
            search_start = token_start + SECRET_MARKER.len();
        } else {
            search_start = token_start;
        }
    }

    result
}

fn secret_end(text: &str, start: usize) -> usize {
    text[start..]
        .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == ',')
        .map(|pos| start + pos)
        .unwrap_or(text.len())
}

/// Sanitize `msg`, then cut it to [`MAX_MESSAGE_LEN`] bytes.
///
/// Sanitizing first keeps a secret straddling the cut from leaking its
/// prefix.
pub fn truncate_message(msg: &str) -> String {
    let sanitized = sanitize_message(msg);
    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &sanitized[..end])
    } else {
        sanitized
    }
}
