//! The [`Policy`] contract and the standard header policies.
//!
//! A policy sees the request on its way down the chain, hands it to the
//! rest of the chain through [`Next::run`], and sees the response (or error)
//! on the way back up. Policies are shared by every call on a pipeline, so
//! any per-call state must live in the [`Context`] or the [`Request`].

use crate::context::{Context, CLIENT_REQUEST_ID_KEY};
use crate::error::{RestError, RestResult};
use crate::request::{Request, Response};
use crate::transport::HttpClient;
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::HeaderMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Header carrying the caller-side request id.
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// A single interception stage of a [`Pipeline`](crate::pipeline::Pipeline).
#[async_trait]
pub trait Policy: Debug + Send + Sync {
    /// Process `request`, normally by calling `next.run(ctx, request)`.
    ///
    /// A policy may mutate the request before forwarding it and inspect or
    /// replace the outcome afterwards. It must not swallow errors.
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>)
        -> RestResult<Response>;
}

/// The remainder of the chain below the current policy.
///
/// `Next` is `Copy`, so a policy such as retry can run the rest of the chain
/// several times.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn HttpClient,
}

impl<'a> Next<'a> {
    pub(crate) fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn HttpClient) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Invoke the next policy, or the transport once the chain is exhausted.
    pub async fn run(self, ctx: &Context, request: &mut Request) -> RestResult<Response> {
        ctx.check()?;

        match self.policies.split_first() {
            Some((policy, rest)) => {
                policy
                    .send(ctx, request, Next::new(rest, self.transport))
                    .await
            }
            None => ctx.run(self.transport.send(request)).await,
        }
    }

    /// Number of policies left before the transport.
    pub fn remaining(&self) -> usize {
        self.policies.len()
    }
}

impl Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("policies", &self.policies)
            .field("transport", &self.transport)
            .finish()
    }
}

/// Sets the `User-Agent` header.
///
/// Format: `[<application-id> ]azsdk-rust-<sdk-name>/<sdk-version> (<os>; <arch>)`.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    header: HeaderValue,
}

impl UserAgentPolicy {
    pub fn new(
        application_id: Option<&str>,
        sdk_name: &str,
        sdk_version: &str,
    ) -> RestResult<Self> {
        let base = format!(
            "azsdk-rust-{}/{} ({}; {})",
            sdk_name,
            sdk_version,
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        let value = match application_id {
            Some(app) if !app.is_empty() => format!("{app} {base}"),
            _ => base,
        };
        let header = HeaderValue::from_str(&value)
            .map_err(|_| RestError::configuration("application id is not a valid header value"))?;
        Ok(Self { header })
    }

    pub fn user_agent(&self) -> &str {
        self.header.to_str().unwrap_or_default()
    }
}

#[async_trait]
impl Policy for UserAgentPolicy {
    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> RestResult<Response> {
        request
            .headers_mut()
            .insert(USER_AGENT, self.header.clone());
        next.run(ctx, request).await
    }
}

/// Stamps every call with an `x-ms-client-request-id`.
///
/// The id comes from the context value [`CLIENT_REQUEST_ID_KEY`] when set,
/// otherwise an id already on the request is kept, otherwise a fresh UUID is
/// generated. Runs before retry, so every attempt shares the same id.
#[derive(Debug, Clone, Default)]
pub struct RequestIdPolicy;

#[async_trait]
impl Policy for RequestIdPolicy {
    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> RestResult<Response> {
        if let Some(id) = ctx.value(CLIENT_REQUEST_ID_KEY) {
            request.insert_header(CLIENT_REQUEST_ID_HEADER, id)?;
        } else if request.header(CLIENT_REQUEST_ID_HEADER).is_none() {
            let id = uuid::Uuid::new_v4().to_string();
            request.insert_header(CLIENT_REQUEST_ID_HEADER, &id)?;
        }
        next.run(ctx, request).await
    }
}

/// Adds a fixed set of headers to every request.
#[derive(Debug, Clone, Default)]
pub struct HeadersPolicy {
    headers: HeaderMap,
}

impl HeadersPolicy {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Build from string pairs, rejecting invalid names or values.
    pub fn from_pairs<'a, I>(pairs: I) -> RestResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RestError::configuration(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                RestError::configuration(format!("invalid value for header '{name}'"))
            })?;
            headers.insert(name, value);
        }
        Ok(Self { headers })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

#[async_trait]
impl Policy for HeadersPolicy {
    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> RestResult<Response> {
        for (name, value) in &self.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        next.run(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::test_support::MockTransport;
    use http::Method;
    use url::Url;

    fn request() -> Request {
        Request::new(
            Method::GET,
            Url::parse("https://contoso.example.com/queues").unwrap(),
        )
    }

    #[test]
    fn user_agent_includes_application_id() {
        let policy = UserAgentPolicy::new(Some("my-app"), "azure_jobrouter", "1.2.0").unwrap();
        assert!(policy.user_agent().starts_with("my-app azsdk-rust-azure_jobrouter/1.2.0 ("));

        let policy = UserAgentPolicy::new(None, "azure_jobrouter", "1.2.0").unwrap();
        assert!(policy.user_agent().starts_with("azsdk-rust-azure_jobrouter/1.2.0 ("));
    }

    #[test]
    fn user_agent_rejects_invalid_application_id() {
        let result = UserAgentPolicy::new(Some("bad\napp"), "sdk", "1.0.0");
        assert!(matches!(result, Err(RestError::Configuration(_))));
    }

    #[tokio::test]
    async fn request_id_is_generated_when_missing() {
        let transport = MockTransport::new().with_status(200);
        let pipeline = Pipeline::new(vec![Arc::new(RequestIdPolicy)], transport.clone());

        pipeline
            .send(&Context::new(), &mut request())
            .await
            .unwrap();

        let sent = transport.requests();
        let id = sent[0].header(CLIENT_REQUEST_ID_HEADER).unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn request_id_prefers_context_value() {
        let transport = MockTransport::new().with_status(200);
        let pipeline = Pipeline::new(vec![Arc::new(RequestIdPolicy)], transport.clone());
        let ctx = Context::new().with_value(CLIENT_REQUEST_ID_KEY, "caller-id-1");

        pipeline.send(&ctx, &mut request()).await.unwrap();

        assert_eq!(
            transport.requests()[0].header(CLIENT_REQUEST_ID_HEADER),
            Some("caller-id-1")
        );
    }

    #[tokio::test]
    async fn headers_policy_adds_static_headers() {
        let transport = MockTransport::new().with_status(200);
        let headers = HeadersPolicy::from_pairs([("x-ms-useragent-tag", "jobs")]).unwrap();
        let pipeline = Pipeline::new(vec![Arc::new(headers)], transport.clone());

        pipeline
            .send(&Context::new(), &mut request())
            .await
            .unwrap();

        assert_eq!(
            transport.requests()[0].header("x-ms-useragent-tag"),
            Some("jobs")
        );
    }

    #[test]
    fn headers_policy_rejects_bad_names() {
        let result = HeadersPolicy::from_pairs([("bad header", "v")]);
        assert!(matches!(result, Err(RestError::Configuration(_))));
    }

    #[tokio::test]
    async fn next_refuses_to_run_when_cancelled() {
        let transport = MockTransport::new().with_status(200);
        let pipeline = Pipeline::new(vec![], transport.clone());
        let ctx = Context::new();
        ctx.cancel();

        let err = pipeline.send(&ctx, &mut request()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.request_count(), 0);
    }
}
