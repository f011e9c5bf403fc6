//! Base client shared by generated service facades.
//!
//! [`ClientBuilder`] validates configuration and assembles the [`Pipeline`];
//! [`RestClient`] wraps it with endpoint-relative helpers.
//!
//! # Examples
//!
//! ## Using an access key
//! ```rust,no_run
//! use azure_rest_core::auth::RestCredential;
//! use azure_rest_core::client::RestClient;
//! use azure_rest_core::context::Context;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RestClient::builder()
//!     .endpoint("https://contoso.communication.azure.com")
//!     .credential(RestCredential::access_key("MTIzNDU2Nzg5MA==")?)
//!     .api_version("2024-01-01")
//!     .build()?;
//!
//! let queue: serde_json::Value = client.get_json(&Context::new(), "queues/q1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using a token credential
//! ```rust,no_run
//! use azure_rest_core::auth::{RestCredential, StaticTokenCredential};
//! use azure_rest_core::client::RestClient;
//! use azure_rest_core::retry::RetryOptions;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let token = StaticTokenCredential::new("eyJ0eXAi...", chrono::Utc::now() + chrono::TimeDelta::hours(1));
//!
//! let client = RestClient::builder()
//!     .endpoint("https://contoso.scan.purview.azure.com")
//!     .credential(RestCredential::token(token, ["https://purview.azure.net/.default"]))
//!     .retry_options(RetryOptions::fixed(5, Duration::from_secs(1)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::auth::RestCredential;
use crate::context::Context;
use crate::error::{RestError, RestResult};
use crate::logging::{HttpLogOptions, LoggingPolicy};
use crate::paging::{decode_json_page, ContinuationStyle, Pager};
use crate::pipeline::Pipeline;
use crate::policy::{HeadersPolicy, Policy, RequestIdPolicy, UserAgentPolicy};
use crate::request::{Request, Response};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::transport::{default_http_client, HttpClient};
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Environment variable consulted when no endpoint is configured.
pub const ENDPOINT_ENV: &str = "AZURE_REST_ENDPOINT";

/// Query parameter carrying the service API version.
pub const API_VERSION_PARAM: &str = "api-version";

/// Transport and telemetry settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    application_id: Option<String>,
    sdk_name: String,
    sdk_version: String,
    headers: Vec<(String, String)>,
    proxy: Option<String>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            application_id: None,
            sdk_name: env!("CARGO_PKG_NAME").to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            headers: Vec::new(),
            proxy: None,
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

impl ClientOptions {
    /// Prefix for the `User-Agent` header.
    pub fn application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// SDK name and version reported in the `User-Agent` header.
    ///
    /// Service crates set this to their own package name and version.
    pub fn sdk(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.sdk_name = name.into();
        self.sdk_version = version.into();
        self
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Route requests through a proxy.
    ///
    /// **Note:** Ignored when a custom transport is set via
    /// [`ClientBuilder::http_client`].
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    /// Maximum time allowed for establishing a connection.
    ///
    /// Defaults to [`DEFAULT_CONNECT_TIMEOUT`](crate::transport::DEFAULT_CONNECT_TIMEOUT).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Maximum time allowed for a whole request/response cycle, body
    /// included.
    ///
    /// Defaults to [`DEFAULT_READ_TIMEOUT`](crate::transport::DEFAULT_READ_TIMEOUT).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

/// The base client service facades are built on.
///
/// Cheaply cloneable and safe to share across tasks; every clone sends
/// through the same pipeline and connection pool.
#[derive(Debug, Clone)]
pub struct RestClient {
    endpoint: Url,
    pipeline: Pipeline,
    api_version: Option<String>,
}

impl RestClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    /// Resolve `path` against the endpoint.
    ///
    /// Relative paths extend the endpoint's path; paths starting with `/`
    /// replace it.
    pub fn url(&self, path: &str) -> RestResult<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| RestError::invalid_endpoint_with_source("failed to construct URL", e))
    }

    /// A request for `path`, carrying the `api-version` query parameter when
    /// one is configured.
    pub fn request(&self, method: Method, path: &str) -> RestResult<Request> {
        let mut request = Request::new(method, self.url(path)?);
        if let Some(version) = &self.api_version {
            request.set_query_param(API_VERSION_PARAM, version);
        }
        Ok(request)
    }

    /// Send `request` through the pipeline.
    ///
    /// # Errors
    ///
    /// Non-success statuses are returned as [`RestError::Service`]; see
    /// [`Response::into_result`].
    pub async fn send(&self, ctx: &Context, mut request: Request) -> RestResult<Response> {
        self.pipeline.send(ctx, &mut request).await?.into_result()
    }

    /// `GET path` and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, ctx: &Context, path: &str) -> RestResult<T> {
        let request = self.request(Method::GET, path)?;
        self.send(ctx, request).await?.json()
    }

    /// `POST path` with a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, ctx: &Context, path: &str, body: &B) -> RestResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.request(Method::POST, path)?;
        request.set_json(body)?;
        self.send(ctx, request).await?.json()
    }

    /// Page through a list operation returning the standard
    /// `{ "value": [...], "nextLink": "..." }` body.
    pub fn pager<T>(&self, ctx: &Context, request: Request, style: ContinuationStyle) -> Pager<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Pager::new(
            self.pipeline.clone(),
            ctx.clone(),
            request,
            style,
            decode_json_page::<T>,
        )
    }
}

/// Builder for [`RestClient`] and its [`Pipeline`].
///
/// Use [`RestClient::builder()`] to create a new builder.
#[derive(Debug, Default)]
pub struct ClientBuilder {
    endpoint: Option<String>,
    credential: Option<RestCredential>,
    retry_options: Option<RetryOptions>,
    retry_policy: Option<Arc<dyn Policy>>,
    log_options: Option<HttpLogOptions>,
    client_options: ClientOptions,
    policies: Vec<Arc<dyn Policy>>,
    http_client: Option<Arc<dyn HttpClient>>,
    pipeline: Option<Pipeline>,
    api_version: Option<String>,
}

impl ClientBuilder {
    /// Set the service endpoint URL.
    ///
    /// If not set, the builder will check the `AZURE_REST_ENDPOINT`
    /// environment variable.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the credential to use for authentication.
    ///
    /// If not set, the builder will use [`RestCredential::from_env()`].
    pub fn credential(mut self, credential: RestCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Configure the standard retry policy.
    ///
    /// Cannot be combined with [`retry_policy`](Self::retry_policy).
    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.retry_options = Some(options);
        self
    }

    /// Replace the standard retry policy.
    ///
    /// Cannot be combined with [`retry_options`](Self::retry_options).
    pub fn retry_policy(mut self, policy: impl Policy + 'static) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    pub fn log_options(mut self, options: HttpLogOptions) -> Self {
        self.log_options = Some(options);
        self
    }

    pub fn client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    /// Append a policy. Custom policies run after authentication, in the
    /// order they were added.
    pub fn add_policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Set a custom transport.
    ///
    /// **Note:** If you provide a custom transport, the proxy and timeout
    /// settings in [`ClientOptions`] are ignored.
    pub fn http_client(mut self, client: impl HttpClient + 'static) -> Self {
        self.http_client = Some(Arc::new(client));
        self
    }

    /// Use a prebuilt pipeline.
    ///
    /// Every other pipeline setting (credential, retry, logging, custom
    /// policies, transport) is ignored.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// API version appended by [`RestClient::request`].
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Assemble the pipeline without building a client.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Both a retry policy and retry options are set
    /// - No credential is set and none can be read from the environment
    /// - A header, application id, or proxy setting is invalid
    pub fn build_pipeline(&self) -> RestResult<Pipeline> {
        if let Some(pipeline) = &self.pipeline {
            return Ok(pipeline.clone());
        }

        if self.retry_policy.is_some() && self.retry_options.is_some() {
            return Err(RestError::configuration(
                "retry_policy and retry_options cannot both be set",
            ));
        }

        let credential = match &self.credential {
            Some(credential) => credential.clone(),
            None => RestCredential::from_env()?,
        };

        let options = &self.client_options;
        let transport: Arc<dyn HttpClient> = match &self.http_client {
            Some(client) => client.clone(),
            None => Arc::new(default_http_client(
                options.connect_timeout,
                options.read_timeout,
                options.proxy.as_deref(),
            )?),
        };

        let mut policies: Vec<Arc<dyn Policy>> = vec![
            Arc::new(UserAgentPolicy::new(
                options.application_id.as_deref(),
                &options.sdk_name,
                &options.sdk_version,
            )?),
            Arc::new(RequestIdPolicy),
        ];

        let headers = HeadersPolicy::from_pairs(
            options
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )?;
        if !headers.is_empty() {
            policies.push(Arc::new(headers));
        }

        policies.push(match &self.retry_policy {
            Some(policy) => policy.clone(),
            None => Arc::new(RetryPolicy::new(
                self.retry_options.clone().unwrap_or_default(),
            )),
        });
        policies.push(credential.policy());
        policies.extend(self.policies.iter().cloned());
        policies.push(Arc::new(LoggingPolicy::new(
            self.log_options.clone().unwrap_or_default(),
        )));

        tracing::debug!(
            policies = policies.len(),
            custom = self.policies.len(),
            "pipeline built"
        );
        Ok(Pipeline::new(policies, transport))
    }

    /// Build the `RestClient`.
    ///
    /// # Errors
    ///
    /// Everything [`build_pipeline`](Self::build_pipeline) reports, plus:
    /// - No endpoint is provided and `AZURE_REST_ENDPOINT` is not set
    /// - The endpoint URL is invalid
    pub fn build(self) -> RestResult<RestClient> {
        let pipeline = self.build_pipeline()?;

        let endpoint_str = self
            .endpoint
            .or_else(|| std::env::var(ENDPOINT_ENV).ok())
            .ok_or_else(|| {
                RestError::configuration(format!(
                    "endpoint is required. Set it via builder or {ENDPOINT_ENV} env var."
                ))
            })?;

        let mut endpoint = Url::parse(&endpoint_str)
            .map_err(|e| RestError::invalid_endpoint_with_source("invalid endpoint URL", e))?;
        if endpoint.cannot_be_a_base() || !matches!(endpoint.scheme(), "http" | "https") {
            return Err(RestError::invalid_endpoint(format!(
                "endpoint must be an http or https URL, got '{endpoint_str}'"
            )));
        }
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(RestClient {
            endpoint,
            pipeline,
            api_version: self.api_version,
        })
    }
}
