//! The immutable policy chain plus transport.

use crate::context::Context;
use crate::error::RestResult;
use crate::policy::{Next, Policy};
use crate::request::{Request, Response};
use crate::transport::HttpClient;
use std::fmt::Debug;
use std::sync::Arc;

/// An ordered chain of [`Policy`] instances wrapping an [`HttpClient`].
///
/// Built once per client and shared by every call. Cloning is cheap and the
/// chain can never change after construction; per-call state travels in the
/// [`Context`] and [`Request`] arguments.
#[derive(Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
    transport: Arc<dyn HttpClient>,
}

impl Pipeline {
    /// Create a pipeline running `policies` in order, then `transport`.
    pub fn new(policies: Vec<Arc<dyn Policy>>, transport: impl HttpClient + 'static) -> Self {
        Self {
            policies: policies.into(),
            transport: Arc::new(transport),
        }
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    pub fn transport(&self) -> &Arc<dyn HttpClient> {
        &self.transport
    }

    /// Run `request` through the chain.
    ///
    /// Returns the final response whatever its status; mapping error statuses
    /// to [`RestError::Service`](crate::RestError::Service) is left to the
    /// caller.
    #[tracing::instrument(
        name = "azure_rest::pipeline::send",
        skip_all,
        fields(method = %request.method(), path = %request.url().path())
    )]
    pub async fn send(&self, ctx: &Context, request: &mut Request) -> RestResult<Response> {
        Next::new(&self.policies, self.transport.as_ref())
            .run(ctx, request)
            .await
    }
}

impl Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policies)
            .field("transport", &self.transport)
            .finish()
    }
}
