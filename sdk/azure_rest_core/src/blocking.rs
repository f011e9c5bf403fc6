//! Synchronous wrappers for callers without an async runtime.
//!
//! [`BlockingClient`] owns a current-thread tokio runtime and drives one call
//! at a time on the calling thread. Using it from inside an async runtime is
//! reported as a configuration error instead of blocking the executor.
//! Dropping the last client or pager inside an async runtime is allowed: the
//! owned runtime is shut down in the background rather than joined.

use crate::client::RestClient;
use crate::context::Context;
use crate::error::{RestError, RestResult};
use crate::paging::{ContinuationStyle, Pager};
use crate::request::{Request, Response};
use futures::stream::{BoxStream, StreamExt};
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

fn ensure_not_async() -> RestResult<()> {
    if Handle::try_current().is_ok() {
        return Err(RestError::configuration(
            "blocking client cannot be used from within an async runtime",
        ));
    }
    Ok(())
}

/// Owned runtime that never blocks when dropped.
#[derive(Debug)]
struct BlockingRuntime(Option<Runtime>);

impl BlockingRuntime {
    fn block_on<F: Future>(&self, future: F) -> RestResult<F::Output> {
        ensure_not_async()?;
        let runtime = self
            .0
            .as_ref()
            .ok_or_else(|| RestError::configuration("blocking runtime has shut down"))?;
        Ok(runtime.block_on(future))
    }
}

impl Drop for BlockingRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Blocking counterpart of [`RestClient`].
#[derive(Debug, Clone)]
pub struct BlockingClient {
    client: RestClient,
    runtime: Arc<BlockingRuntime>,
}

impl BlockingClient {
    pub fn new(client: RestClient) -> RestResult<Self> {
        ensure_not_async()?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RestError::configuration(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            client,
            runtime: Arc::new(BlockingRuntime(Some(runtime))),
        })
    }

    /// The wrapped async client.
    pub fn client(&self) -> &RestClient {
        &self.client
    }

    fn block_on<F: Future>(&self, future: F) -> RestResult<F::Output> {
        self.runtime.block_on(future)
    }

    pub fn request(&self, method: Method, path: &str) -> RestResult<Request> {
        self.client.request(method, path)
    }

    pub fn send(&self, ctx: &Context, request: Request) -> RestResult<Response> {
        self.block_on(self.client.send(ctx, request))?
    }

    pub fn get_json<T: DeserializeOwned>(&self, ctx: &Context, path: &str) -> RestResult<T> {
        self.block_on(self.client.get_json(ctx, path))?
    }

    pub fn post_json<B, T>(&self, ctx: &Context, path: &str, body: &B) -> RestResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.block_on(self.client.post_json(ctx, path, body))?
    }

    /// Iterate the items of a standard list operation.
    pub fn pager<T>(
        &self,
        ctx: &Context,
        request: Request,
        style: ContinuationStyle,
    ) -> BlockingPager<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.iter(self.client.pager(ctx, request, style))
    }

    /// Drive any [`Pager`] as an iterator.
    pub fn iter<T: Send + 'static>(&self, pager: Pager<T>) -> BlockingPager<T> {
        BlockingPager {
            items: Some(pager.into_stream()),
            runtime: self.runtime.clone(),
        }
    }
}

/// Pull-style iterator over the items of a [`Pager`].
///
/// Pages are fetched on demand as the iterator advances. The first error is
/// returned once and ends the iteration.
pub struct BlockingPager<T> {
    items: Option<BoxStream<'static, RestResult<T>>>,
    runtime: Arc<BlockingRuntime>,
}

impl<T> Iterator for BlockingPager<T> {
    type Item = RestResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let items = self.items.as_mut()?;
        match self.runtime.block_on(items.next()) {
            Ok(Some(Ok(item))) => Some(Ok(item)),
            Ok(Some(Err(err))) | Err(err) => {
                self.items = None;
                Some(Err(err))
            }
            Ok(None) => {
                self.items = None;
                None
            }
        }
    }
}

impl<T> std::fmt::Debug for BlockingPager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingPager")
            .field("finished", &self.items.is_none())
            .finish_non_exhaustive()
    }
}
