//! Lazy iteration over paginated list operations.
//!
//! A [`Pager`] fetches one page at a time through a [`Pipeline`], following
//! the continuation the service returns until a page comes back without one.

use crate::context::Context;
use crate::error::{RestError, RestResult};
use crate::pipeline::Pipeline;
use crate::request::{Request, Response};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use http::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use url::Url;

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pointer to the next page. `None` on the last page.
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    /// An empty continuation is treated the same as none.
    pub fn new(items: Vec<T>, continuation: Option<String>) -> Self {
        Self {
            items,
            continuation: continuation.filter(|c| !c.is_empty()),
        }
    }

    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}

/// How the continuation of a page turns into the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationStyle {
    /// The continuation is a URL, fetched with `GET`. Relative links are
    /// resolved against the URL of the page that returned them.
    NextLink,
    /// The continuation is a token sent back as query parameter `parameter`
    /// on a repeat of the initial request.
    Query { parameter: String },
}

impl ContinuationStyle {
    pub fn query(parameter: impl Into<String>) -> Self {
        Self::Query {
            parameter: parameter.into(),
        }
    }
}

#[derive(Deserialize)]
struct PagedBody<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink", alias = "@odata.nextLink", default)]
    next_link: Option<String>,
}

/// Decode the standard `{ "value": [...], "nextLink": "..." }` list body.
pub fn decode_json_page<T: DeserializeOwned>(response: Response) -> RestResult<Page<T>> {
    let body: PagedBody<T> = response.json()?;
    Ok(Page::new(body.value, body.next_link))
}

type PageDecoder<T> = dyn Fn(Response) -> RestResult<Page<T>> + Send + Sync;

struct PagerState<T> {
    pipeline: Pipeline,
    ctx: Context,
    request: Request,
    style: ContinuationStyle,
    decoder: Box<PageDecoder<T>>,
    page_size: Option<(String, u32)>,
}

enum Cursor {
    First,
    Next { continuation: String, base: Url },
}

/// A lazy sequence of pages from a list operation.
///
/// Nothing is fetched until the stream returned by
/// [`into_pages`](Self::into_pages) or [`into_stream`](Self::into_stream) is
/// polled. Pages are fetched strictly one after another; dropping the stream
/// leaves the remaining pages unfetched. The first failed fetch is yielded
/// and ends the stream.
pub struct Pager<T> {
    state: PagerState<T>,
}

impl<T: Send + 'static> Pager<T> {
    pub fn new<F>(
        pipeline: Pipeline,
        ctx: Context,
        request: Request,
        style: ContinuationStyle,
        decoder: F,
    ) -> Self
    where
        F: Fn(Response) -> RestResult<Page<T>> + Send + Sync + 'static,
    {
        Self {
            state: PagerState {
                pipeline,
                ctx,
                request,
                style,
                decoder: Box::new(decoder),
                page_size: None,
            },
        }
    }

    /// Ask for at most `size` items per page via query parameter `parameter`.
    pub fn with_page_size(mut self, parameter: impl Into<String>, size: u32) -> Self {
        self.state.page_size = Some((parameter.into(), size));
        self
    }

    /// Stream of whole pages.
    pub fn into_pages(self) -> BoxStream<'static, RestResult<Page<T>>> {
        let state = Arc::new(self.state);
        stream::try_unfold(Some(Cursor::First), move |cursor| {
            next_page(state.clone(), cursor)
        })
        .boxed()
    }

    /// Stream of individual items, in page order.
    pub fn into_stream(self) -> BoxStream<'static, RestResult<T>> {
        self.into_pages()
            .map_ok(|page| stream::iter(page.items.into_iter().map(Ok::<T, RestError>)))
            .try_flatten()
            .boxed()
    }
}

async fn next_page<T>(
    state: Arc<PagerState<T>>,
    cursor: Option<Cursor>,
) -> RestResult<Option<(Page<T>, Option<Cursor>)>> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };
    let request = state.request_for(cursor)?;
    let base = request.url().clone();
    let page = state.fetch(request).await?;
    let next = page
        .continuation
        .clone()
        .map(|continuation| Cursor::Next { continuation, base });
    Ok(Some((page, next)))
}

impl<T> PagerState<T> {
    fn request_for(&self, cursor: Cursor) -> RestResult<Request> {
        let mut request = match cursor {
            Cursor::First => self.request.clone(),
            Cursor::Next { continuation, base } => match &self.style {
                ContinuationStyle::NextLink => {
                    let url = base.join(&continuation).map_err(|e| {
                        RestError::invalid_request(format!("invalid next link: {e}"))
                    })?;
                    let mut request = Request::new(Method::GET, url);
                    *request.headers_mut() = self.request.headers().clone();
                    request.headers_mut().remove(http::header::CONTENT_TYPE);
                    request
                }
                ContinuationStyle::Query { parameter } => {
                    let mut request = self.request.clone();
                    request.set_query_param(parameter, &continuation);
                    request
                }
            },
        };

        if let Some((parameter, size)) = &self.page_size {
            request.set_query_param(parameter, &size.to_string());
        }
        Ok(request)
    }

    #[tracing::instrument(
        name = "azure_rest::pager::fetch",
        skip_all,
        fields(path = %request.url().path())
    )]
    async fn fetch(&self, mut request: Request) -> RestResult<Page<T>> {
        self.ctx.check()?;
        let response = self
            .pipeline
            .send(&self.ctx, &mut request)
            .await?
            .into_result()?;
        let page = (self.decoder)(response)?;
        tracing::debug!(
            items = page.items.len(),
            last = page.is_last(),
            "fetched page"
        );
        Ok(page)
    }
}

impl<T> Debug for Pager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("url", &self.state.request.url().as_str())
            .field("style", &self.state.style)
            .field("page_size", &self.state.page_size)
            .finish_non_exhaustive()
    }
}
