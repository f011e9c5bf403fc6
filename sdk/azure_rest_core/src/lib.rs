#![doc = include_str!("../README.md")]

pub mod auth;
pub mod blocking;
pub mod client;
pub mod context;
pub mod error;
pub mod logging;
pub mod paging;
pub mod pipeline;
pub mod policy;
pub mod request;
pub mod retry;
pub mod signing;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use auth::{AccessToken, KeyCredential, RestCredential, TokenCredential};
pub use client::{ClientBuilder, ClientOptions, RestClient};
pub use context::Context;
pub use error::{RestError, RestResult};
pub use paging::{ContinuationStyle, Page, Pager};
pub use pipeline::Pipeline;
pub use policy::{Next, Policy};
pub use request::{Request, Response};
pub use transport::HttpClient;
