//! Fetching: client construction, retry/backoff, plain and rendered GETs

mod backoff;
mod client;
mod fetcher;

pub use backoff::BackoffPolicy;
pub use client::build_http_client;
pub use fetcher::{
    classify_status, classify_transport, fetch_page, render_page, FetchError, FetchedPage,
    RenderError, RetryDisposition,
};
