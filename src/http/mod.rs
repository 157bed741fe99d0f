//! HTTP transport with a bounded request timeout and typed failures.
//!
//! There is no retry here; callers that want one wrap these calls.

mod client;

pub use client::{DEFAULT_TIMEOUT, Download, HttpClient};
