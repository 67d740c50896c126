//! Network utilities for asset fetching.
//!
//! This module provides:
//! - Retry policy with exponential backoff and a retryable-error predicate
//! - HTTP client with redirect following and an in-flight request cap

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{retry_async, RetryConfig, RetryPolicy, RetryStats};
