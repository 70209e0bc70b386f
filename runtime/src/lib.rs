//! # Commitflow Runtime
//!
//! Cross-cutting runtime support shared by the commit serializer and storage
//! backends.
//!
//! ## Components
//!
//! - **Retry**: Bounded exponential backoff for transient failures (checkpoint writes)
//! - **Metrics**: Metric descriptions, recorders and Prometheus recorder installation

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_with_backoff, retry_with_predicate};
