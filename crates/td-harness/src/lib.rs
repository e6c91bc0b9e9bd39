//! Reliability infrastructure for the taskdeck scheduler:
//! - Per-(provider, model, category) execution circuit breaker gating
//!   dispatch to failing model providers
//! - Cooperative shutdown coordination for workspace automation loops

pub mod breaker;
pub mod shutdown;
