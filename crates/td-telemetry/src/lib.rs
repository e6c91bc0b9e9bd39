//! Tracing bootstrap for taskdeck services and tests.

pub mod logging;
