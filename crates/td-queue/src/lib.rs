//! The taskdeck workflow scheduler: per-workspace automation loops that
//! promote tasks through the lifecycle under WIP limits, with model
//! dispatch gated by the execution circuit breaker.
//!
//! The queue consumes two collaborator traits ([`repository::TaskRepository`]
//! and [`invoker::ExecutionInvoker`]) and emits observer events through
//! `td_bridge::event_bus::EventSink`. Transport is out of scope; the
//! exposed surface is the [`manager::QueueManager`] methods.

pub mod invoker;
pub mod manager;
pub mod repository;
pub mod status;
