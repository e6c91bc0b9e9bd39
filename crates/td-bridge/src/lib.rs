//! Event plumbing between the scheduler core and its observers.
//!
//! The queue publishes through the [`event_bus::EventSink`] trait; the
//! transport layer (WebSocket broadcast, IPC) subscribes to the concrete
//! [`event_bus::EventBus`]. The core stays testable with a capturing sink.

pub mod event_bus;
pub mod protocol;
