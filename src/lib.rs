//! Offline-first relay for service order submissions.
//!
//! Intercepts outgoing requests, attempts immediate delivery of mutation
//! writes, and on transport failure queues them durably for replay when the
//! platform signals that connectivity is back. Reads are served network-first
//! with cached fallbacks from a versioned asset cache.

pub mod cache;
pub mod classify;
pub mod config;
pub mod delivery;
pub mod push;
pub mod queue;
pub mod relay;
pub mod request;
pub mod sync;
