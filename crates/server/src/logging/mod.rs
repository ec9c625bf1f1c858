//! Structured logging helpers.

pub mod wide_events;

pub use wide_events::WideEvent;
