use std::fmt::Display;
use std::time::Instant;
use tracing::{Level, Span, field};

/// One wide event per unit of work.
///
/// Attributes are recorded on an underlying `tracing::Span` so exporters see
/// them as span attributes, and the closing event carries them all:
///
/// ```rust,ignore
/// let evt = WideEvent::new("token_issuance", module_path!());
/// evt.add("client_id", &client_id);
/// evt.add_opt("user_id", user_id.as_ref());
/// evt.info("token issued");
/// ```
///
/// Only the fields declared in [`WideEvent::new`] can be recorded; others are dropped by `tracing`.
#[derive(Clone)]
pub struct WideEvent {
    span: Span,
    started: Instant,
}

impl WideEvent {
    pub fn new(name: &'static str, target: &'static str) -> Self {
        // The span name must be a literal, so the logical name is an attribute.
        let span = tracing::span!(
            Level::INFO,
            "wide_event",
            target = target,
            event.name = %name,
            client_id = field::Empty,
            user_id = field::Empty,
            scope = field::Empty,
            outcome = field::Empty,
            error = field::Empty,
            duration_ms = field::Empty,
        );
        WideEvent {
            span,
            started: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn add<V: Display>(&self, key: &'static str, value: V) {
        self.span.record(key, field::display(value));
    }

    pub fn add_opt<V: Display>(&self, key: &'static str, value: Option<V>) {
        if let Some(v) = value {
            self.add(key, v);
        }
    }

    /// Emit the closing event with the elapsed time recorded.
    pub fn emit(&self, message: &str, level: Level) {
        self.span
            .record("duration_ms", self.started.elapsed().as_millis() as u64);
        self.span.in_scope(|| match level {
            Level::ERROR => tracing::event!(Level::ERROR, message = %message),
            Level::WARN => tracing::event!(Level::WARN, message = %message),
            Level::INFO => tracing::event!(Level::INFO, message = %message),
            Level::DEBUG => tracing::event!(Level::DEBUG, message = %message),
            _ => tracing::event!(Level::TRACE, message = %message),
        });
    }

    pub fn info(&self, message: &str) {
        self.emit(message, Level::INFO)
    }

    pub fn warn(&self, message: &str) {
        self.emit(message, Level::WARN)
    }
}
