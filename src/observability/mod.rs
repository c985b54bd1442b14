//! Observability for the bridge
//!
//! Structured logging to stderr with span macros for the session task and
//! the ingest loop.

pub mod logging;

// Re-export for convenience
pub use logging::{init_logging, init_logging_with_verbosity, LogFormat};

// Span macros for structured logging
pub use logging::{ingest_span, mqtt_span};
