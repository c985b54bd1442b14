//! Message model for the bridge
//!
//! Pure classification of input lines and topic construction. Nothing in
//! this module performs I/O.

pub mod messages;
pub mod topics;

pub use messages::{classify, InboundRecord, LineClass, PublishRequest};
pub use topics::{build_topic, sanitize};
