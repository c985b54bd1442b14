//! Line-to-message bridging
//!
//! - [`adapter`] - What happens to a single classified line
//! - [`ingest`] - The read loop that owns the session until input ends

pub mod adapter;
pub mod ingest;

pub use adapter::{handle_line, Dispatch};
pub use ingest::{IngestLoop, IngestSummary};
