//! Classified log events produced by a worker run.
//!
//! Every line the worker prints ends up as a [`LogEvent`]: a [`LogKind`] used
//! for display styling plus the text to show. The same shape is used on the
//! wire between the panel and its consumers (one JSON object per line).
//!
//! # Components
//!
//! - [`event`]: the event type and its NDJSON encoding
//! - [`classify`]: turning raw stdout/stderr lines into events
//! - [`wire`]: incremental decoding of a chunked NDJSON response body

pub mod classify;
pub mod event;
pub mod wire;

pub use classify::{classify, MarkerSet};
pub use event::{LogEvent, LogKind};
pub use wire::EventDecoder;
