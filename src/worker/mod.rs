//! Lifecycle of the external automation worker.
//!
//! This module owns everything between an HTTP launch request and the OS
//! process doing the actual work:
//! - **Launching**: spawns the configured interpreter + script with the run's
//!   credentials, keyword and message as named flags
//! - **Streaming**: reads stdout/stderr line by line and pushes classified
//!   [`LogEvent`](crate::logs::LogEvent)s into a per-run channel
//! - **Tracking**: every run is held in a [`RunRegistry`] keyed by run id, so
//!   stop requests terminate exactly the children this panel started
//!
//! # Components
//!
//! - [`WorkerLauncher`]: builds the command, spawns it and supervises it
//! - [`RunRegistry`]: bounded set of active runs with their cancellation tokens
//!
//! # Run Flow
//!
//! 1. [`WorkerLauncher::launch`] reserves a registry slot (or fails with
//!    [`PanelError::AtCapacity`](crate::error::PanelError::AtCapacity))
//! 2. The worker is spawned; a spawn error becomes a single `error` event
//! 3. A supervisor task forwards output until the process exits or its
//!    token is cancelled by a stop request
//! 4. Output readers are drained, the slot is released and exactly one
//!    terminal event closes the stream

pub mod launcher;
pub mod registry;

pub use launcher::{RunRequest, RunStream, WorkerLauncher};
pub use registry::{RunInfo, RunRegistry, SharedRegistry};
