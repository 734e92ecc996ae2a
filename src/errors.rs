//! Typed error hierarchy for the pulsewatch pipeline.
//!
//! Three top-level enums cover the three failure domains:
//! - `BusError`: queue wiring and delivery failures
//! - `BuildError`: malformed build requests
//! - `PipelineError`: component setup and loop failures

use thiserror::Error;

/// Errors from the message bus.
///
/// Every variant except `Closed` points at a wiring bug rather than an
/// operational condition.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Queue {0} already setup")]
    DuplicateQueue(String),

    #[error("Missing queue {0}")]
    UnknownQueue(String),

    #[error("Queue {queue} does not carry messages of type {expected}")]
    MessageType {
        queue: String,
        expected: &'static str,
    },

    #[error("Queue {queue} needs a capacity above zero, got {capacity}")]
    InvalidCapacity { queue: String, capacity: usize },

    #[error("Queue {0} is closed")]
    Closed(String),
}

/// Errors raised while building a `Build` from a review event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Invalid webhook parameters: missing {0}")]
    MissingField(&'static str),

    #[error("Invalid webhook parameters: {field} should be an integer, got '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("Invalid target format: {0}")]
    InvalidTarget(String),
}

/// Errors from pipeline assembly and component loops.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
