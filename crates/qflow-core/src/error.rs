//! Error kinds for the queue reconstruction pipeline.
//!
//! Three kinds, matching the boundary contract: a missing/malformed input
//! (`Contract`), an out-of-range option (`Config`), and a non-convergent QP
//! backend (`Solver`). All are terminal for the call — the core never
//! partially succeeds and never retries (retries are a caller concern).

use thiserror::Error;

/// An error raised by the queue reconstruction pipeline.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A required input was missing or malformed (e.g. a missing column, a
    /// grid with the wrong spacing).
    #[error("contract violation in `{field}`: {message}")]
    Contract { field: String, message: String },

    /// An option was out of the range its component accepts.
    #[error("invalid configuration for `{option}`: {message}")]
    Config { option: String, message: String },

    /// The QP backend returned a non-optimal terminal status.
    #[error("QP solver did not converge (status: {status}): {message}")]
    Solver { status: String, message: String },
}

impl QueueError {
    pub fn contract(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Contract {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn config(option: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            option: option.into(),
            message: message.into(),
        }
    }

    pub fn solver(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Solver {
            status: status.into(),
            message: message.into(),
        }
    }
}
