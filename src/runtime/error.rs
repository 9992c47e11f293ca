//! Error types for compilation and scheduling.
//!
//! [`CompileError`] is what the external compiler reports for a single
//! attempt. [`RuntimeError`] is what the runtime surfaces to the embedder.
//! Neither cancellation nor host interruption appears here: a cancelled task
//! is a terminal state and interruptions are absorbed by the blocking waits.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single compilation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The compiler declined or failed to produce code.
    ///
    /// A permanent bailout means retrying the same input is pointless.
    #[error("{} bailout: {reason}", bailout_kind(.permanent))]
    Bailout { permanent: bool, reason: String },

    /// Unexpected failure inside the compiler (including panics).
    #[error("internal compiler error: {0}")]
    Internal(String),

    /// The compiler observed the task's cancellation and aborted.
    #[error("compilation aborted after cancellation")]
    Cancelled,
}

impl CompileError {
    /// Create a permanent bailout
    pub fn permanent(reason: impl Into<String>) -> Self {
        CompileError::Bailout {
            permanent: true,
            reason: reason.into(),
        }
    }

    /// Create a transient bailout
    pub fn transient(reason: impl Into<String>) -> Self {
        CompileError::Bailout {
            permanent: false,
            reason: reason.into(),
        }
    }

    /// Whether this failure is a bailout that may succeed on retry.
    #[inline]
    pub fn is_transient_bailout(&self) -> bool {
        matches!(self, CompileError::Bailout { permanent: false, .. })
    }

    /// Whether a synchronous caller should see this failure when
    /// compilation exceptions are configured to be thrown.
    #[inline]
    pub fn is_rethrowable(&self) -> bool {
        !self.is_transient_bailout() && !matches!(self, CompileError::Cancelled)
    }
}

fn bailout_kind(permanent: &bool) -> &'static str {
    if *permanent {
        "permanent"
    } else {
        "transient"
    }
}

/// Errors surfaced by the runtime to the embedding engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A bounded wait did not observe a terminal state in time.
    #[error("timed out after {waited:?} waiting for compilation of `{target}`")]
    Timeout { target: String, waited: Duration },

    /// A synchronous compilation failed and failures are configured to be thrown.
    #[error("compilation of `{target}` failed")]
    Compilation {
        target: String,
        #[source]
        source: CompileError,
    },

    /// No provider of a required collaborator was registered.
    #[error("no {0} provider registered")]
    MissingProvider(&'static str),
}

/// Errors loading a runtime configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
