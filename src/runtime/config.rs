//! Runtime Configuration
//!
//! Configuration is plain data: built in code via [`Default`] and struct
//! update syntax, or loaded from a TOML file.
//!
//! ## TOML Format
//!
//! ```toml
//! compiler_threads = 2
//! queue_ordering = "tier-priority"
//! compilation_exceptions_are_thrown = true
//! trace_compilation = false
//!
//! [inlining]
//! max_depth = 8
//! max_nodes = 256
//! min_call_count = 100
//! max_callee_size = 300
//! budget = 3000
//! ```

use std::path::Path;

use serde::Deserialize;

use super::error::ConfigError;

/// Maximum inlining depth below the compilation root
pub const DEFAULT_MAX_INLINING_DEPTH: usize = 8;

/// Maximum number of decision nodes in one inlining tree
pub const DEFAULT_MAX_INLINING_NODES: usize = 256;

/// Call count a call site needs before the profile-guided policy inlines it
pub const DEFAULT_MIN_CALL_COUNT: u64 = 100;

/// Largest callee (in AST nodes) the profile-guided policy will inline
pub const DEFAULT_MAX_CALLEE_SIZE: u32 = 300;

/// Total callee size (in AST nodes) the profile-guided policy will inline
/// into one compilation root
pub const DEFAULT_INLINING_BUDGET: u64 = 3_000;

/// Dispatch order of queued compilations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueOrdering {
    /// First-tier requests are dispatched before last-tier requests;
    /// submission order within a tier.
    #[default]
    TierPriority,
    /// Strict submission order regardless of tier.
    Fifo,
}

/// Inlining limits (the `[inlining]` section).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InliningConfig {
    pub max_depth: usize,
    pub max_nodes: usize,
    pub min_call_count: u64,
    pub max_callee_size: u32,
    /// Cumulative size of all callees inlined into one root
    pub budget: u64,
}

impl Default for InliningConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_INLINING_DEPTH,
            max_nodes: DEFAULT_MAX_INLINING_NODES,
            min_call_count: DEFAULT_MIN_CALL_COUNT,
            max_callee_size: DEFAULT_MAX_CALLEE_SIZE,
            budget: DEFAULT_INLINING_BUDGET,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of background compiler threads (0 = derive from CPU count)
    pub compiler_threads: usize,

    /// Dispatch order of the compile queue
    pub queue_ordering: QueueOrdering,

    /// Surface permanent compiler failures from synchronous `finish_compilation`
    pub compilation_exceptions_are_thrown: bool,

    /// Install the tracing listener that logs every compilation event
    pub trace_compilation: bool,

    /// Inlining limits
    pub inlining: InliningConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            compiler_threads: 0,
            queue_ordering: QueueOrdering::default(),
            compilation_exceptions_are_thrown: false,
            trace_compilation: false,
            inlining: InliningConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Effective number of compiler threads.
    ///
    /// Leaves one core to the application threads, but never drops below one.
    pub fn effective_compiler_threads(&self) -> usize {
        if self.compiler_threads > 0 {
            self.compiler_threads
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }

    /// Create a configuration with compilation tracing enabled
    pub fn with_trace(mut self) -> Self {
        self.trace_compilation = true;
        self
    }
}
