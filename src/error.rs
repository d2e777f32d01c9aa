use thiserror::Error;

/// Why an execution did not produce a renderable result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Source failed validation; not retryable without editing.
    #[error("Component failed validation: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Component execution timed out after {0}ms")]
    Timeout(u64),

    /// The component threw, or the source could not be turned into an
    /// invocable unit (message is prefixed with the failing stage).
    #[error("Component runtime error: {0}")]
    Runtime(String),

    #[error("Component exceeded the memory limit of {0} bytes")]
    MemoryLimitExceeded(usize),
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExecutionError::ValidationFailed(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid sandbox options: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
