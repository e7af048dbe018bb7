use std::path::PathBuf;
use sysminer_common::error::ModuleError;

/// Errors that prevent the agent from starting.
///
/// Anything that goes wrong after startup (a failed poll, an unreachable
/// sink) is logged and absorbed instead.
///
/// # Examples
///
/// ```rust
/// use sysminer_agent::error::AgentError;
///
/// let err = AgentError::InvalidConfig("interval_secs must be greater than zero".into());
/// assert!(err.to_string().contains("interval_secs"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The agent file parsed but holds an unusable value.
    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    /// A configured module could not be resolved.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// A module's `init` failed and the init policy gave up on it.
    #[error("module '{name}' failed to initialise: {source}")]
    ModuleInit {
        name: String,
        #[source]
        source: ModuleError,
    },

    #[error("failed to start worker thread for collector '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;
