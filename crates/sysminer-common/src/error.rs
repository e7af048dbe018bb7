use crate::settings::SettingsError;

/// Errors raised while resolving or initialising a module.
///
/// Only [`ModuleError::Connect`] is transient; everything else means the
/// configuration itself is wrong and the agent must refuse to start.
///
/// # Examples
///
/// ```rust
/// use sysminer_common::error::ModuleError;
///
/// let err = ModuleError::connect("redis", "connection refused");
/// assert!(err.is_transient());
/// assert!(!ModuleError::UnknownModule("smtp".into()).is_transient());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// A setting is present but its value is unusable (e.g. port out of range).
    #[error("invalid module configuration: {0}")]
    InvalidConfig(String),

    /// A required setting is absent or has the wrong type.
    #[error("invalid module settings: {0}")]
    Settings(#[from] SettingsError),

    /// The configured name has no factory in the module registry.
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    /// The module could not reach its backing service.
    #[error("{module}: connection failed: {reason}")]
    Connect { module: String, reason: String },
}

impl ModuleError {
    pub fn connect(module: &str, reason: impl std::fmt::Display) -> Self {
        Self::Connect {
            module: module.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

pub type Result<T> = std::result::Result<T, ModuleError>;
