use crate::error::{AgentError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysminer_common::settings::ModuleSettings;

/// Hostname reported when none is configured and the OS lookup fails.
pub const UNKNOWN_HOSTNAME: &str = "unknown";

/// Upper bound for `interval_secs` and `shutdown_grace_secs`: one day.
pub const MAX_DURATION_SECS: u64 = 86_400;

/// What to do when a module cannot reach its backing service during `init`.
///
/// Configuration errors are always fatal regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitFailure {
    /// Abort startup.
    Fatal,
    /// Retry with exponential backoff, then abort.
    Retry,
    /// Keep the module and let it reconnect on its next poll or send.
    #[default]
    Defer,
}

/// One configured module, either inline in the agent file or as a file
/// of its own in `module_dir`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: ModuleSettings,
}

impl ModuleConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| AgentError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Overrides the OS hostname in metric paths.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Directory of per-module `*.toml` files. Relative paths are resolved
    /// against the directory of the agent config file.
    #[serde(default)]
    pub module_dir: Option<PathBuf>,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    #[serde(default)]
    pub init_failure: InitFailure,
    #[serde(default = "default_init_retries")]
    pub init_retries: u32,
    #[serde(default = "default_init_retry_backoff_ms")]
    pub init_retry_backoff_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    10
}

fn default_init_retries() -> u32 {
    3
}

fn default_init_retry_backoff_ms() -> u64 {
    500
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content).map_err(|e| match e {
            AgentError::ConfigParse { source, .. } => AgentError::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        if let (Some(dir), Some(base)) = (&config.module_dir, path.parent()) {
            if dir.is_relative() {
                config.module_dir = Some(base.join(dir));
            }
        }
        Ok(config)
    }

    /// Parses and validates an agent config held in memory.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|source| AgentError::ConfigParse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_DURATION_SECS).contains(&self.interval_secs) {
            return Err(AgentError::InvalidConfig(format!(
                "interval_secs must be between 1 and {MAX_DURATION_SECS}, got {}",
                self.interval_secs
            )));
        }
        if self.shutdown_grace_secs > MAX_DURATION_SECS {
            return Err(AgentError::InvalidConfig(format!(
                "shutdown_grace_secs must be at most {MAX_DURATION_SECS}, got {}",
                self.shutdown_grace_secs
            )));
        }
        if let Some(hostname) = &self.hostname {
            if hostname.trim().is_empty() {
                return Err(AgentError::InvalidConfig("hostname must not be empty".into()));
            }
        }
        if let Some(module) = self.modules.iter().find(|m| m.name.is_empty()) {
            return Err(AgentError::InvalidConfig(format!(
                "inline module entry has an empty name: {module:?}"
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn init_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.init_retry_backoff_ms)
    }

    /// Configured hostname, else the OS hostname, else [`UNKNOWN_HOSTNAME`].
    pub fn resolve_hostname(&self) -> String {
        if let Some(hostname) = &self.hostname {
            return hostname.clone();
        }
        match hostname::get() {
            Ok(name) => {
                let name = name.to_string_lossy().into_owned();
                if name.is_empty() {
                    UNKNOWN_HOSTNAME.to_string()
                } else {
                    name
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read OS hostname");
                UNKNOWN_HOSTNAME.to_string()
            }
        }
    }

    /// Every configured module in registration order: inline entries
    /// first, then `module_dir` files sorted by file name.
    pub fn module_configs(&self) -> Result<Vec<ModuleConfig>> {
        let mut modules = self.modules.clone();
        if let Some(dir) = &self.module_dir {
            modules.extend(load_module_dir(dir)?);
        }
        Ok(modules)
    }
}

fn load_module_dir(dir: &Path) -> Result<Vec<ModuleConfig>> {
    let entries = std::fs::read_dir(dir).map_err(|source| AgentError::ConfigRead {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| AgentError::ConfigRead {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            tracing::debug!(path = %path.display(), "Skipping subdirectory in module dir");
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            tracing::debug!(path = %path.display(), "Skipping non-toml file in module dir");
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    let mut modules = Vec::with_capacity(paths.len());
    for path in paths {
        let module = ModuleConfig::load(&path)?;
        if module.name.is_empty() {
            return Err(AgentError::InvalidConfig(format!(
                "module file {} has an empty name",
                path.display()
            )));
        }
        modules.push(module);
    }
    Ok(modules)
}
