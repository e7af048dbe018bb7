use crate::config::{AgentConfig, InitFailure, ModuleConfig};
use crate::error::{AgentError, Result};
use std::collections::HashMap;
use std::time::Duration;
use sysminer_collector::Collector;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_sink::Sink;

/// Longest wait between two init attempts under [`InitFailure::Retry`].
pub const MAX_INIT_BACKOFF: Duration = Duration::from_secs(30);

pub type CollectorFactory = Box<dyn Fn() -> Box<dyn Collector> + Send + Sync>;
pub type SinkFactory = Box<dyn Fn() -> Box<dyn Sink> + Send + Sync>;

/// Whether a module produces metrics or delivers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Input,
    Output,
}

/// A configured module whose name has been resolved against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntry {
    pub name: String,
    pub kind: ModuleKind,
    pub settings: ModuleSettings,
}

/// Initialised modules in registration order, ready to be wired up.
pub struct LoadedModules {
    pub collectors: Vec<Box<dyn Collector>>,
    pub sinks: Vec<Box<dyn Sink>>,
}

/// How startup reacts to a module that cannot reach its backing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitPolicy {
    pub on_failure: InitFailure,
    /// Retries after the first attempt under [`InitFailure::Retry`].
    pub retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub backoff: Duration,
}

impl InitPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            on_failure: config.init_failure,
            retries: config.init_retries,
            backoff: config.init_retry_backoff(),
        }
    }

    /// Delay before retry number `attempt + 1`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use sysminer_agent::config::InitFailure;
    /// use sysminer_agent::registry::InitPolicy;
    ///
    /// let policy = InitPolicy {
    ///     on_failure: InitFailure::Retry,
    ///     retries: 10,
    ///     backoff: Duration::from_millis(500),
    /// };
    /// assert_eq!(policy.backoff_for(0), Duration::from_millis(500));
    /// assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
    /// assert_eq!(policy.backoff_for(9), Duration::from_secs(30));
    /// ```
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff.saturating_mul(factor).min(MAX_INIT_BACKOFF)
    }

    /// Decides what to do after attempt number `attempt` (zero based)
    /// failed: `Ok(Some(delay))` retries after `delay`, `Ok(None)` keeps
    /// the module uninitialised, `Err` aborts startup.
    fn on_error(&self, name: &str, attempt: u32, err: ModuleError) -> Result<Option<Duration>> {
        if !err.is_transient() {
            return Err(AgentError::ModuleInit {
                name: name.to_string(),
                source: err,
            });
        }
        match self.on_failure {
            InitFailure::Defer => {
                tracing::warn!(
                    module = name,
                    error = %err,
                    "Module is unavailable, continuing without it until it reconnects"
                );
                Ok(None)
            }
            InitFailure::Retry if attempt < self.retries => {
                let delay = self.backoff_for(attempt);
                tracing::warn!(
                    module = name,
                    error = %err,
                    attempt = attempt + 1,
                    retries = self.retries,
                    delay_ms = delay.as_millis() as u64,
                    "Module init failed, retrying"
                );
                Ok(Some(delay))
            }
            InitFailure::Retry | InitFailure::Fatal => Err(AgentError::ModuleInit {
                name: name.to_string(),
                source: err,
            }),
        }
    }
}

impl Default for InitPolicy {
    fn default() -> Self {
        Self {
            on_failure: InitFailure::default(),
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Maps module names to the factories that build them.
///
/// # Examples
///
/// ```
/// use sysminer_agent::registry::{ModuleKind, ModuleRegistry};
///
/// let registry = ModuleRegistry::default();
/// assert_eq!(registry.kind_of("cpu").unwrap(), ModuleKind::Input);
/// assert_eq!(registry.kind_of("graphite").unwrap(), ModuleKind::Output);
/// assert!(registry.kind_of("smtp").is_err());
/// ```
pub struct ModuleRegistry {
    collectors: HashMap<String, CollectorFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            collectors: HashMap::new(),
            sinks: HashMap::new(),
        }
    }

    pub fn register_collector<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Collector> + Send + Sync + 'static,
    {
        self.collectors.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_sink<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Sink> + Send + Sync + 'static,
    {
        self.sinks.insert(name.to_string(), Box::new(factory));
    }

    /// Registered names, sorted.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .collectors
            .keys()
            .chain(self.sinks.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn kind_of(&self, name: &str) -> std::result::Result<ModuleKind, ModuleError> {
        if self.collectors.contains_key(name) {
            Ok(ModuleKind::Input)
        } else if self.sinks.contains_key(name) {
            Ok(ModuleKind::Output)
        } else {
            Err(ModuleError::UnknownModule(name.to_string()))
        }
    }

    pub fn create_collector(&self, name: &str) -> std::result::Result<Box<dyn Collector>, ModuleError> {
        self.collectors
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ModuleError::UnknownModule(name.to_string()))
    }

    pub fn create_sink(&self, name: &str) -> std::result::Result<Box<dyn Sink>, ModuleError> {
        self.sinks
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ModuleError::UnknownModule(name.to_string()))
    }

    /// Resolves the enabled modules, keeping their order. Disabled entries
    /// are skipped; an unknown name fails the whole set.
    pub fn resolve(&self, configs: &[ModuleConfig]) -> Result<Vec<ModuleEntry>> {
        let mut entries = Vec::with_capacity(configs.len());
        for config in configs {
            if !config.enabled {
                tracing::info!(module = %config.name, "Module disabled, skipping");
                continue;
            }
            let kind = self.kind_of(&config.name)?;
            tracing::info!(module = %config.name, ?kind, "Module enabled");
            entries.push(ModuleEntry {
                name: config.name.clone(),
                kind,
                settings: config.settings.clone(),
            });
        }
        Ok(entries)
    }

    /// Builds and initialises every entry under `policy`.
    pub async fn load(
        &self,
        entries: &[ModuleEntry],
        ctx: &ModuleContext,
        policy: &InitPolicy,
    ) -> Result<LoadedModules> {
        let mut loaded = LoadedModules {
            collectors: Vec::new(),
            sinks: Vec::new(),
        };
        for entry in entries {
            match entry.kind {
                ModuleKind::Input => {
                    let collector = self.create_collector(&entry.name)?;
                    loaded
                        .collectors
                        .push(init_collector(collector, entry, ctx, policy).await?);
                }
                ModuleKind::Output => {
                    let mut sink = self.create_sink(&entry.name)?;
                    init_sink(sink.as_mut(), entry, ctx, policy).await?;
                    loaded.sinks.push(sink);
                }
            }
        }
        Ok(loaded)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        use sysminer_collector::{cpu, disk, diskio, internal, load, memory, network, processes, redis};
        use sysminer_sink::graphite;

        let mut registry = Self::new();
        registry.register_collector(cpu::NAME, || Box::new(cpu::CpuCollector::new()));
        registry.register_collector(memory::NAME, || Box::new(memory::MemoryCollector::new()));
        registry.register_collector(network::NAME, || Box::new(network::NetworkCollector::new()));
        registry.register_collector(load::NAME, || Box::new(load::LoadCollector::new()));
        registry.register_collector(disk::NAME, || Box::new(disk::DiskCollector::new()));
        registry.register_collector(diskio::NAME, || Box::new(diskio::DiskIoCollector::new()));
        registry.register_collector(processes::NAME, || Box::new(processes::ProcessesCollector::new()));
        registry.register_collector(redis::NAME, || Box::new(redis::RedisCollector::new()));
        registry.register_collector(internal::NAME, || Box::new(internal::InternalCollector::new()));
        registry.register_sink(graphite::NAME, || Box::new(graphite::GraphiteSink::new()));
        registry
    }
}

/// Collector `init` may block on the network, so it runs off the runtime.
async fn init_collector(
    mut collector: Box<dyn Collector>,
    entry: &ModuleEntry,
    ctx: &ModuleContext,
    policy: &InitPolicy,
) -> Result<Box<dyn Collector>> {
    let mut attempt = 0;
    loop {
        let task_ctx = ctx.clone();
        let settings = entry.settings.clone();
        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = collector.init(&task_ctx, &settings);
            (collector, outcome)
        })
        .await
        .map_err(|e| AgentError::ModuleInit {
            name: entry.name.clone(),
            source: ModuleError::invalid(format!("init panicked: {e}")),
        })?;
        collector = returned;

        match outcome {
            Ok(()) => {
                tracing::info!(module = %entry.name, "Collector initialised");
                return Ok(collector);
            }
            Err(err) => match policy.on_error(&entry.name, attempt, err)? {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Ok(collector),
            },
        }
    }
}

async fn init_sink(
    sink: &mut dyn Sink,
    entry: &ModuleEntry,
    ctx: &ModuleContext,
    policy: &InitPolicy,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match sink.init(ctx, &entry.settings).await {
            Ok(()) => {
                tracing::info!(module = %entry.name, "Sink initialised");
                return Ok(());
            }
            Err(err) => match policy.on_error(&entry.name, attempt, err)? {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Ok(()),
            },
        }
    }
}
