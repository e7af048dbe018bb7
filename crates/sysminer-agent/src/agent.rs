use crate::aggregator::ResponseAggregator;
use crate::config::AgentConfig;
use crate::dispatcher::OutputDispatcher;
use crate::error::Result;
use crate::registry::{InitPolicy, ModuleRegistry};
use crate::scheduler::TickScheduler;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::worker::WorkerPool;
use std::sync::Arc;
use sysminer_common::context::ModuleContext;
use tokio_util::sync::CancellationToken;

/// A fully wired agent: workers running, sinks initialised, waiting for
/// [`Agent::run`] to start ticking.
pub struct Agent {
    ctx: ModuleContext,
    scheduler: TickScheduler,
    coordinator: ShutdownCoordinator,
}

impl Agent {
    /// Resolves and initialises every configured module and starts one
    /// worker thread per collector.
    pub async fn start(config: &AgentConfig, registry: &ModuleRegistry) -> Result<Self> {
        let ctx = ModuleContext::new(config.interval(), config.resolve_hostname());
        tracing::info!(hostname = %ctx.hostname, interval_secs = config.interval_secs, "Loading modules");
        tracing::debug!(available = ?registry.module_names(), "Module registry");

        let entries = registry.resolve(&config.module_configs()?)?;
        let modules = registry
            .load(&entries, &ctx, &InitPolicy::from_config(config))
            .await?;
        if modules.sinks.is_empty() {
            tracing::warn!("No output modules configured, collected metrics will be discarded");
        }

        let aggregator = ResponseAggregator::new(modules.collectors.len());
        let workers = WorkerPool::spawn(modules.collectors, &aggregator, &ctx.stats)?;
        let dispatcher = OutputDispatcher::new(modules.sinks);
        tracing::info!(
            collectors = ?workers.names(),
            sinks = ?dispatcher.names(),
            queue_capacity = aggregator.capacity(),
            "Modules ready"
        );

        let scheduler = TickScheduler::new(
            config.interval(),
            workers,
            aggregator,
            dispatcher,
            Arc::clone(&ctx.stats),
        );
        Ok(Self {
            ctx,
            scheduler,
            coordinator: ShutdownCoordinator::new(config.shutdown_grace()),
        })
    }

    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    /// Ticks until `cancel` fires, then shuts every module down.
    pub async fn run(mut self, cancel: CancellationToken) -> ShutdownReport {
        self.scheduler.run(cancel).await;
        let (workers, aggregator, dispatcher) = self.scheduler.into_parts();
        self.coordinator.shutdown(workers, aggregator, dispatcher).await
    }
}
