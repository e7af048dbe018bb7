//! Orchestration for the `sysminerd` host metrics agent.
//!
//! Every tick the [`scheduler::TickScheduler`] offers a poll request to each
//! collector's worker thread, drains whatever batches are ready from the
//! [`aggregator::ResponseAggregator`] and hands them to the
//! [`dispatcher::OutputDispatcher`]. A collector that is still busy is
//! skipped, so one slow source never stalls the others.

pub mod agent;
pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod signals;
pub mod worker;

pub use agent::Agent;
