//! Multi-queue job worker dispatch engine.
//!
//! A `Manager` owns a set of named queues, each backed by a pluggable
//! `Source` (in-memory `go_channel` or SQS) and dispatched through a
//! `Worker` with independent receive- and run-concurrency bounds. Handlers
//! are registered as `HandlerFactory` implementations, keyed by
//! `(queue_name, job_type)`, so every job is processed by a freshly
//! constructed instance.

mod config;
mod error;
mod job;
mod manager;
mod metrics;
mod registry;
mod source;
mod worker;

#[cfg(debug_assertions)]
pub mod mock;

pub use self::config::Config;
pub use self::config::GoChannelConfig;
#[cfg(debug_assertions)]
pub use self::config::MockConfig;
pub use self::config::QueueConfig;
pub use self::config::SourceConfig;
pub use self::config::SqsConfig;
pub use self::error::DispatchError;
pub use self::error::Result;
pub use self::job::Job;
pub use self::job::JobDesc;
pub use self::manager::Manager;
pub use self::manager::QueueCounters;
pub use self::manager::QueueCountersSnapshot;
pub use self::metrics::register_metrics;
pub use self::registry::Handler;
pub use self::registry::HandlerError;
pub use self::registry::HandlerFactory;
pub use self::registry::HandlerRegistry;
pub use self::registry::RunOutcome;
pub use self::source::AckToken;
pub use self::source::GoChannelSource;
pub use self::source::ReceivedMessage;
pub use self::source::Source;
pub use self::source::SqsSource;
