use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use prometheus::Registry;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::Config;
use super::config::SourceConfig;
use super::metrics;
use super::registry::HandlerFactory;
use super::registry::HandlerRegistry;
use super::source::GoChannelSource;
use super::source::Source;
use super::source::SqsSource;
use super::worker::Completion;
use super::worker::JobReport;
use super::worker::JobReportKind;
use super::worker::Worker;
use super::DispatchError;
use super::Result;

/// Atomic, per-queue job counters, exposed through `Manager::queue_counters`.
#[derive(Default)]
pub struct QueueCounters {
    pub received: AtomicU64,
    pub done: AtomicU64,
    pub failed: AtomicU64,
    pub panicked: AtomicU64,
    pub invalid: AtomicU64,
    pub unknown_type: AtomicU64,
}

/// A point-in-time snapshot of a queue's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueCountersSnapshot {
    pub received: u64,
    pub done: u64,
    pub failed: u64,
    pub panicked: u64,
    pub invalid: u64,
    pub unknown_type: u64,
}

impl QueueCounters {
    fn snapshot(&self) -> QueueCountersSnapshot {
        QueueCountersSnapshot {
            received: self.received.load(Ordering::SeqCst),
            done: self.done.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
            invalid: self.invalid.load(Ordering::SeqCst),
            unknown_type: self.unknown_type.load(Ordering::SeqCst),
        }
    }

    fn apply(&self, kind: &JobReportKind) {
        match kind {
            JobReportKind::Received => {
                self.received.fetch_add(1, Ordering::SeqCst);
            }
            JobReportKind::Completed(completion) => {
                self.done.fetch_add(1, Ordering::SeqCst);
                match completion {
                    Completion::Success => {}
                    Completion::Failed => {
                        self.failed.fetch_add(1, Ordering::SeqCst);
                    }
                    Completion::Panicked => {
                        self.panicked.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            JobReportKind::Invalid => {
                self.invalid.fetch_add(1, Ordering::SeqCst);
            }
            JobReportKind::UnknownType => {
                self.unknown_type.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

struct QueueEntry {
    source: Arc<dyn Source>,
    counters: Arc<QueueCounters>,
    loop_handle: JoinHandle<()>,
}

/// Owns one `Worker`/`Source` pair per configured queue, a shared handler
/// registry, and the single accounting task that turns `JobReport`s into
/// counters and Prometheus metrics.
///
/// Mirrors the role of the teacher's `TasksAdmin`/worker-pool pairing, but
/// collapsed into a single type: this crate has no separate admin binary.
pub struct Manager {
    logger: Logger,
    registry: Arc<HandlerRegistry>,
    queues: Arc<RwLock<HashMap<String, QueueEntry>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    done_tx: mpsc::Sender<JobReport>,
    metrics_registry: Registry,
}

impl Manager {
    /// An empty manager with no queues configured yet.
    pub fn new(logger: Logger) -> Manager {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(1024);
        let registry = Arc::new(HandlerRegistry::new());
        let metrics_registry = Registry::new();
        metrics::register_metrics(&logger, &metrics_registry);

        let queues: Arc<RwLock<HashMap<String, QueueEntry>>> = Arc::new(RwLock::new(HashMap::new()));
        Self::spawn_accounting(logger.clone(), done_rx, Arc::clone(&queues));

        Manager {
            logger,
            registry,
            queues,
            shutdown_tx,
            shutdown_rx,
            done_tx,
            metrics_registry,
        }
    }

    fn spawn_accounting(logger: Logger, mut done_rx: mpsc::Receiver<JobReport>, queues: Arc<RwLock<HashMap<String, QueueEntry>>>) {
        tokio::spawn(async move {
            while let Some(report) = done_rx.recv().await {
                let to_increment: &[&prometheus::CounterVec] = match &report.kind {
                    JobReportKind::Received => &[&metrics::JOBS_RECEIVED_TOTAL],
                    JobReportKind::Completed(Completion::Success) => &[&metrics::JOBS_DONE_TOTAL],
                    JobReportKind::Completed(Completion::Failed) => {
                        &[&metrics::JOBS_DONE_TOTAL, &metrics::JOBS_FAILED_TOTAL]
                    }
                    JobReportKind::Completed(Completion::Panicked) => {
                        &[&metrics::JOBS_DONE_TOTAL, &metrics::JOBS_PANICKED_TOTAL]
                    }
                    JobReportKind::Invalid => &[&metrics::JOBS_INVALID_TOTAL],
                    JobReportKind::UnknownType => &[&metrics::JOBS_UNKNOWN_TYPE_TOTAL],
                };
                for metric in to_increment {
                    metric.with_label_values(&[&report.queue]).inc();
                }

                let queues = queues.read().expect("queue map lock poisoned");
                match queues.get(&report.queue) {
                    Some(entry) => entry.counters.apply(&report.kind),
                    None => warn!(logger, "Job report for unknown queue"; "queue" => &report.queue),
                }
            }
        });
    }

    /// Parse, validate, and apply a JSON configuration document.
    pub async fn init_with_json_config(&self, text: &str) -> Result<()> {
        let config = Config::from_json(text)?;
        self.init_with_config(config).await
    }

    /// Instantiate one `Source` + `Worker` per enabled queue in `config`.
    pub async fn init_with_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        for queue in config.queues.into_iter().filter(|q| q.enabled) {
            let source: Arc<dyn Source> = match &queue.source {
                SourceConfig::GoChannel { go_channel } => Arc::new(GoChannelSource::new(go_channel.size)),
                SourceConfig::Sqs { sqs } => {
                    Arc::new(SqsSource::new(sqs, self.logger.new(o!("queue" => queue.name.clone()))).await?)
                }
                #[cfg(debug_assertions)]
                SourceConfig::Mock { mock } => Arc::new(crate::mock::MockSource::new(mock.batch_size)),
            };

            let counters = Arc::new(QueueCounters::default());
            let worker = Arc::new(Worker {
                queue_name: queue.name.clone(),
                source: Arc::clone(&source),
                registry: Arc::clone(&self.registry),
                queue_concurrency: queue.queue_concurrency as usize,
                worker_concurrency: queue.worker_concurrency as usize,
                logger: self.logger.new(o!("queue" => queue.name.clone())),
                done_tx: self.done_tx.clone(),
            });
            let loop_handle = worker.spawn(self.shutdown_rx.clone());

            info!(self.logger, "Queue registered"; "queue" => &queue.name, "source" => queue.source.type_name());
            self.queues.write().expect("queue map lock poisoned").insert(
                queue.name.clone(),
                QueueEntry {
                    source,
                    counters,
                    loop_handle,
                },
            );
        }
        Ok(())
    }

    /// Register a handler factory for `(queue_name, job_type)`.
    ///
    /// Fails with `UnknownQueue` if no queue by that name was configured.
    pub fn register_job_type(&self, queue_name: &str, job_type: &str, factory: Arc<dyn HandlerFactory>) -> Result<()> {
        if !self.queues.read().expect("queue map lock poisoned").contains_key(queue_name) {
            return Err(DispatchError::UnknownQueue(queue_name.to_string()));
        }
        self.registry.register(queue_name, job_type, factory);
        Ok(())
    }

    /// The `Source` backing a configured queue, for producers that want to
    /// send messages directly.
    pub fn get_queue_by_name(&self, name: &str) -> Result<Arc<dyn Source>> {
        self.queues
            .read()
            .expect("queue map lock poisoned")
            .get(name)
            .map(|entry| Arc::clone(&entry.source))
            .ok_or_else(|| DispatchError::UnknownQueue(name.to_string()))
    }

    /// Convenience wrapper around `get_queue_by_name(..).send(..)`.
    pub async fn send(&self, queue_name: &str, bytes: Vec<u8>) -> Result<()> {
        self.get_queue_by_name(queue_name)?.send(bytes).await
    }

    /// Names of all currently configured queues.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.read().expect("queue map lock poisoned").keys().cloned().collect()
    }

    /// A snapshot of a queue's counters, or `None` if the queue is unknown.
    pub fn queue_counters(&self, name: &str) -> Option<QueueCountersSnapshot> {
        self.queues
            .read()
            .expect("queue map lock poisoned")
            .get(name)
            .map(|entry| entry.counters.snapshot())
    }

    fn aggregate<F>(&self, f: F) -> u64
    where
        F: Fn(&QueueCountersSnapshot) -> u64,
    {
        self.queues
            .read()
            .expect("queue map lock poisoned")
            .values()
            .map(|entry| f(&entry.counters.snapshot()))
            .sum()
    }

    /// Jobs that have moved past dispatch to some terminal outcome, across
    /// all queues: completed (successfully, with an error, or by panicking),
    /// rejected as invalid, or rejected as an unknown job type. Does not
    /// count jobs merely accepted into the run stage but not yet finished.
    pub fn job_counter(&self) -> u64 {
        self.aggregate(|c| c.done + c.invalid + c.unknown_type)
    }

    /// Jobs for which `Done` returned, regardless of `Run`'s outcome — a
    /// job whose `Run` errored or panicked still counts here once `Done`
    /// completes.
    pub fn job_done_counter(&self) -> u64 {
        self.aggregate(|c| c.done)
    }

    /// Subset of `job_done_counter` whose `Run` returned an error.
    pub fn job_failed_counter(&self) -> u64 {
        self.aggregate(|c| c.failed)
    }

    /// Subset of `job_done_counter` whose `Run` panicked.
    pub fn job_panicked_counter(&self) -> u64 {
        self.aggregate(|c| c.panicked)
    }

    /// The registry backing Prometheus metrics, for exposition endpoints.
    pub fn metrics_registry(&self) -> &Registry {
        &self.metrics_registry
    }

    /// Block until `shutdown` is called from another task, then wait for
    /// every worker loop to drain before returning.
    ///
    /// Mirrors the teacher's `WorkerSetPool`, whose thread-join wait loop
    /// blocks the embedding process until `stop()` releases its threads;
    /// here the equivalent wait is on the shutdown signal and the worker
    /// loop tasks rather than OS threads.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        self.wait_for_drain(None).await;
    }

    /// Signal every worker loop to stop after its current batch and, if
    /// `deadline` is given, wait up to that long for them to drain.
    /// Idempotent: repeat calls are no-ops once shutdown has been signalled.
    pub async fn shutdown(&self, deadline: Option<Duration>) {
        let _ = self.shutdown_tx.send(true);
        for (name, source) in self
            .queues
            .read()
            .expect("queue map lock poisoned")
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.source)))
            .collect::<Vec<_>>()
        {
            source.close().await;
            info!(self.logger, "Closed queue source"; "queue" => name);
        }
        self.wait_for_drain(deadline).await;
    }

    async fn wait_for_drain(&self, deadline: Option<Duration>) {
        let handles: Vec<JoinHandle<()>> = {
            let mut queues = self.queues.write().expect("queue map lock poisoned");
            queues.values_mut().map(|entry| std::mem::replace(&mut entry.loop_handle, tokio::spawn(async {}))).collect()
        };
        let wait = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        match deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, wait).await.is_err() {
                    warn!(self.logger, "Shutdown deadline elapsed before all queues drained");
                }
            }
            None => wait.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use slog::Discard;
    use slog::Logger;

    use super::Manager;
    use crate::job::Job;
    use crate::registry::Handler;
    use crate::registry::HandlerError;
    use crate::registry::RunOutcome;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl Handler for NoopHandler {
        async fn run(&mut self, _job: &Job) -> Result<(), HandlerError> {
            Ok(())
        }
        async fn done(&mut self, _job: &Job, _outcome: &RunOutcome) {}
    }

    fn test_logger() -> Logger {
        Logger::root(Discard, slog::o!())
    }

    #[tokio::test]
    async fn init_registers_one_queue_per_config_entry() {
        let manager = Manager::new(test_logger());
        let config = r#"[
            {"name": "q1", "queue_type": "go_channel", "go_channel": {"size": 4},
             "queue_concurrency": 2, "worker_concurrency": 4}
        ]"#;
        manager.init_with_json_config(config).await.unwrap();
        assert_eq!(manager.queue_names(), vec!["q1".to_string()]);
    }

    #[tokio::test]
    async fn register_job_type_fails_for_unknown_queue() {
        let manager = Manager::new(test_logger());
        let err = manager.register_job_type("missing", "t", Arc::new(|| NoopHandler));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn send_and_receive_round_trip_through_a_configured_queue() {
        let manager = Manager::new(test_logger());
        let config = r#"[
            {"name": "q1", "queue_type": "go_channel", "go_channel": {"size": 4},
             "queue_concurrency": 2, "worker_concurrency": 4}
        ]"#;
        manager.init_with_json_config(config).await.unwrap();
        manager
            .register_job_type("q1", "t", Arc::new(|| NoopHandler))
            .unwrap();
        manager
            .send("q1", br#"{"job_id":"id","job_type":"t","payload":null}"#.to_vec())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(manager.job_done_counter(), 1);
        assert_eq!(manager.job_counter(), 1);
    }
}
