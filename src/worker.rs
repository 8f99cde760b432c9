use std::any::Any;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;
use std::time::Instant;

use futures::FutureExt;
use slog::error;
use slog::info;
use slog::trace;
use slog::warn;
use slog::Logger;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::job::Job;
use super::job::JobDesc;
use super::registry::HandlerRegistry;
use super::registry::RunOutcome;
use super::source::ReceivedMessage;
use super::source::Source;

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(500);

thread_local! {
    static LAST_PANIC_LOCATION: RefCell<Option<String>> = RefCell::new(None);
}

static INSTALL_PANIC_HOOK: Once = Once::new();

/// Install a panic hook, once per process, that stashes the panic location
/// in a thread-local so `catch_unwind`-based recovery can attach it to the
/// structured log line (plain `catch_unwind` only gives back the payload,
/// not where it happened).
fn ensure_panic_hook_installed() {
    INSTALL_PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "<unknown location>".into());
            LAST_PANIC_LOCATION.with(|cell| *cell.borrow_mut() = Some(location));
            previous(info);
        }));
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    let location = LAST_PANIC_LOCATION.with(|cell| cell.borrow_mut().take());
    match location {
        Some(location) => format!("{} ({})", message, location),
        None => message,
    }
}

/// The outcome reported for each fully-processed message, consumed by the
/// manager's single accounting task.
pub(crate) struct JobReport {
    pub queue: String,
    pub kind: JobReportKind,
}

pub(crate) enum JobReportKind {
    /// A message was accepted into the run stage.
    Received,
    /// `Done` returned, regardless of how `Run` concluded. `JobDoneCounter`
    /// tracks this, not handler success — a job whose `Run` returned an
    /// error still reaches `Done` and still counts here.
    Completed(Completion),
    Invalid,
    UnknownType,
}

pub(crate) enum Completion {
    Success,
    Failed,
    Panicked,
}

/// Per-queue dispatch unit: owns the two bounded stages (receive-slots and
/// run-slots) described in the concurrency model and the single reader
/// loop pulling from its `Source`.
pub(crate) struct Worker {
    pub queue_name: String,
    pub source: Arc<dyn Source>,
    pub registry: Arc<HandlerRegistry>,
    pub queue_concurrency: usize,
    pub worker_concurrency: usize,
    pub logger: Logger,
    pub done_tx: mpsc::Sender<JobReport>,
}

impl Worker {
    /// Run the dispatch loop until `shutdown` is signalled or the source
    /// closes. Returns the `JoinHandle` for the loop task.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        ensure_panic_hook_installed();
        let receive_sem = Arc::new(Semaphore::new(self.queue_concurrency));
        let run_sem = Arc::new(Semaphore::new(self.worker_concurrency));
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let permit = match receive_sem.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let batch = tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        drop(permit);
                        break;
                    }
                    result = self.source.receive() => result,
                };

                let messages = match batch {
                    Ok(messages) => messages,
                    Err(err) => {
                        error!(
                            self.logger, "Failed to poll for jobs, retrying";
                            "queue" => &self.queue_name, "error" => %err
                        );
                        drop(permit);
                        tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                        continue;
                    }
                };

                if messages.is_empty() {
                    drop(permit);
                    if self.source.is_closed() {
                        break;
                    }
                    continue;
                }

                let worker = Arc::clone(&self);
                let run_sem = Arc::clone(&run_sem);
                tokio::spawn(async move {
                    worker.dispatch_batch(messages, run_sem).await;
                    drop(permit);
                });
            }
            info!(self.logger, "Worker dispatch loop stopped"; "queue" => &self.queue_name);
        })
    }

    /// Decode, validate, and fan each message in a batch out to the run
    /// stage. The receive-slot passed to the caller is released only after
    /// every message here has either been rejected or had its run-slot
    /// acquired.
    async fn dispatch_batch(self: &Arc<Self>, messages: Vec<ReceivedMessage>, run_sem: Arc<Semaphore>) {
        for message in messages {
            let desc = match JobDesc::decode(&message.bytes) {
                Ok(desc) => desc,
                Err(err) => {
                    warn!(
                        self.logger, "Dropping invalid message";
                        "queue" => &self.queue_name, "error" => %err
                    );
                    self.ack_and_ignore(message).await;
                    self.report(JobReportKind::Invalid).await;
                    continue;
                }
            };

            trace!(
                self.logger, "Received job"; "queue" => &self.queue_name,
                "job_id" => &desc.job_id, "job_type" => &desc.job_type
            );

            let factory = match self.registry.lookup(&self.queue_name, &desc.job_type) {
                Some(factory) => factory,
                None => {
                    warn!(
                        self.logger, "No handler registered for job type";
                        "queue" => &self.queue_name, "job_type" => &desc.job_type
                    );
                    self.ack_and_ignore(message).await;
                    self.report(JobReportKind::UnknownType).await;
                    continue;
                }
            };

            let run_permit = match run_sem.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            self.report(JobReportKind::Received).await;
            let worker = Arc::clone(self);
            let job = Job::new(desc, worker.queue_name.clone(), message.bytes, message.ack_token);
            tokio::spawn(async move {
                let _run_permit = run_permit;
                worker.execute(job, factory).await;
            });
        }
    }

    async fn ack_and_ignore(&self, message: ReceivedMessage) {
        if let Err(err) = self.source.ack(message.ack_token).await {
            warn!(self.logger, "Failed to ack rejected message"; "error" => %err);
        }
    }

    /// Run a single job to completion: fresh handler instance, panic-safe
    /// `run`/`done` calls, ack, and accounting report — in that order.
    async fn execute(self: Arc<Self>, mut job: Job, factory: Arc<dyn super::registry::HandlerFactory>) {
        let mut handler = factory.create();
        job.started_at = Some(Instant::now());

        let outcome = match AssertUnwindSafe(handler.run(&job)).catch_unwind().await {
            Ok(Ok(())) => RunOutcome::Success,
            Ok(Err(err)) => RunOutcome::Failed(err),
            Err(payload) => {
                let message = panic_message(payload);
                error!(
                    self.logger, "Handler panicked in run";
                    "queue" => &self.queue_name, "job_id" => job.job_id(), "panic" => &message
                );
                RunOutcome::Panicked(message)
            }
        };

        if let RunOutcome::Failed(ref err) = outcome {
            warn!(
                self.logger, "Handler returned an error";
                "queue" => &self.queue_name, "job_id" => job.job_id(), "error" => %err
            );
        }

        if AssertUnwindSafe(handler.done(&job, &outcome))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(
                self.logger, "Handler panicked in done";
                "queue" => &self.queue_name, "job_id" => job.job_id()
            );
        }

        job.finished_at = Some(Instant::now());

        let ack_token = job.ack_token();
        if let Err(err) = self.source.ack(ack_token).await {
            error!(
                self.logger, "Failed to ack completed job";
                "queue" => &self.queue_name, "job_id" => job.job_id(), "error" => %err
            );
        }

        let completion = match outcome {
            RunOutcome::Success => Completion::Success,
            RunOutcome::Failed(_) => Completion::Failed,
            RunOutcome::Panicked(_) => Completion::Panicked,
        };
        self.report(JobReportKind::Completed(completion)).await;
    }

    async fn report(&self, kind: JobReportKind) {
        let report = JobReport {
            queue: self.queue_name.clone(),
            kind,
        };
        if self.done_tx.send(report).await.is_err() {
            error!(self.logger, "Accounting channel closed, dropping job report"; "queue" => &self.queue_name);
        }
    }
}
