use lazy_static::lazy_static;
use prometheus::CounterVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref JOBS_RECEIVED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "jobmux_jobs_received_total",
            "Number of jobs received from a queue"
        ),
        &["queue"]
    )
    .expect("failed to create JOBS_RECEIVED_TOTAL counter");
    pub static ref JOBS_DONE_TOTAL: CounterVec = CounterVec::new(
        Opts::new("jobmux_jobs_done_total", "Number of jobs that reached Done"),
        &["queue"]
    )
    .expect("failed to create JOBS_DONE_TOTAL counter");
    pub static ref JOBS_FAILED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "jobmux_jobs_failed_total",
            "Number of jobs whose Run returned an error"
        ),
        &["queue"]
    )
    .expect("failed to create JOBS_FAILED_TOTAL counter");
    pub static ref JOBS_PANICKED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "jobmux_jobs_panicked_total",
            "Number of jobs whose handler panicked"
        ),
        &["queue"]
    )
    .expect("failed to create JOBS_PANICKED_TOTAL counter");
    pub static ref JOBS_INVALID_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "jobmux_jobs_invalid_total",
            "Number of messages that failed to decode into a job"
        ),
        &["queue"]
    )
    .expect("failed to create JOBS_INVALID_TOTAL counter");
    pub static ref JOBS_UNKNOWN_TYPE_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "jobmux_jobs_unknown_type_total",
            "Number of jobs with no registered handler for their job_type"
        ),
        &["queue"]
    )
    .expect("failed to create JOBS_UNKNOWN_TYPE_TOTAL counter");
}

/// Attempts to register metrics with the registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(JOBS_RECEIVED_TOTAL.clone())) {
        debug!(logger, "Failed to register JOBS_RECEIVED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(JOBS_DONE_TOTAL.clone())) {
        debug!(logger, "Failed to register JOBS_DONE_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(JOBS_FAILED_TOTAL.clone())) {
        debug!(logger, "Failed to register JOBS_FAILED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(JOBS_PANICKED_TOTAL.clone())) {
        debug!(logger, "Failed to register JOBS_PANICKED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(JOBS_INVALID_TOTAL.clone())) {
        debug!(logger, "Failed to register JOBS_INVALID_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(JOBS_UNKNOWN_TYPE_TOTAL.clone())) {
        debug!(logger, "Failed to register JOBS_UNKNOWN_TYPE_TOTAL"; "error" => ?err);
    }
}
