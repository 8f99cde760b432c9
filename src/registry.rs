use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use super::job::Job;

/// The error type a handler's `run` may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// How a job's `run` call concluded, passed to `done` verbatim.
pub enum RunOutcome {
    Success,
    Failed(HandlerError),
    Panicked(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, RunOutcome::Panicked(_))
    }
}

/// Per-job handler instance.
///
/// A fresh `Handler` is constructed for every job by its `HandlerFactory`;
/// it is used by exactly one task and discarded afterwards. `done` is
/// called exactly once per successful decode, even when `run` panicked.
#[async_trait::async_trait]
pub trait Handler: Send {
    /// Process the job body.
    async fn run(&mut self, job: &Job) -> Result<(), HandlerError>;

    /// Post-run hook, always invoked exactly once per `run`.
    async fn done(&mut self, job: &Job, outcome: &RunOutcome);
}

/// Produces a fresh `Handler` instance per job.
///
/// Storing factories rather than instances is the invariant that prevents
/// handler field aliasing across concurrently running jobs: every dispatch
/// constructs its own instance.
pub trait HandlerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Handler>;
}

impl<F, H> HandlerFactory for F
where
    F: Fn() -> H + Send + Sync,
    H: Handler + 'static,
{
    fn create(&self) -> Box<dyn Handler> {
        Box::new(self())
    }
}

/// Mapping `queue_name -> (job_type -> factory)`.
///
/// Lookup is read-mostly; registration may happen before or after `run`
/// begins and is immediately visible to subsequent dispatches.
#[derive(Default)]
pub struct HandlerRegistry {
    queues: RwLock<HashMap<String, HashMap<String, Arc<dyn HandlerFactory>>>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry {
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory for `(queue, job_type)`, replacing any prior
    /// registration for the same pair.
    pub fn register(&self, queue: &str, job_type: &str, factory: Arc<dyn HandlerFactory>) {
        let mut queues = self.queues.write().expect("HandlerRegistry lock poisoned");
        queues
            .entry(queue.to_string())
            .or_insert_with(HashMap::new)
            .insert(job_type.to_string(), factory);
    }

    /// Look up the factory registered for `(queue, job_type)`, if any.
    pub fn lookup(&self, queue: &str, job_type: &str) -> Option<Arc<dyn HandlerFactory>> {
        let queues = self.queues.read().expect("HandlerRegistry lock poisoned");
        queues.get(queue).and_then(|types| types.get(job_type)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::Handler;
    use super::HandlerRegistry;
    use super::RunOutcome;
    use crate::job::Job;
    use crate::job::JobDesc;
    use crate::source::AckToken;

    struct CountingHandler {
        id: usize,
    }

    #[async_trait::async_trait]
    impl Handler for CountingHandler {
        async fn run(&mut self, _job: &Job) -> Result<(), super::HandlerError> {
            Ok(())
        }
        async fn done(&mut self, _job: &Job, _outcome: &RunOutcome) {}
    }

    fn make_job() -> Job {
        let desc = JobDesc {
            job_id: "id".into(),
            job_type: "t".into(),
            payload: serde_json::Value::Null,
        };
        Job::new(desc, "q".into(), vec![], AckToken(crate::source::AckTokenInner::None))
    }

    #[tokio::test]
    async fn register_replaces_existing_factory() {
        let registry = HandlerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);
        registry.register("q", "t", Arc::new(move || {
            c1.fetch_add(1, Ordering::SeqCst);
            CountingHandler { id: 1 }
        }));
        registry.register("q", "t", Arc::new(|| CountingHandler { id: 2 }));

        let factory = registry.lookup("q", "t").expect("should find factory");
        let mut handler = factory.create();
        let job = make_job();
        handler.run(&job).await.unwrap();
        // The first factory (which increments `counter`) was replaced, so
        // dispatching through the registry must not touch it.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_registration_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.lookup("q", "missing").is_none());
    }

    #[tokio::test]
    async fn factory_yields_fresh_instance_per_call() {
        let registry = HandlerRegistry::new();
        registry.register("q", "t", Arc::new(|| CountingHandler { id: 7 }));
        let factory = registry.lookup("q", "t").unwrap();
        let h1 = factory.create();
        let h2 = factory.create();
        assert!(!std::ptr::eq(
            h1.as_ref() as *const dyn Handler as *const u8,
            h2.as_ref() as *const dyn Handler as *const u8
        ));
    }
}
