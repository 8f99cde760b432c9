//! Test tools for users of this crate and its own integration tests.
//!
//! Mirrors the teacher's `#[cfg(debug_assertions)]`-gated mock backends: a
//! `Source` implementation whose acknowledgement state is inspectable, so
//! tests can assert "acked exactly once" without a live SQS/LocalStack
//! instance.
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::Notify;

use super::source::AckToken;
use super::source::AckTokenInner;
use super::source::ReceivedMessage;
use super::source::Source;
use super::Result;

struct Inner {
    pending: VecDeque<(u64, Vec<u8>)>,
    acked: HashSet<u64>,
    ack_calls: u64,
    next_id: u64,
}

/// An in-memory source that yields up to `batch_size` messages per
/// `receive` call, simulating a batching transport like SQS while
/// tracking acknowledgements for test assertions.
pub struct MockSource {
    inner: Mutex<Inner>,
    notify: Notify,
    closed: AtomicBool,
    batch_size: usize,
}

impl MockSource {
    pub fn new(batch_size: usize) -> MockSource {
        MockSource {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                acked: HashSet::new(),
                ack_calls: 0,
                next_id: 0,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            batch_size: batch_size.max(1),
        }
    }

    /// Number of distinct messages acknowledged so far.
    pub async fn acked_count(&self) -> usize {
        self.inner.lock().await.acked.len()
    }

    /// Total number of `ack` calls observed, including repeats.
    ///
    /// Comparing this to `acked_count` catches double-acks of the same
    /// message (it should never exceed it for a well-behaved worker).
    pub async fn ack_calls(&self) -> u64 {
        self.inner.lock().await.ack_calls
    }
}

#[async_trait]
impl Source for MockSource {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if !inner.pending.is_empty() {
                    let mut batch = Vec::new();
                    for _ in 0..self.batch_size {
                        match inner.pending.pop_front() {
                            Some((id, bytes)) => batch.push(ReceivedMessage {
                                bytes,
                                ack_token: AckToken(AckTokenInner::Mock { id }),
                            }),
                            None => break,
                        }
                    }
                    return Ok(batch);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return Ok(vec![]);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, token: AckToken) -> Result<()> {
        if let AckTokenInner::Mock { id } = token.0 {
            let mut inner = self.inner.lock().await;
            inner.ack_calls += 1;
            inner.acked.insert(id);
        }
        Ok(())
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.pending.push_back((id, bytes));
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::MockSource;
    use super::Source;

    #[tokio::test]
    async fn batches_up_to_batch_size() {
        let source = MockSource::new(2);
        for i in 0..5 {
            source.send(format!("msg{}", i).into_bytes()).await.unwrap();
        }
        let batch = source.receive().await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn ack_is_idempotent_but_counted() {
        let source = MockSource::new(10);
        source.send(b"a".to_vec()).await.unwrap();
        let batch = source.receive().await.unwrap();
        let token = batch.into_iter().next().unwrap().ack_token;
        source.ack(token.clone()).await.unwrap();
        source.ack(token).await.unwrap();
        assert_eq!(source.acked_count().await, 1);
        assert_eq!(source.ack_calls().await, 2);
    }
}
