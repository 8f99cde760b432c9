use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use super::AckToken;
use super::AckTokenInner;
use super::ReceivedMessage;
use super::Source;
use super::super::DispatchError;
use super::super::Result;

/// An in-memory FIFO source backed by a `tokio::sync::mpsc` channel.
///
/// `size == 0` requests a synchronous rendezvous channel; `tokio::mpsc`
/// has no zero-capacity variant so a capacity of 1 is used instead, which
/// gives the same backpressure behaviour (a sender blocks until the single
/// slot is free) without true hand-off semantics.
pub struct GoChannelSource {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl GoChannelSource {
    pub fn new(size: usize) -> GoChannelSource {
        let (tx, rx) = mpsc::channel(size.max(1));
        GoChannelSource {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Source for GoChannelSource {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(bytes) => Ok(vec![ReceivedMessage {
                bytes,
                ack_token: AckToken(AckTokenInner::None),
            }]),
            None => {
                self.closed.store(true, Ordering::SeqCst);
                Ok(vec![])
            }
        }
    }

    async fn ack(&self, _token: AckToken) -> Result<()> {
        Ok(())
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let guard = self.tx.lock().await;
        match &*guard {
            Some(tx) => tx
                .send(bytes)
                .await
                .map_err(|_| DispatchError::SourceClosed),
            None => Err(DispatchError::SourceClosed),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut guard = self.tx.lock().await;
        *guard = None;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::GoChannelSource;
    use super::Source;

    #[tokio::test]
    async fn send_then_receive() {
        let source = GoChannelSource::new(4);
        source.send(b"hello".to_vec()).await.unwrap();
        let batch = source.receive().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].bytes, b"hello");
    }

    #[tokio::test]
    async fn ack_is_a_no_op() {
        let source = GoChannelSource::new(4);
        source.send(b"hello".to_vec()).await.unwrap();
        let batch = source.receive().await.unwrap();
        let token = batch.into_iter().next().unwrap().ack_token;
        source.ack(token.clone()).await.unwrap();
        source.ack(token).await.unwrap();
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let source = GoChannelSource::new(4);
        source.send(b"one".to_vec()).await.unwrap();
        source.close().await;
        let batch = source.receive().await.unwrap();
        assert_eq!(batch[0].bytes, b"one");
        let batch = source.receive().await.unwrap();
        assert!(batch.is_empty());
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let source = GoChannelSource::new(4);
        source.close().await;
        assert!(source.send(b"late".to_vec()).await.is_err());
    }
}
