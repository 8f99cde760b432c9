use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::Client;
use slog::error;
use slog::Logger;

use super::AckToken;
use super::AckTokenInner;
use super::ReceivedMessage;
use super::Source;
use super::super::config::SqsConfig;
use super::super::DispatchError;
use super::super::Result;

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Default local endpoint used when `use_local_sqs` is set, matching the
/// common LocalStack/ElasticMQ port used for integration testing.
const LOCAL_ENDPOINT: &str = "http://localhost:4566";

/// Long-poll SQS-backed source.
///
/// Each call to `receive` issues a long-poll `ReceiveMessage` request and
/// retries transport failures with exponential backoff capped at 30s;
/// `ack` issues a `DeleteMessage` for the token's receipt handle.
pub struct SqsSource {
    client: Client,
    queue_url: String,
    max_number_of_messages: i32,
    wait_time_seconds: i32,
    logger: Logger,
    closed: AtomicBool,
}

impl SqsSource {
    pub async fn new(config: &SqsConfig, logger: Logger) -> Result<SqsSource> {
        let region = RegionProviderChain::first_try(Region::new(config.region.clone()));
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
        if config.use_local_sqs {
            loader = loader.endpoint_url(LOCAL_ENDPOINT);
        }
        let sdk_config = loader.load().await;
        let client = Client::new(&sdk_config);
        Ok(SqsSource {
            client,
            queue_url: config.queue_url.clone(),
            max_number_of_messages: config.max_number_of_messages,
            wait_time_seconds: config.wait_time_seconds,
            logger,
            closed: AtomicBool::new(false),
        })
    }

    fn next_backoff(current: Duration) -> Duration {
        std::cmp::min(current * 2, BACKOFF_CAP)
    }
}

#[async_trait]
impl Source for SqsSource {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            if self.is_closed() {
                return Ok(vec![]);
            }
            let result = self
                .client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(self.max_number_of_messages)
                .wait_time_seconds(self.wait_time_seconds)
                .send()
                .await;
            match result {
                Ok(output) => {
                    let messages = output.messages.unwrap_or_default();
                    if messages.is_empty() {
                        // Long poll timed out with nothing waiting; try again.
                        continue;
                    }
                    let mut batch = Vec::with_capacity(messages.len());
                    for message in messages {
                        let body = message.body.unwrap_or_default();
                        let receipt_handle = message.receipt_handle.unwrap_or_default();
                        batch.push(ReceivedMessage {
                            bytes: body.into_bytes(),
                            ack_token: AckToken(AckTokenInner::Sqs { receipt_handle }),
                        });
                    }
                    return Ok(batch);
                }
                Err(err) => {
                    error!(
                        self.logger, "Failed to poll SQS, retrying after backoff";
                        "error" => %err, "backoff_ms" => backoff.as_millis() as u64
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = Self::next_backoff(backoff);
                }
            }
        }
    }

    async fn ack(&self, token: AckToken) -> Result<()> {
        let receipt_handle = match token.0 {
            AckTokenInner::Sqs { receipt_handle } => receipt_handle,
            AckTokenInner::None | AckTokenInner::Mock { .. } => return Ok(()),
        };
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|err| DispatchError::Transport(format!("sqs delete failed: {}", err)))?;
        Ok(())
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let body = String::from_utf8(bytes)
            .map_err(|err| DispatchError::InvalidMessage(format!("non-utf8 payload: {}", err)))?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|err| DispatchError::Transport(format!("sqs send failed: {}", err)))?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
