use serde::Deserialize;
use serde::Serialize;

use super::DispatchError;
use super::Result;

/// Source-specific configuration for a single queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queue_type")]
pub enum SourceConfig {
    #[serde(rename = "go_channel")]
    GoChannel {
        go_channel: GoChannelConfig,
    },

    #[serde(rename = "sqs")]
    Sqs {
        sqs: SqsConfig,
    },

    /// A batching in-memory source with no real transport, selectable only
    /// in debug builds. Lets integration tests exercise batched-receive and
    /// exactly-once-ack behaviour (the properties the SQS source needs)
    /// through the same `Manager::init_with_config` path a real deployment
    /// uses, without a live AWS/LocalStack endpoint.
    #[cfg(debug_assertions)]
    #[serde(rename = "mock")]
    Mock {
        mock: MockConfig,
    },
}

impl SourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceConfig::GoChannel { .. } => "go_channel",
            SourceConfig::Sqs { .. } => "sqs",
            #[cfg(debug_assertions)]
            SourceConfig::Mock { .. } => "mock",
        }
    }
}

/// Options for the debug-only `mock` source.
#[cfg(debug_assertions)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockConfig {
    #[serde(default)]
    pub batch_size: usize,
}

/// In-memory channel source options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoChannelConfig {
    /// Channel buffer size. 0 means a synchronous rendezvous channel.
    #[serde(default)]
    pub size: usize,
}

/// SQS-backed source options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqsConfig {
    pub queue_url: String,

    #[serde(default = "SqsConfig::default_region")]
    pub region: String,

    #[serde(default)]
    pub use_local_sqs: bool,

    #[serde(default = "SqsConfig::default_max_number_of_messages")]
    pub max_number_of_messages: i32,

    #[serde(default = "SqsConfig::default_wait_time_seconds")]
    pub wait_time_seconds: i32,
}

impl SqsConfig {
    fn default_region() -> String {
        "us-east-1".into()
    }
    fn default_max_number_of_messages() -> i32 {
        10
    }
    fn default_wait_time_seconds() -> i32 {
        20
    }

    fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.max_number_of_messages) {
            return Err(DispatchError::Config(
                "sqs.max_number_of_messages must be between 1 and 10".into(),
            ));
        }
        if !(0..=20).contains(&self.wait_time_seconds) {
            return Err(DispatchError::Config(
                "sqs.wait_time_seconds must be between 0 and 20".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a single queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,

    #[serde(flatten)]
    pub source: SourceConfig,

    pub queue_concurrency: i64,
    pub worker_concurrency: i64,

    #[serde(default = "QueueConfig::default_enabled")]
    pub enabled: bool,
}

impl QueueConfig {
    fn default_enabled() -> bool {
        true
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DispatchError::Config("queue name must not be empty".into()));
        }
        if self.queue_concurrency < 1 {
            return Err(DispatchError::Config(format!(
                "queue '{}': queue_concurrency must be >= 1",
                self.name
            )));
        }
        if self.worker_concurrency < 1 {
            return Err(DispatchError::Config(format!(
                "queue '{}': worker_concurrency must be >= 1",
                self.name
            )));
        }
        if let SourceConfig::Sqs { sqs } = &self.source {
            sqs.validate().map_err(|_| {
                DispatchError::Config(format!(
                    "queue '{}': invalid sqs configuration",
                    self.name
                ))
            })?;
        }
        Ok(())
    }
}

/// Either a bare array of queues or `{log_enabled, queues: [...]}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ConfigShape {
    Queues(Vec<QueueConfig>),
    Full {
        #[serde(default)]
        log_enabled: bool,
        queues: Vec<QueueConfig>,
    },
}

/// Manager configuration: the parsed, validated view of the JSON shape in
/// the external interface (a bare queue array or `{log_enabled, queues}`).
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub log_enabled: bool,
    pub queues: Vec<QueueConfig>,
}

impl Config {
    /// Parse and validate configuration from a JSON document.
    pub fn from_json(text: &str) -> Result<Config> {
        let shape: ConfigShape = serde_json::from_str(text)
            .map_err(|err| DispatchError::Config(format!("invalid JSON: {}", err)))?;
        let (log_enabled, queues) = match shape {
            ConfigShape::Queues(queues) => (false, queues),
            ConfigShape::Full { log_enabled, queues } => (log_enabled, queues),
        };
        let config = Config { log_enabled, queues };
        config.validate()?;
        Ok(config)
    }

    /// Validate an already-constructed configuration record.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for queue in &self.queues {
            queue.validate()?;
            if !seen.insert(queue.name.clone()) {
                return Err(DispatchError::Config(format!(
                    "duplicate queue name '{}'",
                    queue.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use super::SourceConfig;

    #[test]
    fn parses_bare_array() {
        let text = r#"[
            {"name": "q1", "queue_type": "go_channel", "go_channel": {"size": 0},
             "queue_concurrency": 3, "worker_concurrency": 100, "enabled": true}
        ]"#;
        let config = Config::from_json(text).expect("should parse");
        assert_eq!(config.queues.len(), 1);
        assert_eq!(config.queues[0].name, "q1");
    }

    #[test]
    fn parses_full_object() {
        let text = r#"{
            "log_enabled": true,
            "queues": [
                {"name": "q1", "queue_type": "sqs",
                 "sqs": {"queue_url": "https://example/q1"},
                 "queue_concurrency": 2, "worker_concurrency": 4}
            ]
        }"#;
        let config = Config::from_json(text).expect("should parse");
        assert!(config.log_enabled);
        match &config.queues[0].source {
            SourceConfig::Sqs { sqs } => assert_eq!(sqs.max_number_of_messages, 10),
            _ => panic!("expected sqs source"),
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let text = r#"[
            {"name": "q1", "queue_type": "go_channel", "go_channel": {"size": 0},
             "queue_concurrency": 1, "worker_concurrency": 1},
            {"name": "q1", "queue_type": "go_channel", "go_channel": {"size": 0},
             "queue_concurrency": 1, "worker_concurrency": 1}
        ]"#;
        assert!(Config::from_json(text).is_err());
    }

    #[test]
    fn rejects_non_positive_concurrency() {
        let text = r#"[
            {"name": "q1", "queue_type": "go_channel", "go_channel": {"size": 0},
             "queue_concurrency": 0, "worker_concurrency": 1}
        ]"#;
        assert!(Config::from_json(text).is_err());
    }

    #[test]
    fn rejects_empty_name() {
        let text = r#"[
            {"name": "", "queue_type": "go_channel", "go_channel": {"size": 0},
             "queue_concurrency": 1, "worker_concurrency": 1}
        ]"#;
        assert!(Config::from_json(text).is_err());
    }

    #[test]
    fn rejects_invalid_sqs_batch_size() {
        let text = r#"[
            {"name": "q1", "queue_type": "sqs",
             "sqs": {"queue_url": "https://example/q1", "max_number_of_messages": 20},
             "queue_concurrency": 1, "worker_concurrency": 1}
        ]"#;
        assert!(Config::from_json(text).is_err());
    }
}
