use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::source::AckToken;
use super::DispatchError;
use super::Result;

/// The wire-level envelope carried by every job message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobDesc {
    pub job_id: String,
    pub job_type: String,
    pub payload: Value,
}

impl JobDesc {
    /// Decode and validate a raw message into a `JobDesc`.
    ///
    /// Validation enforces the non-empty `job_id`/`job_type` invariant from
    /// the data model; matching a registered handler is the caller's job.
    pub fn decode(raw: &[u8]) -> Result<JobDesc> {
        let desc: JobDesc = serde_json::from_slice(raw)
            .map_err(|err| DispatchError::InvalidMessage(format!("malformed JSON: {}", err)))?;
        if desc.job_id.trim().is_empty() {
            return Err(DispatchError::InvalidMessage("job_id is empty".into()));
        }
        if desc.job_type.trim().is_empty() {
            return Err(DispatchError::InvalidMessage("job_type is empty".into()));
        }
        Ok(desc)
    }
}

/// A decoded job plus the runtime metadata accumulated as it moves through
/// the dispatch pipeline.
///
/// A `Job` is created by a `Worker` on successful decode, mutated only by
/// the single task bound to it, and released once `Done` returns or
/// panics.
pub struct Job {
    pub desc: JobDesc,
    pub queue_name: String,
    pub raw_bytes: Vec<u8>,
    pub received_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub(crate) ack_token: AckToken,
}

impl Job {
    pub(crate) fn new(desc: JobDesc, queue_name: String, raw_bytes: Vec<u8>, ack_token: AckToken) -> Job {
        Job {
            desc,
            queue_name,
            raw_bytes,
            received_at: Instant::now(),
            started_at: None,
            finished_at: None,
            ack_token,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.desc.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.desc.job_type
    }

    pub fn payload(&self) -> &Value {
        &self.desc.payload
    }

    /// Duration of the Run call, once `finished_at` has been recorded.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }

    pub(crate) fn ack_token(&self) -> AckToken {
        self.ack_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::JobDesc;

    #[test]
    fn decodes_well_formed_envelope() {
        let raw = br#"{"job_id":"test-job-id-foo","job_type":"test-job-type-1","payload":"foo"}"#;
        let desc = JobDesc::decode(raw).expect("should decode");
        assert_eq!(desc.job_id, "test-job-id-foo");
        assert_eq!(desc.job_type, "test-job-type-1");
        assert_eq!(desc.payload, "foo");
    }

    #[test]
    fn rejects_empty_job_id() {
        let raw = br#"{"job_id":"","job_type":"t","payload":null}"#;
        assert!(JobDesc::decode(raw).is_err());
    }

    #[test]
    fn rejects_empty_job_type() {
        let raw = br#"{"job_id":"id","job_type":"","payload":null}"#;
        assert!(JobDesc::decode(raw).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let raw = b"not json";
        assert!(JobDesc::decode(raw).is_err());
    }

    #[test]
    fn payload_round_trips_nested_object() {
        let raw = br#"{"job_id":"id","job_type":"t","payload":{"a":[1,2,3],"b":"c"}}"#;
        let desc = JobDesc::decode(raw).expect("should decode");
        assert_eq!(desc.payload["a"][1], 2);
        assert_eq!(desc.payload["b"], "c");
    }
}
