use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Grouping key for debounced events, typically a conversation or chat id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey(pub String);

impl GroupKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn events_key(&self) -> String {
        format!("events:{}", self.0)
    }

    /// Deterministic id so rescheduling replaces the outstanding job instead of adding one.
    pub fn job_id(&self) -> JobId {
        JobId(format!("batch:{}", self.0))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub event_id: String,
    /// Original arrival timestamp reported by the sender (unix seconds or millis).
    pub occurred_at: i64,
    pub payload: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInstruction {
    DrainAndProcess,
}

impl JobInstruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DrainAndProcess => "drain_and_process",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredJob {
    pub job_id: JobId,
    pub group_key: GroupKey,
    pub instruction: JobInstruction,
}

impl DeferredJob {
    pub fn drain(group_key: GroupKey) -> Self {
        Self { job_id: group_key.job_id(), group_key, instruction: JobInstruction::DrainAndProcess }
    }
}

/// Events drained for one group key, ready for business processing.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingBatch {
    pub group_key: GroupKey,
    pub scheduled_job_id: JobId,
    pub events: Vec<BufferedEvent>,
}

impl PendingBatch {
    /// Builds a batch in arrival order. The sort is stable so equal timestamps keep append order.
    /// Redelivered events collapse onto their first occurrence.
    pub fn from_drained(group_key: GroupKey, mut events: Vec<BufferedEvent>) -> Self {
        events.sort_by_key(|event| event.occurred_at);
        let mut seen = HashSet::with_capacity(events.len());
        events.retain(|event| seen.insert(event.event_id.clone()));
        Self { scheduled_job_id: group_key.job_id(), group_key, events }
    }

    pub fn buffered_event_ids(&self) -> Vec<&str> {
        self.events.iter().map(|event| event.event_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{BufferedEvent, DeferredJob, GroupKey, JobInstruction, PendingBatch};

    fn event(id: &str, occurred_at: i64) -> BufferedEvent {
        BufferedEvent { event_id: id.to_owned(), occurred_at, payload: json!({ "id": id }) }
    }

    #[test]
    fn group_key_derives_list_and_job_names() {
        let key = GroupKey::new("79990000000");

        assert_eq!(key.events_key(), "events:79990000000");
        assert_eq!(key.job_id().as_str(), "batch:79990000000");
    }

    #[test]
    fn drain_job_reuses_deterministic_id() {
        let first = DeferredJob::drain(GroupKey::new("chat-1"));
        let second = DeferredJob::drain(GroupKey::new("chat-1"));

        assert_eq!(first, second);
        assert_eq!(first.instruction, JobInstruction::DrainAndProcess);
    }

    #[test]
    fn batch_orders_by_timestamp_and_keeps_ties_in_append_order() {
        let batch = PendingBatch::from_drained(
            GroupKey::new("chat-1"),
            vec![event("late", 30), event("tie-a", 10), event("early", 5), event("tie-b", 10)],
        );

        assert_eq!(batch.buffered_event_ids(), vec!["early", "tie-a", "tie-b", "late"]);
        assert_eq!(batch.scheduled_job_id.as_str(), "batch:chat-1");
    }

    #[test]
    fn redelivered_event_ids_keep_first_occurrence() {
        let mut redelivered = event("m-1", 10);
        redelivered.payload = json!({ "id": "m-1", "redelivery": true });

        let batch = PendingBatch::from_drained(
            GroupKey::new("chat-1"),
            vec![event("m-1", 10), event("m-2", 11), redelivered, event("m-2", 11)],
        );

        assert_eq!(batch.buffered_event_ids(), vec!["m-1", "m-2"]);
        assert_eq!(batch.events[0].payload, json!({ "id": "m-1" }));
        assert_eq!(batch.len(), 2);
    }
}
