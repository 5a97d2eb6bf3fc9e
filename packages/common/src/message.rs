use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workload::{JobPriority, WorkloadClass};

/// Body of a message on a primary queue.
///
/// The attempt number and broker task id also travel as headers so a consumer
/// can inspect them without decoding the body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub class: WorkloadClass,
    pub priority: JobPriority,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Opaque workload input.
    pub payload: serde_json::Value,
}

impl JobMessage {
    pub fn new(
        job_id: Uuid,
        tenant_id: String,
        class: WorkloadClass,
        priority: JobPriority,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            tenant_id,
            class,
            priority,
            attempt: 1,
            payload,
        }
    }

    /// The same message re-issued for the next attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_attempt_increments() {
        let msg = JobMessage::new(
            Uuid::new_v4(),
            "acme".into(),
            WorkloadClass::Model,
            JobPriority::High,
            serde_json::json!({"n": 10}),
        );
        assert_eq!(msg.attempt, 1);
        let next = msg.next_attempt();
        assert_eq!(next.attempt, 2);
        assert_eq!(next.job_id, msg.job_id);
        assert_eq!(next.tenant_id, msg.tenant_id);
        assert_eq!(next.payload, msg.payload);
    }
}
