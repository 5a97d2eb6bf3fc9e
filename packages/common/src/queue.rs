//! Broker topology names and limits.
//!
//! One direct exchange feeds every primary queue; each class has its own
//! dead-letter exchange and queue so per-class recovery pipelines stay
//! possible. Lifecycle events flow over a separate topic exchange fanned out
//! to the ERP bridge.

use crate::workload::WorkloadClass;

/// Direct exchange every primary queue binds to.
pub const JOBS_EXCHANGE: &str = "jobs.direct";

/// Topic exchange for lifecycle events.
pub const EVENTS_EXCHANGE: &str = "events.jobs";

/// Fanout exchange bridging events to ERP consumers.
pub const ERP_OUTBOUND_EXCHANGE: &str = "erp.outbound";

/// Routing key for status-change events.
pub const EVENT_ROUTING_KEY: &str = "job.status.changed";

/// Binding key for the events -> ERP exchange-to-exchange binding.
pub const EVENT_BINDING_KEY: &str = "job.status.#";

pub const DLX_SUFFIX: &str = ".dlx";
pub const DLQ_SUFFIX: &str = "_dlq";

/// Catch-all routing key binding each DLQ to its DLX.
pub const DLQ_CATCH_ALL_KEY: &str = "#";

/// Hard cap on enqueued message size (10 MiB).
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum priority step on primary queues.
pub const MAX_PRIORITY: u8 = 10;

/// Message TTL on dead-letter queues (24 hours).
pub const DLQ_MESSAGE_TTL_MS: i64 = 86_400_000;

/// Length cap on dead-letter queues.
pub const DLQ_MAX_LENGTH: i64 = 10_000;

// Message headers.
pub const HEADER_TASK_ID: &str = "x-task-id";
pub const HEADER_ATTEMPT: &str = "x-attempt";
pub const HEADER_LAST_EXCEPTION: &str = "x-last-exception";
pub const HEADER_RECOVERED_FROM_DLQ: &str = "x-recovered-from-dlq";

// Event headers.
pub const HEADER_JOB_ID: &str = "x-job-id";
pub const HEADER_EVENT_TYPE: &str = "x-event-type";
pub const HEADER_STATUS: &str = "x-status";

/// Routing key for submissions of the given class.
pub fn routing_key(class: WorkloadClass) -> String {
    format!("jobs.{}", class)
}

/// Dead-letter exchange name for a class.
pub fn dlx_name(class: WorkloadClass) -> String {
    format!("{}{}", class, DLX_SUFFIX)
}

/// Dead-letter queue name for a class.
pub fn dlq_name(class: WorkloadClass) -> String {
    format!("{}{}", class, DLQ_SUFFIX)
}

/// Message TTL of the primary queue for a class, in milliseconds.
pub fn message_ttl_ms(class: WorkloadClass) -> i64 {
    match class {
        WorkloadClass::Default => 1_800_000,
        WorkloadClass::Model => 3_600_000,
        WorkloadClass::Cam => 2_700_000,
        WorkloadClass::Sim => 3_600_000,
        WorkloadClass::Report => 900_000,
        WorkloadClass::Erp => 1_800_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(routing_key(WorkloadClass::Cam), "jobs.cam");
        assert_eq!(dlx_name(WorkloadClass::Cam), "cam.dlx");
        assert_eq!(dlq_name(WorkloadClass::Cam), "cam_dlq");
    }

    #[test]
    fn test_slow_classes_get_long_ttls() {
        assert!(message_ttl_ms(WorkloadClass::Model) > message_ttl_ms(WorkloadClass::Report));
        assert_eq!(message_ttl_ms(WorkloadClass::Sim), 3_600_000);
    }
}
