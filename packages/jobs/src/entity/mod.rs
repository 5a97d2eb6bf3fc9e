pub mod dead_letter_job;
pub mod job;
pub mod job_audit;
