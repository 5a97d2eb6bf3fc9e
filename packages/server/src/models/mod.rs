pub mod dlq;
pub mod jobs;
pub mod shared;
