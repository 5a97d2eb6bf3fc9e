#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workload class of a job. Each class has its own primary queue, dead-letter
/// pair, retry policy and time limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadClass {
    /// General/AI tasks.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "default"))]
    Default,
    /// Model generation.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "model"))]
    Model,
    /// CAM processing.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "cam"))]
    Cam,
    /// Simulation.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "sim"))]
    Sim,
    /// Report generation.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "report"))]
    Report,
    /// ERP integration.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "erp"))]
    Erp,
}

impl WorkloadClass {
    /// All known workload classes.
    pub const ALL: &'static [WorkloadClass] = &[
        Self::Default,
        Self::Model,
        Self::Cam,
        Self::Sim,
        Self::Report,
        Self::Erp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Model => "model",
            Self::Cam => "cam",
            Self::Sim => "sim",
            Self::Report => "report",
            Self::Erp => "erp",
        }
    }
}

impl fmt::Display for WorkloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid class string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseClassError {
    invalid: String,
}

impl fmt::Display for ParseClassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unknown workload class '{}'. Valid values: {}",
            self.invalid,
            WorkloadClass::ALL
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseClassError {}

impl FromStr for WorkloadClass {
    type Err = ParseClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkloadClass::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| ParseClassError {
                invalid: s.to_string(),
            })
    }
}

/// Broker priority of a submission, mapped onto the 0..10 priority steps of
/// the primary queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "low"))]
    Low,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "normal"))]
    Normal,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "high"))]
    High,
}

impl JobPriority {
    /// AMQP priority step for this level.
    pub fn step(&self) -> u8 {
        match self {
            Self::Low => 2,
            Self::Normal => 5,
            Self::High => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_parse() {
        assert_eq!("cam".parse::<WorkloadClass>().unwrap(), WorkloadClass::Cam);
        assert!("freecad".parse::<WorkloadClass>().is_err());
    }

    #[test]
    fn test_priority_steps_within_queue_range() {
        for p in [JobPriority::Low, JobPriority::Normal, JobPriority::High] {
            assert!(p.step() <= 10);
        }
        assert!(JobPriority::Low.step() < JobPriority::Normal.step());
        assert!(JobPriority::Normal.step() < JobPriority::High.step());
    }
}
