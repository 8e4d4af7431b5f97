//! Common enums shared across the ASR orchestration core

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// How a (provider, variant)'s platform free tier rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    None,
    Monthly,
    Yearly,
}

/// Bucket kind for a `UsagePeriod` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Month,
    Year,
    Total,
}

/// Bucket kind for a `UserQuota` window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    Day,
    Month,
    Total,
}

/// Current status of a `UserQuota` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Active,
    Exhausted,
}

/// Outcome of a transcription attempt as recorded in the usage ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Success,
    Failed,
}

/// How a task's audio was sourced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Upload,
    Youtube,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_roundtrips_through_serde() {
        let json = serde_json::to_string(&SourceType::Youtube).unwrap();
        assert_eq!(json, "\"youtube\"");
        let back: SourceType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SourceType::Youtube);
    }
}
