//! Item lifecycle vocabulary shared by storage and the pipeline.
//!
//! The string forms are what the `items.processing_status` and
//! `items.filter_outcome` columns hold.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

/// Why the filter rejected an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Spam,
    Offensive,
    Propaganda,
    LowQuality,
}

impl RejectReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Spam => "spam",
            RejectReason::Offensive => "offensive",
            RejectReason::Propaganda => "propaganda",
            RejectReason::LowQuality => "low_quality",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an item is in the filter state machine.
///
/// `Collected` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStatus {
    Collected,
    Accepted,
    Rejected(RejectReason),
    FilterError,
}

impl ProcessingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Collected => "collected",
            ProcessingStatus::Accepted => "filtered_accepted",
            ProcessingStatus::Rejected(RejectReason::Spam) => "filtered_spam",
            ProcessingStatus::Rejected(RejectReason::Offensive) => "filtered_offensive",
            ProcessingStatus::Rejected(RejectReason::Propaganda) => "filtered_propaganda",
            ProcessingStatus::Rejected(RejectReason::LowQuality) => "filtered_low_quality",
            ProcessingStatus::FilterError => "filter_error",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessingStatus::Collected)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collected" => Ok(ProcessingStatus::Collected),
            "filtered_accepted" => Ok(ProcessingStatus::Accepted),
            "filtered_spam" => Ok(ProcessingStatus::Rejected(RejectReason::Spam)),
            "filtered_offensive" => Ok(ProcessingStatus::Rejected(RejectReason::Offensive)),
            "filtered_propaganda" => Ok(ProcessingStatus::Rejected(RejectReason::Propaganda)),
            "filtered_low_quality" => Ok(ProcessingStatus::Rejected(RejectReason::LowQuality)),
            "filter_error" => Ok(ProcessingStatus::FilterError),
            other => Err(UnknownStatus {
                kind: "processing_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Terminal accept/reject decision recorded per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOutcome {
    Pending,
    Accepted,
    Rejected,
}

impl FilterOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOutcome::Pending => "pending",
            FilterOutcome::Accepted => "accepted",
            FilterOutcome::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOutcome {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FilterOutcome::Pending),
            "accepted" => Ok(FilterOutcome::Accepted),
            "rejected" => Ok(FilterOutcome::Rejected),
            other => Err(UnknownStatus {
                kind: "filter_outcome",
                value: other.to_string(),
            }),
        }
    }
}

/// What started a collection cycle. Stored as `collection_runs.trigger_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Timer,
    Api,
    Cli,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Timer => "timer",
            TriggerSource::Api => "api",
            TriggerSource::Cli => "cli",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
