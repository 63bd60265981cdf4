//! Commit attempt records.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

// The ledger stores microseconds; outcomes never carry more.
const TIMESTAMP_DIGITS: u16 = 6;

fn ledger_time(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(TIMESTAMP_DIGITS)
}

/// What happened during one cycle. Built once by the runner and never
/// mutated after it has been handed to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    /// Empty when the commit step never completed.
    pub hash: String,
    pub message: String,
    pub files_changed: u64,
    pub success: bool,
    pub used_generation: bool,
    pub theme: Option<String>,
    pub error: Option<String>,
    pub push_success: bool,
    pub timestamp: DateTime<Utc>,
}

impl CommitOutcome {
    pub fn committed(
        hash: impl Into<String>,
        message: impl Into<String>,
        files_changed: u64,
        used_generation: bool,
        theme: Option<String>,
        push_success: bool,
    ) -> Self {
        Self {
            hash: hash.into(),
            message: message.into(),
            files_changed,
            success: true,
            used_generation,
            theme,
            error: None,
            push_success,
            timestamp: ledger_time(Utc::now()),
        }
    }

    pub fn failed(
        message: impl Into<String>,
        files_changed: u64,
        used_generation: bool,
        theme: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            hash: String::new(),
            message: message.into(),
            files_changed,
            success: false,
            used_generation,
            theme,
            error: Some(error.into()),
            push_success: false,
            timestamp: ledger_time(Utc::now()),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = ledger_time(timestamp);
        self
    }
}

/// A ledger row: the outcome plus its record id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredCommit {
    pub id: i64,
    #[serde(flatten)]
    pub outcome: CommitOutcome,
}
