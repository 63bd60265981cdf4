//! Read and control operations offered to the outer surfaces (CLI, HTTP).

use std::{collections::BTreeMap, str::FromStr};

use anyhow::Result;
use chrono::{Duration, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::{
    db::{CommitOutcome, StoredCommit},
    settings::AppConfig,
    AppContext,
};

use super::ControlError;

const STATS_DAYS: usize = 7;
const UNKNOWN_BRANCH: &str = "unknown";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub running: bool,
    pub paused: bool,
    pub next_commit_in_seconds: Option<i64>,
    pub last_commit: Option<CommitOutcome>,
    pub generation_backend_available: bool,
    pub current_theme: String,
    pub repository_path: String,
    pub current_branch: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReport {
    pub commits: Vec<StoredCommit>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub total_commits: u64,
    pub success_rate_pct: f64,
    pub generation_usage_rate_pct: f64,
    pub commits_last_24h: u64,
    /// Attempts per stored day, oldest first.
    pub commits_by_day: Vec<u64>,
    pub commit_type_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
    Trigger,
}

impl ControlAction {
    pub fn acknowledgement(&self) -> &'static str {
        match self {
            ControlAction::Pause => "paused",
            ControlAction::Resume => "resumed",
            ControlAction::Trigger => "triggered",
        }
    }
}

impl FromStr for ControlAction {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pause" => Ok(ControlAction::Pause),
            "resume" => Ok(ControlAction::Resume),
            "trigger" => Ok(ControlAction::Trigger),
            other => Err(ControlError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlAck {
    pub status: &'static str,
}

/// Best-known state. Degraded collaborators show up as defaults, never as
/// an error.
pub async fn get_status(ctx: &AppContext) -> StatusReport {
    let snapshot = ctx.scheduler.get_snapshot().await;

    let last_commit = match snapshot.state.last_outcome {
        Some(outcome) => Some(outcome),
        None => match ctx.db.last_commit().await {
            Ok(stored) => stored.map(|commit| commit.outcome),
            Err(err) => {
                warn!("Failed to read last commit: {err:#}");
                None
            }
        },
    };

    let current_branch = match ctx.repo.current_branch().await {
        Ok(branch) => branch,
        Err(err) => {
            warn!("Failed to read current branch: {err}");
            UNKNOWN_BRANCH.to_string()
        }
    };

    StatusReport {
        running: snapshot.state.loop_running,
        paused: snapshot.state.paused,
        next_commit_in_seconds: snapshot.next_run_in_seconds,
        last_commit,
        generation_backend_available: ctx.generation_available,
        current_theme: ctx.config.ollama.theme.clone(),
        repository_path: ctx.repo.path().display().to_string(),
        current_branch,
    }
}

/// Logs a failed ledger read and substitutes the empty value.
fn or_default<T: Default>(result: Result<T>, what: &str) -> T {
    result.unwrap_or_else(|err| {
        warn!("Failed to read {what}: {err:#}");
        T::default()
    })
}

pub async fn get_history(ctx: &AppContext, limit: usize) -> HistoryReport {
    HistoryReport {
        commits: or_default(ctx.db.recent_commits(limit).await, "recent commits"),
        total: or_default(ctx.db.commit_count().await, "commit count"),
    }
}

/// Each figure degrades on its own; one unreadable table never hides the
/// rest.
pub async fn get_stats(ctx: &AppContext) -> StatsReport {
    let db = &ctx.db;
    let daily = or_default(db.daily_stats(STATS_DAYS).await, "daily stats");
    let since = Utc::now() - Duration::hours(24);

    StatsReport {
        total_commits: or_default(db.commit_count().await, "commit count"),
        success_rate_pct: round_one_decimal(or_default(db.success_rate().await, "success rate")),
        generation_usage_rate_pct: round_one_decimal(or_default(
            db.generation_usage_rate().await,
            "generation usage rate",
        )),
        commits_last_24h: or_default(db.commits_since(since).await, "commits in the last 24h"),
        commits_by_day: daily.iter().rev().map(|day| day.total_commits).collect(),
        commit_type_counts: or_default(db.commit_type_counts().await, "commit type counts"),
    }
}

pub async fn control(ctx: &AppContext, action: &str) -> Result<ControlAck, ControlError> {
    let action: ControlAction = action.parse()?;
    match action {
        ControlAction::Pause => ctx.scheduler.pause().await?,
        ControlAction::Resume => ctx.scheduler.resume().await?,
        ControlAction::Trigger => ctx.scheduler.trigger().await?,
    }
    info!("Control action '{}' accepted", action.acknowledgement());
    Ok(ControlAck {
        status: action.acknowledgement(),
    })
}

pub fn get_config(ctx: &AppContext) -> &AppConfig {
    &ctx.config
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
