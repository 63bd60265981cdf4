use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{
            escape_like, format_datetime, local_date_key, parse_datetime, percentage, to_i64,
            to_u64,
        },
        models::{CommitOutcome, StoredCommit},
    },
    message::conventional_type,
};

const COMMIT_COLUMNS: &str = "id, hash, message, timestamp, files_changed, success, used_generation, theme, error_message, push_success";

fn row_to_commit(row: &Row) -> Result<StoredCommit> {
    let timestamp: String = row.get("timestamp")?;
    let files_changed: i64 = row.get("files_changed")?;

    Ok(StoredCommit {
        id: row.get("id")?,
        outcome: CommitOutcome {
            hash: row.get("hash")?,
            message: row.get("message")?,
            files_changed: to_u64(files_changed, "files_changed")?,
            success: row.get("success")?,
            used_generation: row.get("used_generation")?,
            theme: row.get("theme")?,
            error: row.get("error_message")?,
            push_success: row.get("push_success")?,
            timestamp: parse_datetime(&timestamp, "timestamp")?,
        },
    })
}

fn collect_commits(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<StoredCommit>> {
    let mut commits = Vec::new();
    while let Some(row) = rows.next()? {
        commits.push(row_to_commit(row)?);
    }
    Ok(commits)
}

impl Database {
    /// Appends the outcome and bumps the day's aggregate in one transaction.
    pub async fn record_outcome(&self, outcome: &CommitOutcome) -> Result<i64> {
        let record = outcome.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO commits (hash, message, timestamp, files_changed, success, used_generation, theme, error_message, push_success)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.hash,
                    record.message,
                    format_datetime(&record.timestamp),
                    to_i64(record.files_changed)?,
                    record.success,
                    record.used_generation,
                    record.theme,
                    record.error,
                    record.push_success,
                ],
            )
            .context("failed to insert commit record")?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO daily_stats (date, total_commits, successful_commits, generation_used, template_used)
                 VALUES (?1, 1, ?2, ?3, ?4)
                 ON CONFLICT(date) DO UPDATE SET
                     total_commits = total_commits + 1,
                     successful_commits = successful_commits + excluded.successful_commits,
                     generation_used = generation_used + excluded.generation_used,
                     template_used = template_used + excluded.template_used",
                params![
                    local_date_key(&record.timestamp),
                    i64::from(record.success),
                    i64::from(record.used_generation),
                    i64::from(!record.used_generation),
                ],
            )
            .context("failed to update daily stats")?;

            tx.commit().context("failed to commit outcome transaction")?;
            Ok(id)
        })
        .await
    }

    pub async fn recent_commits(&self, limit: usize) -> Result<Vec<StoredCommit>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMIT_COLUMNS}
                 FROM commits
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1"
            ))?;
            let mut rows = stmt.query(params![limit])?;
            collect_commits(&mut rows)
        })
        .await
    }

    pub async fn last_commit(&self) -> Result<Option<StoredCommit>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMIT_COLUMNS}
                 FROM commits
                 ORDER BY timestamp DESC, id DESC
                 LIMIT 1"
            ))?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_commit(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Case-insensitive (ASCII) substring match on the message.
    pub async fn search_commits(&self, term: &str, limit: usize) -> Result<Vec<StoredCommit>> {
        let pattern = format!("%{}%", escape_like(term));
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMIT_COLUMNS}
                 FROM commits
                 WHERE message LIKE ?1 ESCAPE '\\'
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2"
            ))?;
            let mut rows = stmt.query(params![pattern, limit])?;
            collect_commits(&mut rows)
        })
        .await
    }

    pub async fn commit_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))?;
            to_u64(count, "commit count")
        })
        .await
    }

    /// Attempts recorded at or after `since`.
    pub async fn commits_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let since = format_datetime(&since);
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM commits WHERE timestamp >= ?1",
                params![since],
                |row| row.get(0),
            )?;
            to_u64(count, "commit count")
        })
        .await
    }

    pub async fn success_rate(&self) -> Result<f64> {
        self.flag_rate("success").await
    }

    pub async fn generation_usage_rate(&self) -> Result<f64> {
        self.flag_rate("used_generation").await
    }

    async fn flag_rate(&self, column: &'static str) -> Result<f64> {
        self.execute(move |conn| {
            let (total, matching): (i64, Option<i64>) = conn.query_row(
                &format!("SELECT COUNT(*), SUM({column}) FROM commits"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(percentage(
                to_u64(matching.unwrap_or(0), column)?,
                to_u64(total, "commit count")?,
            ))
        })
        .await
    }

    /// Tally of recognized conventional types across successful commits.
    pub async fn commit_type_counts(&self) -> Result<BTreeMap<String, u64>> {
        let messages: Vec<String> = self
            .execute(|conn| {
                let mut stmt = conn.prepare("SELECT message FROM commits WHERE success = 1")?;
                let messages = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(messages)
            })
            .await?;

        let mut counts = BTreeMap::new();
        for kind in messages.iter().filter_map(|message| conventional_type(message)) {
            *counts.entry(kind.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub async fn get_commit(&self, id: i64) -> Result<Option<StoredCommit>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMIT_COLUMNS} FROM commits WHERE id = ?1"
            ))?;
            let commit = stmt
                .query_row(params![id], |row| Ok(row_to_commit(row)))
                .optional()?
                .transpose()?;
            Ok(commit)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("ledger.db")).unwrap();
        (dir, db)
    }

    fn ok(message: &str, used_generation: bool) -> CommitOutcome {
        CommitOutcome::committed("abc123", message, 2, used_generation, None, false)
    }

    fn failed(message: &str) -> CommitOutcome {
        CommitOutcome::failed(message, 1, false, None, "commit rejected")
    }

    #[tokio::test]
    async fn empty_ledger_reports_zero_rates() {
        let (_dir, db) = open();
        assert_eq!(db.commit_count().await.unwrap(), 0);
        assert_eq!(db.success_rate().await.unwrap(), 0.0);
        assert_eq!(db.generation_usage_rate().await.unwrap(), 0.0);
        assert!(db.last_commit().await.unwrap().is_none());
        assert!(db.commit_type_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_outcome_round_trips_all_fields() {
        let (_dir, db) = open();
        let outcome = CommitOutcome::committed(
            "deadbeef",
            "feat: add x",
            3,
            true,
            Some("kubernetes".into()),
            true,
        );
        let id = db.record_outcome(&outcome).await.unwrap();

        let stored = db.get_commit(id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.outcome.hash, "deadbeef");
        assert_eq!(stored.outcome.files_changed, 3);
        assert!(stored.outcome.used_generation);
        assert!(stored.outcome.push_success);
        assert_eq!(stored.outcome.theme.as_deref(), Some("kubernetes"));
        assert_eq!(stored.outcome.timestamp, outcome.timestamp);
        assert!(db.get_commit(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sub_microsecond_timestamps_survive_the_ledger() {
        let (_dir, db) = open();
        let precise = Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap();
        let outcome = CommitOutcome::committed("cafe", "fix: y", 1, false, None, false).at(precise);
        let id = db.record_outcome(&outcome).await.unwrap();

        let stored = db.get_commit(id).await.unwrap().unwrap();
        assert_eq!(stored.outcome, outcome);
    }

    #[tokio::test]
    async fn rates_use_matching_over_total() {
        let (_dir, db) = open();
        db.record_outcome(&ok("feat: one", true)).await.unwrap();
        db.record_outcome(&ok("fix: two", false)).await.unwrap();
        db.record_outcome(&ok("chore: three", false)).await.unwrap();
        db.record_outcome(&failed("docs: four")).await.unwrap();

        assert_eq!(db.commit_count().await.unwrap(), 4);
        assert_eq!(db.success_rate().await.unwrap(), 75.0);
        assert_eq!(db.generation_usage_rate().await.unwrap(), 25.0);
    }

    #[tokio::test]
    async fn recent_commits_are_newest_first_with_id_tiebreak() {
        let (_dir, db) = open();
        let now = Utc::now();
        db.record_outcome(&ok("chore: old", false).at(now - Duration::hours(2)))
            .await
            .unwrap();
        let a = db.record_outcome(&ok("chore: a", false).at(now)).await.unwrap();
        let b = db.record_outcome(&ok("chore: b", false).at(now)).await.unwrap();

        let recent = db.recent_commits(10).await.unwrap();
        let ids: Vec<i64> = recent.iter().map(|c| c.id).collect();
        assert_eq!(ids[..2], [b, a]);
        assert_eq!(recent[2].outcome.message, "chore: old");

        assert_eq!(db.recent_commits(1).await.unwrap().len(), 1);
        assert_eq!(db.last_commit().await.unwrap().unwrap().id, b);
    }

    #[tokio::test]
    async fn commit_type_counts_only_successful_and_recognized() {
        let (_dir, db) = open();
        db.record_outcome(&ok("feat: one", false)).await.unwrap();
        db.record_outcome(&ok("feat(api): two", false)).await.unwrap();
        db.record_outcome(&ok("fix: three", false)).await.unwrap();
        db.record_outcome(&ok("Update documentation for API", false))
            .await
            .unwrap();
        db.record_outcome(&ok("wip: not a type", false)).await.unwrap();
        db.record_outcome(&failed("docs: failed attempt")).await.unwrap();

        let counts = db.commit_type_counts().await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["feat"], 2);
        assert_eq!(counts["fix"], 1);
        assert!(!counts.contains_key("docs"));
    }

    #[tokio::test]
    async fn search_matches_substring_literally() {
        let (_dir, db) = open();
        db.record_outcome(&ok("feat: add login page", false)).await.unwrap();
        db.record_outcome(&ok("fix: 100% coverage", false)).await.unwrap();
        db.record_outcome(&ok("chore: bump deps", false)).await.unwrap();

        let hits = db.search_commits("LOGIN", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].outcome.message, "feat: add login page");

        let hits = db.search_commits("%", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].outcome.message, "fix: 100% coverage");
    }

    #[tokio::test]
    async fn commits_since_is_a_rolling_window() {
        let (_dir, db) = open();
        let now = Utc::now();
        db.record_outcome(&ok("chore: stale", false).at(now - Duration::hours(30)))
            .await
            .unwrap();
        db.record_outcome(&ok("chore: fresh", false).at(now - Duration::hours(1)))
            .await
            .unwrap();
        db.record_outcome(&failed("chore: fresh failure")).await.unwrap();

        let count = db.commits_since(now - Duration::hours(24)).await.unwrap();
        assert_eq!(count, 2);
    }
}
