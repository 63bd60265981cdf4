use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_date, to_i64, to_u64},
    models::DailyStat,
};

fn row_to_daily_stat(row: &Row) -> Result<DailyStat> {
    let date: String = row.get("date")?;
    Ok(DailyStat {
        date: parse_date(&date, "date")?,
        total_commits: to_u64(row.get("total_commits")?, "total_commits")?,
        successful_commits: to_u64(row.get("successful_commits")?, "successful_commits")?,
        generation_used: to_u64(row.get("generation_used")?, "generation_used")?,
        template_used: to_u64(row.get("template_used")?, "template_used")?,
    })
}

impl Database {
    /// The `days` most recent days that have any recorded attempt, newest
    /// first. Days without activity are absent, not zero-filled.
    pub async fn daily_stats(&self, days: usize) -> Result<Vec<DailyStat>> {
        let days = to_i64(days as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT date, total_commits, successful_commits, generation_used, template_used
                 FROM daily_stats
                 ORDER BY date DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![days])?;
            let mut stats = Vec::new();
            while let Some(row) = rows.next()? {
                stats.push(row_to_daily_stat(row)?);
            }
            Ok(stats)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{helpers::local_date_key, CommitOutcome, Database};
    use chrono::{Duration, Utc};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("ledger.db")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn one_row_per_day_with_tier_split() {
        let (_dir, db) = open();
        let now = Utc::now();

        db.record_outcome(&CommitOutcome::committed("a", "feat: a", 1, true, None, false).at(now))
            .await
            .unwrap();
        db.record_outcome(&CommitOutcome::committed("b", "fix: b", 1, false, None, false).at(now))
            .await
            .unwrap();
        db.record_outcome(&CommitOutcome::failed("chore: c", 1, false, None, "boom").at(now))
            .await
            .unwrap();

        let stats = db.daily_stats(7).await.unwrap();
        assert_eq!(stats.len(), 1);
        let today = &stats[0];
        assert_eq!(today.date.format("%Y-%m-%d").to_string(), local_date_key(&now));
        assert_eq!(today.total_commits, 3);
        assert_eq!(today.successful_commits, 2);
        assert_eq!(today.generation_used, 1);
        assert_eq!(today.template_used, 2);
    }

    #[tokio::test]
    async fn missing_days_are_not_zero_filled() {
        let (_dir, db) = open();
        let now = Utc::now();
        for days_ago in [0, 5] {
            let outcome = CommitOutcome::committed("h", "chore: tick", 1, false, None, false)
                .at(now - Duration::days(days_ago));
            db.record_outcome(&outcome).await.unwrap();
        }

        let stats = db.daily_stats(7).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats[0].date > stats[1].date);
    }

    #[tokio::test]
    async fn limit_keeps_most_recent_days() {
        let (_dir, db) = open();
        let now = Utc::now();
        for days_ago in 0..4 {
            let outcome = CommitOutcome::committed("h", "chore: tick", 1, false, None, false)
                .at(now - Duration::days(days_ago));
            db.record_outcome(&outcome).await.unwrap();
        }

        let stats = db.daily_stats(2).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats[0].date.format("%Y-%m-%d").to_string(),
            local_date_key(&now)
        );
    }
}
