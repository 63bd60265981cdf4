pub mod commit;
pub mod daily_stat;

pub use commit::{CommitOutcome, StoredCommit};
pub use daily_stat::DailyStat;
