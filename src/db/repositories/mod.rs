mod commits;
mod daily_stats;
