use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::CommitOutcome;

/// Where the background loop currently is. Triggered cycles run outside the
/// loop and do not move the phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerPhase {
    #[default]
    Idle,
    Waiting,
    Running,
    Paused,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub phase: SchedulerPhase,
    pub paused: bool,
    /// True while the background loop task is alive.
    pub loop_running: bool,
    /// True while any cycle, scheduled or triggered, holds the repository.
    pub cycle_in_progress: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CommitOutcome>,
    pub cycles_completed: u64,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loop_started(&mut self) {
        self.loop_running = true;
        self.phase = if self.paused {
            SchedulerPhase::Paused
        } else {
            SchedulerPhase::Idle
        };
    }

    pub fn loop_stopped(&mut self) {
        self.loop_running = false;
        self.phase = SchedulerPhase::Idle;
        self.next_run_at = None;
    }

    pub fn begin_wait(&mut self, next_run_at: DateTime<Utc>) {
        self.phase = SchedulerPhase::Waiting;
        self.next_run_at = Some(next_run_at);
    }

    pub fn enter_paused(&mut self) {
        self.phase = SchedulerPhase::Paused;
        self.next_run_at = None;
    }

    pub fn begin_scheduled_cycle(&mut self) {
        self.phase = SchedulerPhase::Running;
        self.next_run_at = None;
    }

    pub fn begin_cycle(&mut self) {
        self.cycle_in_progress = true;
    }

    /// Skipped cycles pass `None` and keep the previous outcome.
    pub fn finish_cycle(&mut self, outcome: Option<CommitOutcome>) {
        self.cycle_in_progress = false;
        self.cycles_completed = self.cycles_completed.saturating_add(1);
        if let Some(outcome) = outcome {
            self.last_outcome = Some(outcome);
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Whole seconds until the published next run, never negative.
    pub fn seconds_until_next_run(&self, now: DateTime<Utc>) -> Option<i64> {
        self.next_run_at
            .map(|at| (at - now).num_seconds().max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn wait_publishes_and_cycle_clears_next_run() {
        let mut state = SchedulerState::new();
        state.loop_started();
        let now = Utc::now();
        state.begin_wait(now + Duration::seconds(90));
        assert_eq!(state.phase, SchedulerPhase::Waiting);
        assert_eq!(state.seconds_until_next_run(now), Some(90));

        state.begin_scheduled_cycle();
        assert_eq!(state.phase, SchedulerPhase::Running);
        assert_eq!(state.seconds_until_next_run(now), None);
    }

    #[test]
    fn overdue_next_run_reports_zero() {
        let mut state = SchedulerState::new();
        let now = Utc::now();
        state.begin_wait(now - Duration::seconds(3));
        assert_eq!(state.seconds_until_next_run(now), Some(0));
    }

    #[test]
    fn skipped_cycle_keeps_last_outcome() {
        let mut state = SchedulerState::new();
        let outcome = CommitOutcome::committed("h", "feat: x", 1, false, None, false);
        state.begin_cycle();
        state.finish_cycle(Some(outcome.clone()));
        state.begin_cycle();
        assert!(state.cycle_in_progress);
        state.finish_cycle(None);

        assert!(!state.cycle_in_progress);
        assert_eq!(state.cycles_completed, 2);
        assert_eq!(state.last_outcome, Some(outcome));
    }

    #[test]
    fn loop_starts_paused_when_flag_already_set() {
        let mut state = SchedulerState::new();
        state.pause();
        state.loop_started();
        assert_eq!(state.phase, SchedulerPhase::Paused);
        state.loop_stopped();
        assert!(!state.loop_running);
        assert_eq!(state.phase, SchedulerPhase::Idle);
    }
}
