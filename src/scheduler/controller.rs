use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{error, info, warn};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify, OwnedMutexGuard},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{db::CommitOutcome, settings::ScheduleConfig};

use super::{runner::CommitCycleRunner, SchedulerState};

/// Upper bound on how long a pause, resume or shutdown request can go unseen.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("scheduler not running")]
    NotReady,
    #[error("a commit cycle is already in progress")]
    Busy,
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    pub base_interval: Duration,
    pub jitter_range: Duration,
    pub poll_interval: Duration,
}

impl From<&ScheduleConfig> for SchedulerTiming {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            base_interval: Duration::from_secs(config.base_interval),
            jitter_range: Duration::from_secs(config.jitter_range),
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl SchedulerTiming {
    /// `base ± uniform(jitter)`, never negative. Drawn fresh for every wait.
    pub fn next_interval(&self) -> Duration {
        let base = self.base_interval.as_secs_f64();
        let jitter = self.jitter_range.as_secs_f64();
        let offset = if jitter > 0.0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub state: SchedulerState,
    pub next_run_in_seconds: Option<i64>,
}

enum WaitOutcome {
    Elapsed,
    Paused,
    Cancelled,
}

/// Drives the commit loop and mediates control requests. At most one cycle
/// runs at a time: the loop and `trigger` share `cycle_guard`.
#[derive(Clone)]
pub struct SchedulerController {
    state: Arc<Mutex<SchedulerState>>,
    runner: Arc<CommitCycleRunner>,
    timing: SchedulerTiming,
    cycle_guard: Arc<Mutex<()>>,
    wake: Arc<Notify>,
    cancel_token: CancellationToken,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SchedulerController {
    pub fn new(runner: Arc<CommitCycleRunner>, timing: SchedulerTiming) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::new())),
            runner,
            timing,
            cycle_guard: Arc::new(Mutex::new(())),
            wake: Arc::new(Notify::new()),
            cancel_token: CancellationToken::new(),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn runner(&self) -> &Arc<CommitCycleRunner> {
        &self.runner
    }

    pub fn timing(&self) -> &SchedulerTiming {
        &self.timing
    }

    pub async fn get_state(&self) -> SchedulerState {
        self.state.lock().await.clone()
    }

    pub async fn get_snapshot(&self) -> SchedulerSnapshot {
        let guard = self.state.lock().await;
        SchedulerSnapshot {
            next_run_in_seconds: guard.seconds_until_next_run(Utc::now()),
            state: guard.clone(),
        }
    }

    /// Spawns the background loop. A second call while it runs is a no-op.
    pub async fn start(&self) {
        if self.cancel_token.is_cancelled() {
            warn!("Scheduler was shut down; not restarting");
            return;
        }

        let mut handle_guard = self.handle.lock().await;
        if handle_guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        self.state.lock().await.loop_started();
        let controller = self.clone();
        *handle_guard = Some(tokio::spawn(scheduler_loop(controller)));
    }

    /// Stops the loop at its next poll point. Returns only once no cycle,
    /// scheduled or triggered, still holds the repository.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("Scheduler loop ended abnormally: {err}");
            }
        }

        // A triggered cycle runs outside the loop task; wait for it to let go.
        let _drained = self.cycle_guard.lock().await;
        self.state.lock().await.loop_stopped();
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        {
            let mut state = self.state.lock().await;
            if !state.loop_running {
                return Err(ControlError::NotReady);
            }
            state.pause();
        }
        info!("Scheduler paused");
        self.wake.notify_waiters();
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        {
            let mut state = self.state.lock().await;
            if !state.loop_running {
                return Err(ControlError::NotReady);
            }
            state.resume();
        }
        info!("Scheduler resumed");
        self.wake.notify_waiters();
        Ok(())
    }

    /// Starts a cycle now, alongside the loop's pending wait. Rejected with
    /// `Busy` while another cycle holds the repository.
    pub async fn trigger(&self) -> Result<(), ControlError> {
        let guard = self
            .cycle_guard
            .clone()
            .try_lock_owned()
            .map_err(|_| ControlError::Busy)?;
        // Checked under the guard so `shutdown` either sees this cycle or
        // rejects it.
        if self.cancel_token.is_cancelled() || !self.state.lock().await.loop_running {
            return Err(ControlError::NotReady);
        }

        info!("Manual commit cycle triggered");
        let controller = self.clone();
        tokio::spawn(async move {
            controller.execute_cycle(guard).await;
        });
        Ok(())
    }

    async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    async fn run_scheduled_cycle(&self) {
        let guard = self.cycle_guard.clone().lock_owned().await;
        if self.cancel_token.is_cancelled() || self.is_paused().await {
            return;
        }
        self.state.lock().await.begin_scheduled_cycle();
        self.execute_cycle(guard).await;
    }

    /// The cycle runs in its own task so a panic surfaces as a `JoinError`
    /// here instead of tearing down the loop.
    async fn execute_cycle(&self, _guard: OwnedMutexGuard<()>) -> Option<CommitOutcome> {
        self.state.lock().await.begin_cycle();

        let runner = self.runner.clone();
        let outcome = match tokio::spawn(async move { runner.run_cycle().await }).await {
            Ok(result) => result.into_outcome(),
            Err(err) => {
                error!("Commit cycle aborted: {err}");
                None
            }
        };

        self.state.lock().await.finish_cycle(outcome.clone());
        outcome
    }

    async fn wait_for(&self, interval: Duration) -> WaitOutcome {
        let deadline = Instant::now() + interval;
        loop {
            if self.is_paused().await {
                return WaitOutcome::Paused;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Elapsed;
            }
            let tick = (deadline - now).min(self.timing.poll_interval);
            tokio::select! {
                _ = self.cancel_token.cancelled() => return WaitOutcome::Cancelled,
                _ = self.wake.notified() => {}
                _ = time::sleep(tick) => {}
            }
        }
    }

    /// Returns `false` once shutdown has been requested.
    async fn idle_while_paused(&self) -> bool {
        tokio::select! {
            _ = self.cancel_token.cancelled() => false,
            _ = self.wake.notified() => true,
            _ = time::sleep(self.timing.poll_interval) => true,
        }
    }
}

async fn scheduler_loop(controller: SchedulerController) {
    info!("Scheduler running in continuous mode");

    loop {
        if controller.cancel_token.is_cancelled() {
            break;
        }

        if controller.is_paused().await {
            controller.state.lock().await.enter_paused();
            if !controller.idle_while_paused().await {
                break;
            }
            continue;
        }

        let interval = controller.timing.next_interval();
        let next_run_at = Utc::now()
            + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
        controller.state.lock().await.begin_wait(next_run_at);
        info!(
            "Next commit in {:.1} seconds ({:.2} minutes)",
            interval.as_secs_f64(),
            interval.as_secs_f64() / 60.0
        );

        match controller.wait_for(interval).await {
            WaitOutcome::Elapsed => controller.run_scheduled_cycle().await,
            WaitOutcome::Paused => continue,
            WaitOutcome::Cancelled => break,
        }
    }

    controller.state.lock().await.loop_stopped();
    info!("Scheduler loop stopped");
}
