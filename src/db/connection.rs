use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_THREAD_NAME: &str = "git-cadence-db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// Owns the worker thread. Dropping the last handle stops it and waits for
/// queued jobs to drain.
struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(thread) = thread else {
            return;
        };
        if self.jobs.send(Message::Stop).is_err() {
            warn!("Ledger worker already gone at shutdown");
        }
        if thread.join().is_err() {
            error!("Ledger worker panicked");
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open ledger {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Ledger stays in rollback-journal mode: {err}");
    }
    run_migrations(&mut conn).context("failed to migrate ledger schema")?;
    Ok(conn)
}

/// Opens the connection on a fresh thread and serves jobs from `jobs` until
/// told to stop. Returns once the connection is ready or has failed.
fn spawn_worker(path: PathBuf, jobs: mpsc::Receiver<Message>) -> Result<JoinHandle<()>> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

    let thread = thread::Builder::new()
        .name(WORKER_THREAD_NAME.into())
        .spawn(move || {
            let mut conn = match open_connection(&path) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    conn
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            for message in jobs.iter() {
                match message {
                    Message::Run(job) => job(&mut conn),
                    Message::Stop => break,
                }
            }
            debug!("Ledger worker stopped");
        })
        .context("failed to spawn ledger worker")?;

    ready_rx
        .recv()
        .map_err(|_| anyhow!("ledger worker exited during startup"))??;
    Ok(thread)
}

/// Handle to the ledger. Every statement runs on one dedicated thread, which
/// serializes writes; clones share that thread.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or creates) the ledger at `path`, creating parent directories
    /// and applying pending migrations.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create ledger directory {}", dir.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let thread = spawn_worker(path.clone(), jobs_rx)?;
        info!("Ledger opened at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `task` on the worker thread and hands back its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled while the job was queued.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("ledger worker is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("ledger worker dropped the job"))?
    }
}
