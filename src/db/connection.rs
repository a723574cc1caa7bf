use std::{
    path::{Path, PathBuf},
    sync::{mpsc as std_mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the job queue and the worker thread. Closing the queue stops the worker.
struct Worker {
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn submit(&self, job: Job) -> Result<()> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow!("database job queue lock poisoned"))?;
        match jobs.as_ref() {
            Some(sender) => sender
                .send(job)
                .map_err(|_| anyhow!("database worker is no longer running")),
            None => Err(anyhow!("database is shut down")),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Database worker thread panicked");
            }
        }
    }
}

/// Session history store. All SQLite access happens on one dedicated thread; async
/// callers hand it a closure and await the result.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and brings its schema up to
    /// date before returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create database directory {}", dir.display()))?;
        }

        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name("camwatch-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }

                while let Some(job) = job_rx.blocking_recv() {
                    job(&mut conn);
                }
                info!("Database worker for {} stopped", thread_path.display());
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited during startup")??;
        info!("Database ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Mutex::new(Some(job_tx)),
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `task` on the database thread.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.worker.submit(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                warn!("Database caller went away before its result arrived");
            }
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("WAL journal mode unavailable: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}
