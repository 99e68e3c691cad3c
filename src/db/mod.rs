//! Persistence for studies and other JSON-bodied records.
//!
//! Rows live in a single SQLite file in WAL mode. A dedicated `records-store`
//! thread holds the only connection; every query is a closure sent to it, and
//! the result comes back on a oneshot the async caller awaits.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod helpers;
mod migrations;
pub mod repositories;

use migrations::run_migrations;

pub use repositories::records::{delete_record, query_all, save_record, Record, RecordStore};

type StoreJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreMsg {
    Job(StoreJob),
    Close,
}

struct StoreWorker {
    jobs: mpsc::Sender<StoreMsg>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        if let Err(err) = self.jobs.send(StoreMsg::Close) {
            error!("Record store worker already gone at close: {err}");
        }
        if let Err(join_err) = handle.join() {
            error!("Record store worker panicked: {join_err:?}");
        }
    }
}

fn open_store(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open record store {}", path.display()))?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Record store stays in rollback-journal mode: {err}");
    }
    run_migrations(&mut conn).context("failed to migrate record store schema")?;
    Ok(conn)
}

/// Handle to the record store. Clones share the one worker thread, which
/// exits when the last clone drops.
#[derive(Clone)]
pub struct Database {
    worker: Arc<StoreWorker>,
}

impl Database {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create record store directory {}", dir.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<StoreMsg>();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<()>>();
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name("records-store".into())
            .spawn(move || {
                let mut conn = match open_store(&thread_path) {
                    Ok(conn) => {
                        if opened_tx.send(Ok(())).is_err() {
                            return;
                        }
                        conn
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(StoreMsg::Job(job)) = jobs_rx.recv() {
                    job(&mut conn);
                }
                info!("Record store worker stopped");
            })
            .context("failed to spawn record store worker")?;

        opened_rx
            .recv()
            .context("record store worker died while opening")??;
        info!("Record store ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(StoreWorker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Run `job` on the store thread and await its result.
    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = StoreMsg::Job(Box::new(move |conn| {
            if reply_tx.send(job(conn)).is_err() {
                error!("Record store caller went away before its reply");
            }
        }));

        self.worker
            .jobs
            .send(msg)
            .map_err(|err| anyhow!("record store worker is not accepting jobs: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("record store worker dropped a job without replying"))?
    }
}
