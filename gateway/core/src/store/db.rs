// Copyright 2023, The Weavegate Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Database worker lanes.
//!
//! Each namespace routes its operations through a *read* lane and a *write* lane. A lane is a FIFO
//! queue served by a fixed set of worker tasks, each owning exactly one sqlite connection; the
//! write lane always has a single worker, so every namespace has exactly one writer at any instant.
//! Readers see WAL snapshots.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures::{future::BoxFuture, FutureExt};
use log::*;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    ConnectOptions,
    SqliteConnection,
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    time::Duration,
};

use crate::store::StoreError;

const LOG_TARGET: &str = "wg::store::db";

/// A worker that has failed this many times takes the process down with it; past this point the
/// database is assumed to be unusable and restarting is the only safe move.
pub const MAX_WORKER_ERRORS: usize = 100;

const LANE_QUEUE_DEPTH: usize = 1024;

type JobFn = Box<dyn for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, ()> + Send>;

struct Job {
    method: &'static str,
    exec: JobFn,
}

/// One FIFO dispatch queue plus its workers. Cloning shares the queue.
#[derive(Clone)]
pub(crate) struct Lane {
    label: &'static str,
    sender: mpsc::Sender<Job>,
}

impl Lane {
    pub fn spawn(label: &'static str, connections: Vec<SqliteConnection>, error_count: Arc<AtomicUsize>) -> Self {
        let (sender, receiver) = mpsc::channel(LANE_QUEUE_DEPTH);
        let receiver = Arc::new(Mutex::new(receiver));
        for (worker, conn) in connections.into_iter().enumerate() {
            tokio::spawn(run_worker(label, worker, conn, receiver.clone(), error_count.clone()));
        }
        Self { label, sender }
    }

    /// Dispatch `exec` to this lane and await its reply. The method name travels with the job so
    /// failures keep their origin across the queue boundary.
    pub async fn run<T, F>(&self, method: &'static str, exec: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, sqlx::Error>> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job = Job {
            method,
            exec: Box::new(move |conn| {
                async move {
                    // The caller may have gone away; completed work is not rolled back
                    let _ = reply.send(exec(conn).await);
                }
                .boxed()
            }),
        };
        self.sender
            .send(job)
            .await
            .map_err(|_| StoreError::LaneClosed { lane: self.label })?;
        receiver
            .await
            .map_err(|_| StoreError::WorkerCrashed { method })?
            .map_err(|source| StoreError::Query { method, source })
    }
}

async fn run_worker(
    label: &'static str,
    worker: usize,
    mut conn: SqliteConnection,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    error_count: Arc<AtomicUsize>,
) {
    trace!(target: LOG_TARGET, "{} worker {} started", label, worker);
    loop {
        // The queue lock is held only while idle; workers execute jobs unlocked so a busy lane
        // still hands the next job to the next free worker.
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let job = match job {
            Some(job) => job,
            None => break,
        };

        let run = std::panic::AssertUnwindSafe((job.exec)(&mut conn)).catch_unwind();
        if run.await.is_err() {
            let errors = error_count.fetch_add(1, Ordering::Relaxed) + 1;
            error!(
                target: LOG_TARGET,
                "{} worker {} panicked in `{}` ({} worker errors so far)", label, worker, job.method, errors
            );
            // A panic can leave an open transaction behind on this connection
            let _ = sqlx::query("ROLLBACK").execute(&mut conn).await;
            if errors > MAX_WORKER_ERRORS {
                error!(
                    target: LOG_TARGET,
                    "More than {} database worker errors; exiting", MAX_WORKER_ERRORS
                );
                std::process::exit(1);
            }
        }
    }
    trace!(target: LOG_TARGET, "{} worker {} stopped", label, worker);
}

/// Open one sqlite connection in WAL mode. Writers create missing files; readers must find them.
pub(crate) async fn open_connection(path: &Path, read_only: bool) -> Result<SqliteConnection, StoreError> {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(!read_only)
        .read_only(read_only)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .connect()
        .await
        .map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Apply a namespace's schema statements. All DDL is `IF NOT EXISTS`, so this is idempotent.
/// Statements are split on top-level semicolons; the schema files contain no `;` inside literals.
pub(crate) async fn apply_schema(conn: &mut SqliteConnection, path: &Path, schema: &str) -> Result<(), StoreError> {
    for statement in schema.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|source| StoreError::Open {
                path: path.display().to_string(),
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    async fn memory_lane(workers: usize) -> (Lane, Arc<AtomicUsize>) {
        let mut conns = Vec::new();
        for _ in 0..workers {
            let conn = SqliteConnectOptions::new()
                .filename(":memory:")
                .connect()
                .await
                .unwrap();
            conns.push(conn);
        }
        let errors = Arc::new(AtomicUsize::new(0));
        (Lane::spawn("test", conns, errors.clone()), errors)
    }

    #[tokio::test]
    async fn lane_round_trips_values() {
        let (lane, _) = memory_lane(1).await;
        let out = lane
            .run("select_one", |conn| {
                async move {
                    let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&mut *conn).await?;
                    Ok(row.0)
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(out, 1);
    }

    #[tokio::test]
    async fn lane_reports_method_on_error() {
        let (lane, _) = memory_lane(1).await;
        let err = lane
            .run("bad_query", |conn| {
                async move {
                    sqlx::query("SELECT * FROM nonexistent").execute(&mut *conn).await?;
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap_err();
        match err {
            StoreError::Query { method, .. } => assert_eq!(method, "bad_query"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_job_is_counted_and_worker_survives() {
        let (lane, errors) = memory_lane(1).await;
        let crashed = lane
            .run("panics", |_conn| {
                async move {
                    panic!("boom");
                    #[allow(unreachable_code)]
                    Ok::<(), sqlx::Error>(())
                }
                .boxed()
            })
            .await;
        assert!(matches!(crashed, Err(StoreError::WorkerCrashed { method: "panics" })));
        assert_eq!(errors.load(Ordering::Relaxed), 1);

        // The same worker keeps serving
        let out = lane
            .run("select_two", |conn| {
                async move {
                    let row: (i64,) = sqlx::query_as("SELECT 2").fetch_one(&mut *conn).await?;
                    Ok(row.0)
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(out, 2);
    }

    #[tokio::test]
    async fn jobs_are_fifo_within_a_lane() {
        let (lane, _) = memory_lane(1).await;
        lane.run("create", |conn| {
            async move {
                sqlx::query("CREATE TABLE seq (n INTEGER)").execute(&mut *conn).await?;
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

        let mut handles = Vec::new();
        for n in 0..10i64 {
            let lane = lane.clone();
            handles.push(async move {
                lane.run("insert", move |conn| {
                    async move {
                        sqlx::query("INSERT INTO seq (n) VALUES (?1)")
                            .bind(n)
                            .execute(&mut *conn)
                            .await?;
                        Ok(())
                    }
                    .boxed()
                })
                .await
            });
        }
        for h in handles {
            h.await.unwrap();
        }

        let rows = lane
            .run("read", |conn| {
                async move {
                    let rows: Vec<(i64,)> = sqlx::query_as("SELECT n FROM seq ORDER BY rowid")
                        .fetch_all(&mut *conn)
                        .await?;
                    Ok(rows)
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    }
}
