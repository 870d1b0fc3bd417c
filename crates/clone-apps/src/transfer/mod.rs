//! Moves droplets and source bundles between the platform and the workspace.
//!
//! Droplets and source bundles run in two independent bounded pools; a batch
//! returns once both pools have drained. Downloads retry on 5xx and 408 with
//! [`retry::RetryPolicy`]; a 404 is final. Uploads are single attempts.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::TransferConfig;
use crate::transfer::pool::{Slot, panic_message, run_pool};
use crate::transfer::retry::{Retried, RetryPolicy};
use crate::workspace::{ArtifactKind, error_sidecar_name};

pub mod http;
pub mod pool;
pub mod retry;
pub mod sink;

pub use http::ArtifactClient;
pub use pool::CancelToken;
pub use sink::{NullSink, StdoutSink, TransferEvent, TransferSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// Artifact file name, used in logs and summaries.
    pub label: String,
    pub kind: ArtifactKind,
    pub remote_path: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        error: String,
        /// No retry could have helped (404, upload rejected).
        terminal: bool,
    },
    Skipped {
        reason: String,
    },
    Cancelled,
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub task: TransferTask,
    pub outcome: TransferOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub results: Vec<TransferResult>,
}

impl TransferReport {
    pub fn completed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_completed()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TransferResult> {
        self.results.iter().filter(|r| r.outcome.is_failed())
    }

    pub fn outcome_of(&self, label: &str) -> Option<&TransferOutcome> {
        self.results
            .iter()
            .find(|r| r.task.label == label)
            .map(|r| &r.outcome)
    }
}

pub struct TransferCoordinator {
    worker: Worker,
    concurrency: usize,
}

#[derive(Clone)]
struct Worker {
    client: ArtifactClient,
    policy: RetryPolicy,
    cancel: CancelToken,
    sink: Arc<dyn TransferSink>,
}

impl TransferCoordinator {
    pub fn new(
        client: ArtifactClient,
        policy: RetryPolicy,
        concurrency: usize,
        cancel: CancelToken,
        sink: Arc<dyn TransferSink>,
    ) -> Self {
        Self {
            worker: Worker {
                client,
                policy,
                cancel,
                sink,
            },
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(
        client: ArtifactClient,
        cfg: &TransferConfig,
        cancel: CancelToken,
        sink: Arc<dyn TransferSink>,
    ) -> Self {
        Self::new(client, RetryPolicy::from_config(cfg), cfg.concurrency, cancel, sink)
    }

    /// Runs every task and blocks until both pools are done. Droplet results
    /// come first, then sources, each in input order.
    pub fn run(&self, direction: Direction, tasks: Vec<TransferTask>) -> TransferReport {
        let (droplets, sources): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|t| t.kind == ArtifactKind::Droplet);
        info!(
            %direction,
            droplets = droplets.len(),
            sources = sources.len(),
            concurrency = self.concurrency,
            "starting transfers"
        );

        let droplet_tasks = droplets.clone();
        let (droplet_results, source_results) = std::thread::scope(|scope| {
            let droplet_pool = scope.spawn(|| self.run_pool(direction, "droplets", droplets));
            let source_results = self.run_pool(direction, "sources", sources);
            let droplet_results = settle_pool(direction, droplet_pool.join(), droplet_tasks);
            (droplet_results, source_results)
        });

        self.worker.sink.emit(TransferEvent::BatchDone { direction });
        let mut results = droplet_results;
        results.extend(source_results);
        TransferReport { results }
    }

    fn run_pool(&self, direction: Direction, name: &str, tasks: Vec<TransferTask>) -> Vec<TransferResult> {
        if tasks.is_empty() {
            return vec![];
        }
        let worker = self.worker.clone();
        let work = Arc::new(move |task: TransferTask| worker.transfer(direction, &task));
        let slots = run_pool(name, tasks.clone(), self.concurrency, &self.worker.cancel, work);
        tasks
            .into_iter()
            .zip(slots)
            .map(|(task, slot)| {
                let outcome = match slot {
                    Slot::Finished(o) => o,
                    Slot::Panicked(msg) => TransferOutcome::Failed {
                        attempts: 0,
                        error: format!("worker panicked: {msg}"),
                        terminal: true,
                    },
                    Slot::NotDispatched => TransferOutcome::Cancelled,
                };
                TransferResult { task, outcome }
            })
            .collect()
    }
}

/// A pool thread that died takes its results with it; every task it owned is
/// reported failed instead.
fn settle_pool(
    direction: Direction,
    joined: std::thread::Result<Vec<TransferResult>>,
    tasks: Vec<TransferTask>,
) -> Vec<TransferResult> {
    joined.unwrap_or_else(|panic| {
        let msg = panic_message(panic);
        error!(%direction, error = %msg, tasks = tasks.len(), "transfer pool panicked");
        tasks
            .into_iter()
            .map(|task| TransferResult {
                task,
                outcome: TransferOutcome::Failed {
                    attempts: 0,
                    error: format!("transfer pool panicked: {msg}"),
                    terminal: true,
                },
            })
            .collect()
    })
}

impl Worker {
    fn transfer(&self, direction: Direction, task: &TransferTask) -> TransferOutcome {
        self.sink.emit(TransferEvent::Started {
            label: task.label.clone(),
            direction,
            kind: task.kind,
        });
        let start = Instant::now();
        let outcome = match direction {
            Direction::Download => self.download(task),
            Direction::Upload => self.upload(task),
        };
        self.sink.emit(TransferEvent::Finished {
            label: task.label.clone(),
            direction,
            kind: task.kind,
            outcome: outcome.clone(),
            elapsed_ms: start.elapsed().as_millis(),
        });
        outcome
    }

    fn download(&self, task: &TransferTask) -> TransferOutcome {
        if let Some(parent) = task.file.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return TransferOutcome::Failed {
                attempts: 0,
                error: format!("failed to create {}: {e}", parent.display()),
                terminal: true,
            };
        }

        let mut statuses: Vec<u16> = Vec::new();
        let res = retry::run(&self.policy, &self.cancel, &task.label, |_| {
            self.client
                .download_once(&task.remote_path, &task.file)
                .inspect_err(|e| statuses.extend(e.status()))
        });
        match res {
            Retried::Done { attempts, .. } => {
                statuses.sort_unstable();
                statuses.dedup();
                for status in statuses {
                    let _ = fs::remove_file(error_sidecar_name(&task.file, status));
                }
                info!(task = %task.label, attempts, "downloaded");
                TransferOutcome::Completed { attempts }
            }
            Retried::Failed { attempts, error } => {
                error!(task = %task.label, path = %task.remote_path, attempts, error = %error, "download failed");
                TransferOutcome::Failed {
                    attempts,
                    terminal: !error.is_retryable(),
                    error: error.to_string(),
                }
            }
            Retried::Cancelled { .. } => TransferOutcome::Cancelled,
        }
    }

    fn upload(&self, task: &TransferTask) -> TransferOutcome {
        if !task.file.is_file() {
            warn!(task = %task.label, path = %task.file.display(), "local artifact missing, upload skipped");
            return TransferOutcome::Skipped {
                reason: format!("{} not found", task.file.display()),
            };
        }
        if self.cancel.is_cancelled() {
            return TransferOutcome::Cancelled;
        }
        match self.client.upload(&task.remote_path, task.kind, &task.file) {
            Ok(()) => {
                info!(task = %task.label, path = %task.remote_path, "uploaded");
                TransferOutcome::Completed { attempts: 1 }
            }
            Err(e) => {
                error!(task = %task.label, path = %task.remote_path, error = %e, "upload failed");
                TransferOutcome::Failed {
                    attempts: 1,
                    error: e.to_string(),
                    terminal: true,
                }
            }
        }
    }
}
