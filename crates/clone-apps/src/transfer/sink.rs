use std::sync::Mutex;
use std::time::Instant;

use crate::transfer::{Direction, TransferOutcome};
use crate::workspace::ArtifactKind;

#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started {
        label: String,
        direction: Direction,
        kind: ArtifactKind,
    },
    Finished {
        label: String,
        direction: Direction,
        kind: ArtifactKind,
        outcome: TransferOutcome,
        elapsed_ms: u128,
    },
    BatchDone {
        direction: Direction,
    },
}

pub trait TransferSink: Send + Sync {
    fn emit(&self, ev: TransferEvent);
}

pub struct NullSink;

impl TransferSink for NullSink {
    fn emit(&self, _ev: TransferEvent) {}
}

/// One line per transfer and a SUMMARY block when a batch is done.
#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    started: usize,
    ok: usize,
    failed: usize,
    skipped: usize,
    cancelled: usize,
    failed_labels: Vec<String>,
}

impl TransferSink for StdoutSink {
    fn emit(&self, ev: TransferEvent) {
        match ev {
            TransferEvent::Started {
                label,
                direction,
                kind,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    s.started = s.started.saturating_add(1);
                    if s.started_at.is_none() {
                        s.started_at = Some(Instant::now());
                    }
                }
                println!("RUN: {direction} {kind} {label}");
            }
            TransferEvent::Finished {
                label,
                direction,
                kind,
                outcome,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    match &outcome {
                        TransferOutcome::Completed { .. } => s.ok = s.ok.saturating_add(1),
                        TransferOutcome::Failed { .. } => {
                            s.failed = s.failed.saturating_add(1);
                            s.failed_labels.push(label.clone());
                        }
                        TransferOutcome::Skipped { .. } => s.skipped = s.skipped.saturating_add(1),
                        TransferOutcome::Cancelled => s.cancelled = s.cancelled.saturating_add(1),
                    }
                }
                match outcome {
                    TransferOutcome::Completed { attempts } => {
                        println!("DONE: {direction} {kind} {label} ({elapsed_ms}ms, attempts={attempts})")
                    }
                    TransferOutcome::Failed {
                        attempts, error, ..
                    } => println!(
                        "FAIL: {direction} {kind} {label} ({elapsed_ms}ms, attempts={attempts}) {error}"
                    ),
                    TransferOutcome::Skipped { reason } => {
                        println!("SKIP: {direction} {kind} {label} {reason}")
                    }
                    TransferOutcome::Cancelled => println!("CANCELLED: {direction} {kind} {label}"),
                }
            }
            TransferEvent::BatchDone { direction } => {
                let Ok(mut s) = self.state.lock() else {
                    return;
                };
                let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                let mut summary = String::new();
                summary.push_str("SUMMARY:\n");
                summary.push_str(&format!("  direction: {direction}\n"));
                summary.push_str(&format!(
                    "  status: {}\n",
                    if s.failed == 0 { "ok" } else { "failed" }
                ));
                summary.push_str(&format!(
                    "  transfers: started={} ok={} failed={} skipped={} cancelled={}\n",
                    s.started, s.ok, s.failed, s.skipped, s.cancelled
                ));
                summary.push_str(&format!("  elapsed: {}\n", format_elapsed_hms(wall.as_secs())));
                if !s.failed_labels.is_empty() {
                    let mut failed = s.failed_labels.clone();
                    failed.sort();
                    summary.push_str(&format!("  failed_transfers: {}\n", failed.join(", ")));
                }
                *s = StdoutSinkState::default();
                print!("{summary}");
            }
        }
    }
}

pub(crate) fn format_elapsed_hms(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}
