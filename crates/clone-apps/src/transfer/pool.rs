use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

use tracing::{debug, error};

/// Shared stop flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub enum Slot<R> {
    Finished(R),
    Panicked(String),
    /// Never dispatched because the token fired first.
    NotDispatched,
}

/// Runs `work` over `tasks` on at most `limit` threads and waits for all of
/// them. Results come back in input order.
pub fn run_pool<T, R, F>(
    name: &str,
    tasks: Vec<T>,
    limit: usize,
    cancel: &CancelToken,
    work: Arc<F>,
) -> Vec<Slot<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let limit = limit.max(1);
    let total = tasks.len();
    let mut slots: Vec<Slot<R>> = (0..total).map(|_| Slot::NotDispatched).collect();
    let mut ready: VecDeque<(usize, T)> = tasks.into_iter().enumerate().collect();

    let (tx, rx) = mpsc::channel::<(usize, std::result::Result<R, String>)>();
    let mut running: HashMap<usize, std::thread::JoinHandle<()>> = HashMap::new();

    loop {
        while running.len() < limit && !cancel.is_cancelled() {
            let Some((idx, task)) = ready.pop_front() else {
                break;
            };
            let tx = tx.clone();
            let work = Arc::clone(&work);
            let handle = std::thread::spawn(move || {
                let r = catch_unwind(AssertUnwindSafe(|| (*work)(task))).map_err(panic_message);
                let _ = tx.send((idx, r));
            });
            running.insert(idx, handle);
        }

        if running.is_empty() {
            break;
        }

        let Ok((idx, res)) = rx.recv() else {
            break;
        };
        if let Some(h) = running.remove(&idx) {
            let _ = h.join();
        }
        slots[idx] = match res {
            Ok(r) => Slot::Finished(r),
            Err(msg) => {
                error!(pool = name, task = idx, panic = %msg, "transfer worker panicked");
                Slot::Panicked(msg)
            }
        };
    }

    if !ready.is_empty() {
        debug!(pool = name, skipped = ready.len(), "pool stopped before dispatching every task");
    }
    slots
}

pub(crate) fn panic_message(p: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
