//! One-file-per-worker fan-out.
//!
//! The engine owns no cross-file shared state, so parallelism is a plain
//! queue of independent jobs drained by a fixed set of threads. The first
//! failure trips the cancel token so sibling workers stop at their next
//! block boundary.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::Result;

/// Run `work` over every job on `n_threads` threads, collecting the outputs
/// (in no particular order). Returns the first error encountered.
pub fn run_jobs<J, R, F>(jobs: Vec<J>, n_threads: usize, cancel: &CancelToken, work: F) -> Result<Vec<R>>
where
    J: Send,
    R: Send,
    F: Fn(J) -> Result<R> + Sync,
{
    let n_threads = n_threads.max(1).min(jobs.len().max(1));
    let queue = Mutex::new(jobs.into_iter().collect::<VecDeque<J>>());
    let results = Mutex::new(Vec::new());
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..n_threads {
            scope.spawn(|| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let job = match queue.lock().pop_front() {
                    Some(job) => job,
                    None => break,
                };
                match work(job) {
                    Ok(result) => results.lock().push(result),
                    Err(err) => {
                        // Keep the first error, stop the rest of the fleet.
                        let mut slot = first_error.lock();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                        cancel.cancel();
                        break;
                    }
                }
            });
        }
    });

    if let Some(err) = first_error.into_inner() {
        return Err(err);
    }
    Ok(results.into_inner())
}
