//! Fixed-slot job dispatcher.
//!
//! `W` scoped worker threads drain a shared job queue; a worker picks the next
//! job as soon as its current one finishes. The call returns after every job
//! has run and every worker has been joined. A panicking job propagates out of
//! [`dispatch`] once the remaining workers have drained the queue.

use std::thread;

use parking_lot::Mutex;

/// Run `jobs` on at most `workers` threads; results are returned in job order.
///
/// `workers == 0` is treated as 1. Jobs may borrow from the caller's stack
/// and may block on each other (used by producer/consumer pairs), provided
/// `workers` is large enough to run all mutually dependent jobs at once.
pub fn dispatch<J, R>(jobs: Vec<J>, workers: usize) -> Vec<R>
where
    J: FnOnce() -> R + Send,
    R: Send,
{
    let n_jobs = jobs.len();
    if n_jobs == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, n_jobs);

    let queue = Mutex::new(jobs.into_iter().enumerate());
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..n_jobs).map(|_| None).collect());

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                let next = queue.lock().next();
                let Some((index, job)) = next else {
                    break;
                };
                let result = job();
                results.lock()[index] = Some(result);
            });
        }
    });

    results.into_inner().into_iter().flatten().collect()
}
