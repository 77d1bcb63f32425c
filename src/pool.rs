use crate::{Error, Result};
use log::info;
use rayon::prelude::*;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct PoolState {
    pool: Option<Arc<rayon::ThreadPool>>,
    n_in_flight: usize,
}

/// A fixed-size set of long-lived worker threads shared by all callers.
///
/// Batches submitted concurrently from different threads are interleaved by the underlying
/// work-stealing scheduler; each caller blocks only on its own batch.
pub struct WorkerPool {
    n_workers: usize,
    state: Mutex<PoolState>,
    idle: Condvar,
}

/// Marks a batch as in flight until dropped.
struct InFlight<'a>(&'a WorkerPool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock_state();
        state.n_in_flight -= 1;
        if state.n_in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl WorkerPool {
    pub fn new(n_workers: usize) -> Result<Self> {
        if n_workers == 0 {
            return Err(Error::InvalidArgument(
                "worker count must be at least 1".to_owned(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .stack_size(32 * 1024 * 1024)
            .thread_name(|i| format!("omikuji-worker-{}", i))
            .build()?;
        info!("Started worker pool with {} threads", n_workers);

        Ok(Self {
            n_workers,
            state: Mutex::new(PoolState {
                pool: Some(Arc::new(pool)),
                n_in_flight: 0,
            }),
            idle: Condvar::new(),
        })
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().pool.is_none()
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        // The state is two plain fields that are never left half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` on every task in parallel and block until all are done.
    ///
    /// Results are returned in task order.
    pub fn submit<T, R, F>(&self, tasks: &[T], op: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        let pool = {
            let mut state = self.lock_state();
            let pool = state.pool.clone().ok_or(Error::PoolClosed)?;
            state.n_in_flight += 1;
            pool
        };
        let _in_flight = InFlight(self);

        Ok(pool.install(|| tasks.par_iter().map(op).collect()))
    }

    /// Stop accepting batches, wait for in-flight ones to finish, then release the workers.
    ///
    /// Calling this more than once is harmless.
    pub fn close(&self) {
        let mut state = self.lock_state();
        let pool = state.pool.take();
        while state.n_in_flight > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(state);

        if pool.is_some() {
            drop(pool);
            info!("Closed worker pool with {} threads", self.n_workers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_submit_preserves_task_order() {
        let pool = WorkerPool::new(4).unwrap();
        let tasks = (0..1000u64).collect::<Vec<_>>();
        let results = pool.submit(&tasks, |&x| x * x).unwrap();
        assert_eq!(tasks.iter().map(|x| x * x).collect::<Vec<_>>(), results);
    }

    #[test]
    fn test_tasks_run_on_pool_threads() {
        let pool = WorkerPool::new(3).unwrap();
        let indices = pool
            .submit(&[(); 64], |_| rayon::current_thread_index())
            .unwrap();
        assert!(indices.iter().all(|i| matches!(i, Some(i) if *i < 3)));
    }

    #[test]
    fn test_empty_batch() {
        let pool = WorkerPool::new(1).unwrap();
        let results = pool.submit(&Vec::<u32>::new(), |&x| x).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_workers() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let pool = WorkerPool::new(2).unwrap();
        assert!(!pool.is_closed());
        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(
            pool.submit(&[1, 2, 3], |&x| x),
            Err(Error::PoolClosed)
        ));
    }

    #[test]
    fn test_close_waits_for_in_flight_batch() {
        let pool = WorkerPool::new(2).unwrap();
        let started = AtomicBool::new(false);
        let n_done = AtomicUsize::new(0);

        thread::scope(|s| {
            let submitter = s.spawn(|| {
                pool.submit(&[0; 8], |_| {
                    started.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    n_done.fetch_add(1, Ordering::SeqCst);
                })
            });

            while !started.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            pool.close();
            assert_eq!(8, n_done.load(Ordering::SeqCst));
            assert!(submitter.join().unwrap().is_ok());
        });
    }
}
