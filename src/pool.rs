//! Fixed-size worker pool for offloaded destructors.
//!
//! Producers push onto a mutex-guarded deque and signal one waiter; workers
//! pop from the front and run the job. Jobs must only touch data that is
//! already unlinked from every loop-thread structure; the pool neither owns
//! nor cancels work.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

type Work = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Work>,
    shutdown: bool,
}

pub struct ThreadPool {
    workers: Vec<thread::JoinHandle<()>>,
    shared: Arc<(Mutex<PoolState>, Condvar)>,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0);
        let shared = Arc::new((
            Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let workers = (0..num_threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || loop {
                    let job = {
                        let (lock, non_empty) = &*shared;
                        let mut state = lock.lock().unwrap();
                        loop {
                            if let Some(job) = state.queue.pop_front() {
                                break Some(job);
                            }
                            if state.shutdown {
                                break None;
                            }
                            state = non_empty.wait(state).unwrap();
                        }
                    };
                    match job {
                        Some(job) => job(),
                        None => return,
                    }
                })
            })
            .collect();

        Self { workers, shared }
    }

    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (lock, non_empty) = &*self.shared;
        lock.lock().unwrap().queue.push_back(Box::new(job));
        non_empty.notify_one();
    }
}

impl Drop for ThreadPool {
    // Drain the queue, then stop the workers.
    fn drop(&mut self) {
        let (lock, non_empty) = &*self.shared;
        lock.lock().unwrap().shutdown = true;
        non_empty.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (lock, _) = &*self.shared;
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.workers.len())
            .field("queue_len", &lock.lock().unwrap().queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_job() {
        let done = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(4);
            for _ in 0..100 {
                let done = Arc::clone(&done);
                pool.submit(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
            // drop joins the workers after the queue drains
        }
        assert_eq!(done.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn drops_moved_containers() {
        let pool = ThreadPool::new(2);
        let big: Vec<Vec<u8>> = (0..1000).map(|i| vec![i as u8; 16]).collect();
        pool.submit(move || drop(big));
    }
}
