//! FIFO worker thread pool.
//!
//! A fixed set of threads pop tasks from a shared FIFO queue, release
//! the lock *before* running the task, and reacquire it before the
//! next dequeue — load-bearing to avoid deadlock when a task submits
//! more work or touches a structure another worker holds the lock on.
//! `crossbeam_channel` gives this release-before-run behavior for
//! free: a channel receiver's internal lock is not held while the
//! popped closure executes.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

/// A unit of work submitted to the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size set of worker threads serving a shared FIFO task queue.
pub struct WorkerPool {
    sender: Sender<Task>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_count` worker threads. `thread_count` must be
    /// greater than zero.
    pub fn new(thread_count: usize) -> Self {
        assert!(thread_count > 0, "worker pool requires at least one thread");

        // Effectively unbounded; a large bound avoids an unreachable
        // allocation ceiling while still giving `submit` a sane
        // back-pressure signal if the reactor ever wildly outpaces the
        // workers.
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = bounded(1 << 20);

        let handles = (0..thread_count)
            .map(|idx| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("reactor-worker-{idx}"))
                    .spawn(move || {
                        // `recv` blocks until a task is available or every
                        // sender (including the pool's own) is dropped,
                        // which is how shutdown drains the workers: no
                        // task is ever pulled off the queue while holding
                        // a lock shared with another worker.
                        while let Ok(task) = receiver.recv() {
                            task();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool { sender, handles }
    }

    /// Appends `task` to the FIFO queue and wakes one worker. Submissions
    /// are observed in FIFO order; which worker dequeues a given task is
    /// unspecified.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        // Disconnection only happens after `shutdown` drops every
        // receiver, at which point there is nothing useful to do with a
        // late submission.
        let _ = self.sender.send(Box::new(task));
    }

    /// Signals shutdown and blocks until every worker has drained its
    /// current task and exited. Pending (not yet started) tasks are
    /// discarded; a task already running is allowed to finish.
    pub fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        // give workers a moment to drain; shutdown below also joins.
        thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn a_task_can_submit_more_work_without_deadlock() {
        let pool = Arc::new(WorkerPool::new(2));
        let counter = Arc::new(AtomicUsize::new(0));

        let pool2 = pool.clone();
        let c2 = counter.clone();
        pool.submit(move || {
            c2.fetch_add(1, Ordering::SeqCst);
            // Resubmitting from within a running task must not deadlock,
            // which it would if the worker held its queue lock while
            // running this outer closure.
            let c3 = c2.clone();
            pool2.submit(move || {
                c3.fetch_add(1, Ordering::SeqCst);
            });
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
