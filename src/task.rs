// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Task queues for background jobs.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem::drop;
use std::sync::Arc;
use std::thread;

use log::error;
use parking_lot::{Condvar, Mutex};

/// A job submitted to a [`TaskQueue`].
type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO queue of background jobs.
///
/// A `TaskQueue` created with [`TaskQueue::start`] runs its jobs one at
/// a time on a dedicated worker thread. One created with
/// [`TaskQueue::manual`] has no worker; its jobs run when
/// [`TaskQueue::run_pending`] is called, on the calling thread. Jobs may
/// submit further jobs to the queue they run on.
///
/// After [`TaskQueue::shut_down`], new submissions are rejected. Jobs
/// already queued still run.
pub struct TaskQueue {
    name: String,
    records: Mutex<QueueRecords>,

    /// Allows the worker to wait for new jobs. Used with the `records`
    /// mutex.
    job_wakeup: Condvar,

    /// Allows callers to wait for the queue to drain. Used with the
    /// `records` mutex.
    idle_wakeup: Condvar,
}

/// The internal records of a [`TaskQueue`].
#[derive(Default)]
struct QueueRecords {
    queue: VecDeque<Job>,
    running: bool,
    shutting_down: bool,
}

impl TaskQueue {
    /// Creates a queue with a worker thread.
    pub fn start(name: Option<String>) -> Result<Arc<Self>, Error> {
        let name = name.unwrap_or_else(|| "anonymous task".to_owned());
        let queue = Self::new(name.clone());
        let worker = queue.clone();
        thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(worker))?;
        Ok(queue)
    }

    /// Creates a queue without a worker thread.
    pub fn manual() -> Arc<Self> {
        Self::new("manual task".to_owned())
    }

    fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            records: Mutex::new(QueueRecords::default()),
            job_wakeup: Condvar::new(),
            idle_wakeup: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submits a job.
    pub fn send<F>(&self, job: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut records = self.records.lock();
        if records.shutting_down {
            return Err(Error::ShuttingDown);
        }
        records.queue.push_back(Box::new(job));
        self.job_wakeup.notify_one();
        Ok(())
    }

    /// Runs queued jobs on the calling thread until the queue is empty,
    /// including any jobs those jobs submit. Returns the number of jobs
    /// run.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            let mut records = self.records.lock();
            let job = match records.queue.pop_front() {
                Some(job) => job,
                None => {
                    self.idle_wakeup.notify_all();
                    return count;
                }
            };
            records.running = true;
            drop(records);
            job();
            self.records.lock().running = false;
            count += 1;
        }
    }

    /// Returns the number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.records.lock().queue.len()
    }

    /// Waits until no job is queued or running.
    pub fn await_idle(&self) {
        let mut records = self.records.lock();
        self.idle_wakeup
            .wait_while(&mut records, |r| r.running || !r.queue.is_empty());
    }

    /// Shuts down the queue. The worker thread, if any, exits once the
    /// queued jobs have run.
    pub fn shut_down(&self) {
        let mut records = self.records.lock();
        records.shutting_down = true;
        self.job_wakeup.notify_all();
    }

    /// Returns whether the queue is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.records.lock().shutting_down
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ensures a panicking job does not leave the queue looking busy.
struct RunningGuard<'a>(&'a TaskQueue);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Job on task queue {} panicked", self.0.name);
        }
        let mut records = self.0.records.lock();
        records.running = false;
        if records.queue.is_empty() {
            self.0.idle_wakeup.notify_all();
        }
    }
}

/// The get job/run job loop of a worker thread.
fn worker_loop(queue: Arc<TaskQueue>) {
    loop {
        let mut records = queue.records.lock();
        loop {
            if !records.queue.is_empty() {
                break;
            } else if records.shutting_down {
                return;
            }
            queue.job_wakeup.wait(&mut records);
        }
        let job = match records.queue.pop_front() {
            Some(job) => job,
            None => continue,
        };
        records.running = true;
        drop(records);
        let _running = RunningGuard(&queue);
        job();
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error type for [`TaskQueue`] operations.
#[derive(Debug)]
pub enum Error {
    /// An OS-level error occurred during the creation of the worker
    /// thread.
    Io(io::Error),

    /// The [`TaskQueue`] is shutting down.
    ShuttingDown,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::ShuttingDown => f.write_str("task queue is shutting down"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_queue_runs_resubmitted_jobs() {
        let queue = TaskQueue::manual();
        let count = Arc::new(AtomicUsize::new(0));

        fn step(queue: Arc<TaskQueue>, count: Arc<AtomicUsize>) {
            if count.fetch_add(1, Ordering::SeqCst) < 4 {
                let next = queue.clone();
                queue.send(move || step(next, count)).unwrap();
            }
        }

        let (q, c) = (queue.clone(), count.clone());
        queue.send(move || step(q, c)).unwrap();
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.run_pending(), 5);
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn worker_runs_jobs_in_order() {
        let queue = TaskQueue::start(Some("test worker".to_owned())).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let seen = seen.clone();
            queue.send(move || seen.lock().push(i)).unwrap();
        }
        queue.await_idle();
        assert_eq!(*seen.lock(), (0..8).collect::<Vec<_>>());
        queue.shut_down();
    }

    #[test]
    fn queue_rejects_jobs_after_shutdown() {
        let queue = TaskQueue::manual();
        queue.shut_down();
        assert!(queue.is_shutting_down());
        assert!(matches!(queue.send(|| ()), Err(Error::ShuttingDown)));
    }
}
