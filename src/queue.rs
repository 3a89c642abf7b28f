// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Per-stream worker queues
//
// Each queue owns one thread and the state it writes to. Producers hand it
// closures; the worker runs them one at a time in submission order.

use crate::error::{RecorderError, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Single-consumer work queue backed by one dedicated worker thread.
///
/// The worker owns a stream state `S` and hands it by `&mut` to every job, in
/// submission order, one job at a time. Enqueueing never blocks: the queue is
/// unbounded, so a worker that cannot keep up grows memory instead of
/// stalling the producer. [`pending`](Self::pending) exposes the backlog and
/// an optional warn depth logs when it gets large.
///
/// Dropping the queue (or calling [`finish`](Self::finish)) stops accepting
/// work, runs everything already queued and joins the worker.
pub struct TaskQueue<S> {
    name: String,
    sender: Option<Sender<Job<S>>>,
    worker: Option<JoinHandle<S>>,
    pending: Arc<AtomicUsize>,
    warn_depth: Option<usize>,
    backlog_warned: AtomicBool,
}

impl<S: Send + 'static> TaskQueue<S> {
    /// Spawn the worker thread for a new queue.
    pub fn create_worker(name: impl Into<String>, state: S) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job<S>>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_name = name.clone();
        let worker_pending = Arc::clone(&pending);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(worker_name, state, receiver, worker_pending))
            .map_err(|source| RecorderError::WorkerSpawn {
                name: name.clone(),
                source,
            })?;

        debug!(queue = %name, "Task queue worker started");

        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            pending,
            warn_depth: None,
            backlog_warned: AtomicBool::new(false),
        })
    }

    /// Log a warning whenever the backlog grows past `depth` jobs.
    pub fn with_warn_depth(mut self, depth: usize) -> Self {
        self.warn_depth = Some(depth);
        self
    }

    /// Append a job. Returns immediately regardless of queue depth.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            warn!(queue = %self.name, "Task queue already closed, discarding job");
            return;
        };

        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if sender.send(Box::new(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(queue = %self.name, "Task queue worker is gone, discarding job");
            return;
        }
        self.check_backlog(depth);
    }

    /// Close the queue, run every pending job and return the worker's state.
    pub fn finish(mut self) -> Result<S> {
        self.sender.take();
        let worker = self
            .worker
            .take()
            .ok_or_else(|| RecorderError::WorkerFailed(self.name.clone()))?;
        worker
            .join()
            .map_err(|_| RecorderError::WorkerFailed(self.name.clone()))
    }
}

impl<S> TaskQueue<S> {
    /// Jobs enqueued but not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_backlog(&self, depth: usize) {
        let Some(limit) = self.warn_depth else {
            return;
        };
        if depth > limit {
            if !self.backlog_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    queue = %self.name,
                    depth,
                    limit,
                    "Task queue backlog exceeds warn depth, worker is not keeping up"
                );
            }
        } else if depth <= limit / 2 {
            self.backlog_warned.store(false, Ordering::Relaxed);
        }
    }
}

impl<S> Drop for TaskQueue<S> {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(queue = %self.name, "Task queue worker terminated abnormally");
            }
        }
    }
}

fn run_worker<S>(
    name: String,
    mut state: S,
    receiver: Receiver<Job<S>>,
    pending: Arc<AtomicUsize>,
) -> S {
    for job in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))).is_err() {
            error!(queue = %name, "Task panicked, continuing with the next one");
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    debug!(queue = %name, "Task queue drained, worker exiting");
    state
}
