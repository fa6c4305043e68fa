//! Worker threads for coding independent streams in parallel.
//!
//! A [`Worker`] owns at most one background thread and runs one hook at a
//! time on it. The lifecycle is `reset` (start the thread), any number of
//! `launch`/`sync` pairs, then `end`. [`WorkerInterface::Inline`] runs hooks
//! on the calling thread instead, for environments without threads.
//!
//! Hooks report failure by returning `false`; `sync` surfaces that as its
//! own return value and clears it only on the next `reset`.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Unit of work run by a worker. Returns `false` on failure.
pub type Hook = Box<dyn FnMut() -> bool + Send + 'static>;

/// Lifecycle state of a [`Worker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Not started, or ended.
    NotOk,
    /// Ready for a hook.
    Ok,
    /// Running a hook.
    Work,
}

/// How workers execute their hooks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkerInterface {
    /// One OS thread per worker.
    #[default]
    Threaded,
    /// `launch` runs the hook immediately on the caller's thread.
    Inline,
}

/// Pool configuration, fixed for the pool's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of workers.
    pub threads: usize,
    /// Execution strategy shared by every worker.
    pub interface: WorkerInterface,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            interface: WorkerInterface::Threaded,
        }
    }
}

struct WorkerThread {
    jobs: Sender<Hook>,
    done: Receiver<(Hook, bool)>,
    handle: JoinHandle<()>,
}

/// A single worker.
pub struct Worker {
    id: usize,
    interface: WorkerInterface,
    status: WorkerStatus,
    hook: Option<Hook>,
    had_error: bool,
    thread: Option<WorkerThread>,
}

impl Worker {
    /// Creates an idle worker in [`WorkerStatus::NotOk`].
    pub fn new(id: usize, interface: WorkerInterface) -> Self {
        Self {
            id,
            interface,
            status: WorkerStatus::NotOk,
            hook: None,
            had_error: false,
            thread: None,
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Installs the hook run by the next `launch` or `execute`.
    pub fn set_hook(&mut self, hook: Hook) {
        self.hook = Some(hook);
    }

    /// Makes the worker ready, starting its thread if needed, and clears any
    /// recorded failure.
    ///
    /// # Errors
    /// Returns `Error::Io` if the thread cannot be spawned.
    pub fn reset(&mut self) -> Result<()> {
        self.sync();
        self.had_error = false;
        if self.status == WorkerStatus::NotOk {
            if self.interface == WorkerInterface::Threaded {
                self.thread = Some(self.spawn()?);
            }
            self.status = WorkerStatus::Ok;
            debug!(worker = self.id, interface = ?self.interface, "worker ready");
        }
        Ok(())
    }

    fn spawn(&self) -> Result<WorkerThread> {
        let (jobs, job_rx) = bounded::<Hook>(1);
        let (done_tx, done) = bounded::<(Hook, bool)>(1);
        let handle = thread::Builder::new()
            .name(format!("entcode-worker-{}", self.id))
            .spawn(move || {
                while let Ok(mut hook) = job_rx.recv() {
                    let ok = hook();
                    if done_tx.send((hook, ok)).is_err() {
                        break;
                    }
                }
            })?;
        Ok(WorkerThread { jobs, done, handle })
    }

    /// Starts the installed hook. On threaded workers this returns
    /// immediately; call [`Worker::sync`] to wait for it.
    pub fn launch(&mut self) {
        if self.status != WorkerStatus::Ok {
            return;
        }
        let Some(jobs) = self.thread.as_ref().map(|t| t.jobs.clone()) else {
            self.execute();
            return;
        };
        let Some(hook) = self.hook.take() else {
            return;
        };
        match jobs.send(hook) {
            Ok(()) => self.status = WorkerStatus::Work,
            Err(e) => {
                // Thread is gone; keep the hook and record the failure.
                self.hook = Some(e.into_inner());
                self.had_error = true;
                warn!(worker = self.id, "worker thread unavailable");
            }
        }
    }

    /// Runs the installed hook on the calling thread.
    pub fn execute(&mut self) {
        if let Some(hook) = self.hook.as_mut() {
            if !hook() {
                self.had_error = true;
                warn!(worker = self.id, "worker hook failed");
            }
        }
    }

    /// Waits for a launched hook to finish. Returns `false` if any hook since
    /// the last `reset` failed.
    pub fn sync(&mut self) -> bool {
        if self.status == WorkerStatus::Work {
            let result = self.thread.as_ref().map(|t| t.done.recv());
            match result {
                Some(Ok((hook, ok))) => {
                    self.hook = Some(hook);
                    if !ok {
                        self.had_error = true;
                        warn!(worker = self.id, "worker hook failed");
                    }
                }
                _ => {
                    self.had_error = true;
                    warn!(worker = self.id, "worker thread died during hook");
                }
            }
            self.status = WorkerStatus::Ok;
        }
        !self.had_error
    }

    /// Waits for any running hook and stops the thread.
    pub fn end(&mut self) {
        if self.status == WorkerStatus::NotOk {
            return;
        }
        self.sync();
        if let Some(t) = self.thread.take() {
            drop(t.jobs);
            if t.handle.join().is_err() {
                warn!(worker = self.id, "worker thread panicked");
            }
        }
        self.status = WorkerStatus::NotOk;
        debug!(worker = self.id, "worker ended");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.end();
    }
}

/// A fixed set of workers sharing one [`WorkerConfig`].
pub struct WorkerPool {
    workers: Vec<Worker>,
    config: WorkerConfig,
}

impl WorkerPool {
    /// Creates and resets `config.threads` workers (at least one).
    ///
    /// # Errors
    /// Returns `Error::Io` if a worker thread cannot be spawned.
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let count = config.threads.max(1);
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let mut w = Worker::new(id, config.interface);
            w.reset()?;
            workers.push(w);
        }
        debug!(workers = count, interface = ?config.interface, "worker pool started");
        Ok(Self { workers, config })
    }

    /// The configuration the pool was built with.
    pub fn config(&self) -> WorkerConfig {
        self.config
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Always false; a pool has at least one worker.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Runs every job, at most one per worker at a time, and returns their
    /// results in job order. A job fails by returning `None`.
    ///
    /// # Errors
    /// Returns `Error::WorkerFailed` with the index of the first failed job.
    /// Workers are reset afterwards either way, so the pool stays usable.
    pub fn run<T, F>(&mut self, jobs: Vec<F>) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        let total = jobs.len();
        let mut results = Vec::with_capacity(total);
        let mut failed = None;
        let mut jobs = jobs.into_iter().enumerate().peekable();

        while jobs.peek().is_some() {
            let (tx, rx) = bounded::<(usize, T)>(self.workers.len());
            let mut launched = Vec::with_capacity(self.workers.len());
            for worker in self.workers.iter_mut() {
                let Some((index, job)) = jobs.next() else {
                    break;
                };
                let tx = tx.clone();
                let mut job = Some(job);
                worker.set_hook(Box::new(move || match job.take().and_then(|f| f()) {
                    Some(value) => tx.send((index, value)).is_ok(),
                    None => false,
                }));
                worker.launch();
                launched.push(index);
            }
            drop(tx);

            for (worker, index) in self.workers.iter_mut().zip(launched) {
                if !worker.sync() && failed.is_none() {
                    failed = Some(index);
                }
                worker.reset()?;
            }

            let mut batch: Vec<(usize, T)> = rx.try_iter().collect();
            batch.sort_unstable_by_key(|(index, _)| *index);
            results.extend(batch.into_iter().map(|(_, value)| value));
        }

        match failed {
            Some(index) => {
                warn!(job = index, jobs = total, "tile job failed");
                Err(Error::WorkerFailed(index))
            }
            None => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_worker_lifecycle() {
        let mut w = Worker::new(0, WorkerInterface::Threaded);
        assert_eq!(w.status(), WorkerStatus::NotOk);
        w.reset().unwrap();
        assert_eq!(w.status(), WorkerStatus::Ok);

        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        w.set_hook(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        }));
        w.launch();
        assert!(w.sync());
        w.launch();
        assert!(w.sync());
        w.execute();
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        w.end();
        assert_eq!(w.status(), WorkerStatus::NotOk);
    }

    #[test]
    fn test_failure_sticks_until_reset() {
        for interface in [WorkerInterface::Threaded, WorkerInterface::Inline] {
            let mut w = Worker::new(1, interface);
            w.reset().unwrap();
            w.set_hook(Box::new(|| false));
            w.launch();
            assert!(!w.sync());
            w.set_hook(Box::new(|| true));
            w.launch();
            assert!(!w.sync());
            w.reset().unwrap();
            assert!(w.sync());
        }
    }

    #[test]
    fn test_inline_launch_runs_immediately() {
        let mut w = Worker::new(2, WorkerInterface::Inline);
        w.reset().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        w.set_hook(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        }));
        w.launch();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(w.status(), WorkerStatus::Ok);
        assert!(w.sync());
    }

    #[test]
    fn test_pool_keeps_config_and_has_a_worker() {
        let config = WorkerConfig {
            threads: 0,
            interface: WorkerInterface::Inline,
        };
        let pool = WorkerPool::new(config).unwrap();
        assert_eq!(pool.config(), config);
        assert_eq!(pool.len(), 1);
        assert!(!pool.is_empty());
    }

    #[test]
    fn test_pool_preserves_job_order() {
        let mut pool = WorkerPool::new(WorkerConfig {
            threads: 3,
            interface: WorkerInterface::Threaded,
        })
        .unwrap();
        // Later jobs finish first within a batch.
        let jobs: Vec<_> = (0..10usize)
            .map(|i| {
                move || {
                    thread::sleep(std::time::Duration::from_millis(((10 - i) % 3) as u64 * 5));
                    Some(i * i)
                }
            })
            .collect();
        let out = pool.run(jobs).unwrap();
        assert_eq!(out, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_reports_failed_job_and_recovers() {
        let mut pool = WorkerPool::new(WorkerConfig {
            threads: 2,
            interface: WorkerInterface::Inline,
        })
        .unwrap();
        let jobs: Vec<_> = (0..5usize)
            .map(|i| move || if i == 3 { None } else { Some(i) })
            .collect();
        assert!(matches!(pool.run(jobs), Err(Error::WorkerFailed(3))));

        let jobs: Vec<_> = (0..2usize).map(|i| move || Some(i)).collect();
        assert_eq!(pool.run(jobs).unwrap(), vec![0, 1]);
    }
}
