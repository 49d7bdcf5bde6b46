// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A task queue served by a fixed number of worker threads.

use std::{
    any::Any,
    ops::ControlFlow,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use crossbeam_channel::unbounded;

/// What came out of [`WorkerPool::run`].
#[derive(Debug)]
pub struct Completion<R> {
    /// In order of completion, not of submission
    pub results: Vec<R>,
    /// Whether the run was stopped before all tasks were processed
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    n_workers: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

impl WorkerPool {
    /// A pool of `n_workers` threads; at least one.
    #[must_use]
    pub fn new(n_workers: usize) -> Self {
        Self {
            n_workers: n_workers.max(1),
        }
    }

    #[must_use]
    pub const fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Processes all `tasks` with `work`,
    /// handing each result to `sink` on the calling thread as soon as it arrives.
    ///
    /// If `work` panics, the task and the panic message go to `recover`,
    /// which makes the result for that task; the other tasks carry on.
    /// Once `sink` breaks, no further tasks are started;
    /// tasks already running still hand their results to `sink`.
    ///
    /// Returns whether the run was stopped early.
    pub fn run_each<T, R, F, P, S>(&self, tasks: Vec<T>, work: F, recover: P, mut sink: S) -> bool
    where
        T: Send,
        R: Send,
        F: Fn(&T) -> R + Sync,
        P: Fn(T, &str) -> R + Sync,
        S: FnMut(R) -> ControlFlow<()>,
    {
        let n_tasks = tasks.len();
        let (task_sender, task_receiver) = unbounded::<T>();
        let (result_sender, result_receiver) = unbounded::<R>();
        for task in tasks {
            if task_sender.send(task).is_err() {
                break;
            }
        }
        drop(task_sender);
        let cancelled = AtomicBool::new(false);
        let n_workers = self.n_workers.min(n_tasks.max(1));
        tracing::debug!("Processing {n_tasks} tasks with {n_workers} worker(s) ...");

        thread::scope(|scope| {
            for _ in 0..n_workers {
                let task_receiver = task_receiver.clone();
                let result_sender = result_sender.clone();
                let work = &work;
                let recover = &recover;
                let cancelled = &cancelled;
                scope.spawn(move || {
                    while let Ok(task) = task_receiver.recv() {
                        if cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        let result = match panic::catch_unwind(AssertUnwindSafe(|| work(&task))) {
                            Ok(result) => result,
                            Err(payload) => {
                                let message = panic_message(&*payload);
                                tracing::error!("A task panicked: {message}");
                                recover(task, &message)
                            }
                        };
                        if result_sender.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_sender);
            let mut n_results = 0_usize;
            for result in &result_receiver {
                n_results += 1;
                let flow = sink(result);
                if flow.is_break() && !cancelled.load(Ordering::SeqCst) {
                    tracing::debug!("Stopping after {n_results} result(s)");
                    cancelled.store(true, Ordering::SeqCst);
                }
            }
        });

        cancelled.load(Ordering::SeqCst)
    }

    /// Processes all `tasks` with `work`, collecting the results.
    ///
    /// As soon as `stop` returns `true` for a result,
    /// no further tasks are started.
    /// See [`Self::run_each`] for how panics are handled.
    pub fn run<T, R, F, P, S>(&self, tasks: Vec<T>, work: F, recover: P, mut stop: S) -> Completion<R>
    where
        T: Send,
        R: Send,
        F: Fn(&T) -> R + Sync,
        P: Fn(T, &str) -> R + Sync,
        S: FnMut(&R) -> bool,
    {
        let mut results = Vec::with_capacity(tasks.len());
        let stopped = self.run_each(tasks, work, recover, |result| {
            let flow = if stop(&result) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            };
            results.push(result);
            flow
        });
        Completion { results, stopped }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn no_panic<T>(_task: T, message: &str) -> u32 {
        panic!("unexpected panic: {message}")
    }

    #[test]
    fn test_all_tasks_run() {
        let pool = WorkerPool::new(4);
        let mut completion = pool.run((0..100).collect(), |num: &u32| num * 2, no_panic, |_| false);
        completion.results.sort_unstable();
        assert_eq!(completion.results, (0..100).map(|num| num * 2).collect::<Vec<_>>());
        assert!(!completion.stopped);
    }

    #[test]
    fn test_stop_early() {
        let pool = WorkerPool::new(1);
        let work = |num: &u32| {
            thread::sleep(std::time::Duration::from_millis(2));
            *num
        };
        let completion = pool.run((0..200).collect(), work, no_panic, |num| *num == 3);
        assert!(completion.stopped);
        assert!(completion.results.contains(&3));
        assert!(completion.results.len() < 200);
    }

    #[test]
    fn test_zero_workers_means_one() {
        assert_eq!(WorkerPool::new(0).n_workers(), 1);
        let completion = WorkerPool::new(0).run(
            vec!["a"],
            |text: &&str| text.len(),
            |_, _| 0,
            |_| false,
        );
        assert_eq!(completion.results, vec![1]);
    }

    #[test]
    fn test_no_tasks() {
        let completion = WorkerPool::new(3).run(Vec::<u8>::new(), |num| *num, |num, _| num, |_| true);
        assert!(completion.results.is_empty());
        assert!(!completion.stopped);
    }

    #[test]
    fn test_panicking_task_is_recovered() {
        let pool = WorkerPool::new(2);
        let work = |num: &u32| {
            assert!(*num != 7, "seven is broken");
            format!("ok {num}")
        };
        let mut completion = pool.run(
            (0..10).collect(),
            work,
            |num, message| format!("failed {num}: {message}"),
            |_| false,
        );
        completion.results.sort();
        assert_eq!(completion.results.len(), 10);
        assert!(!completion.stopped);
        assert!(completion
            .results
            .contains(&"failed 7: seven is broken".to_owned()));
        assert_eq!(
            completion
                .results
                .iter()
                .filter(|res| res.starts_with("ok "))
                .count(),
            9
        );
    }

    #[test]
    fn test_results_reach_sink_while_running() {
        // The last task only finishes once the sink saw all the others.
        let seen = Mutex::new(0_usize);
        let pool = WorkerPool::new(1);
        let work = |num: &usize| {
            if *num == 3 {
                let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
                while *seen.lock().unwrap() < 3 && std::time::Instant::now() < deadline {
                    thread::sleep(std::time::Duration::from_millis(1));
                }
                return *seen.lock().unwrap();
            }
            *num
        };
        let mut last = None;
        let stopped = pool.run_each(
            (0..4).collect(),
            work,
            |num, _| num,
            |result| {
                let mut count = seen.lock().unwrap();
                *count += 1;
                if *count == 4 {
                    last = Some(result);
                }
                ControlFlow::Continue(())
            },
        );
        assert!(!stopped);
        assert_eq!(last, Some(3));
    }
}
