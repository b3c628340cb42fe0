//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] and [`Task::spawn_blocking`] functions.
///
/// By default, dropping this handle cancels the task (unless [`Task::detach`]
/// is used).
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle which can be used to manipulate the timeout task created by the
/// [`TimeoutTask::new`] function.
///
/// Dropping this handle cancels the timeout task.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
    control: UnboundedSender<Duration>,
    timeout: Duration,
}

/// A handle which can be used to manipulate the interval task created by the
/// [`IntervalTask::new`] function.
///
/// Dropping this handle cancels the interval task.
#[derive(Debug)]
pub struct IntervalTask {
    _task: Task<()>,
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future.in_current_span()),
            detached: false,
        }
    }

    /// Runs the provided closure on a thread where blocking is acceptable.
    pub fn spawn_blocking<F>(f: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn_blocking(f),
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle is
    /// dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a new task that will call the provided async closure when the
    /// specified timeout expires.
    ///
    /// Returns a handle that can be used to reset the timeout.
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(async move {
            let sleep = time::sleep(timeout);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    // Timeout has expired.
                    _ = &mut sleep => {
                        (cb)().await;
                        break;
                    }
                    message = control_rx.recv() => {
                        match message {
                            // Timeout has been refreshed/updated.
                            Some(timeout) => {
                                sleep.as_mut().reset(Instant::now() + timeout);
                            }
                            // Timeout has been aborted.
                            None => break,
                        }
                    }
                }
            }
        });

        TimeoutTask {
            _task: task,
            control: control_tx,
            timeout,
        }
    }

    /// Resets the timeout, regardless if it has already expired or not.
    ///
    /// If a new timeout value isn't specified, the original value is reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(self.timeout);
        if self.control.send(timeout).is_err() {
            error!("failed to reset timeout");
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a new task that will call the provided async closure whenever
    /// the specified interval timer ticks.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = Task::spawn(async move {
            let mut ticker = if tick_on_start {
                time::interval(interval)
            } else {
                time::interval_at(Instant::now() + interval, interval)
            };

            loop {
                ticker.tick().await;
                (cb)().await;
            }
        });

        IntervalTask { _task: task }
    }
}
