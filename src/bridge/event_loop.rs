//! Single-threaded cooperative event loop.
//!
//! A current-thread tokio runtime plus a [`LocalSet`]. Tasks spawned here
//! (UI timers, backend transports, other I/O) make progress whenever
//! somebody drives the loop through [`EventLoop::run_until`], including
//! while the clipboard bridge is blocked in a nested wait.

use std::cell::Cell;
use std::future::Future;
use std::io;

use tokio::runtime::{Builder, Runtime};
use tokio::task::{JoinHandle, LocalSet};

/// The UI thread's scheduler. Share it as `Rc<EventLoop>`.
pub struct EventLoop {
    runtime: Runtime,
    local: LocalSet,
    running: Cell<bool>,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            local: LocalSet::new(),
            running: Cell::new(false),
        })
    }

    /// Schedule a task on the loop. It first runs the next time the loop
    /// is driven.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(future)
    }

    /// Drive the loop until `future` resolves and return its output.
    ///
    /// Tokio timers and sockets register with the runtime when they are
    /// created, so build them inside an `async` block rather than passing
    /// `tokio::time::sleep(..)` directly.
    ///
    /// # Panics
    ///
    /// If the loop is already being driven further up the stack. Tasks
    /// running on the loop must await instead of blocking.
    pub fn run_until<F: Future>(&self, future: F) -> F::Output {
        assert!(
            !self.running.get(),
            "EventLoop::run_until re-entered: the loop is already being driven, \
             await the async API from tasks running on the loop"
        );
        self.running.set(true);
        let _reset = RunningGuard(&self.running);
        self.runtime.block_on(self.local.run_until(future))
    }

    /// Whether some caller is currently driving the loop.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }
}

struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn spawned_tasks_progress_while_driven() {
        let event_loop = EventLoop::new().unwrap();
        let ticks = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&ticks);
        event_loop.spawn(async move {
            loop {
                counter.set(counter.get() + 1);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        assert_eq!(ticks.get(), 0, "nothing runs until the loop is driven");
        event_loop.run_until(async { tokio::time::sleep(Duration::from_millis(40)).await });
        assert!(ticks.get() >= 2, "ticker ran {} times", ticks.get());
    }

    #[test]
    fn run_until_returns_output() {
        let event_loop = EventLoop::new().unwrap();
        let value = event_loop.run_until(async { 7 });
        assert_eq!(value, 7);
        assert!(!event_loop.is_running());
    }

    #[test]
    fn tasks_survive_between_runs() {
        let event_loop = EventLoop::new().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        event_loop.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send("late");
        });

        // First run is too short for the task to finish.
        event_loop.run_until(async { tokio::time::sleep(Duration::from_millis(1)).await });
        assert_eq!(event_loop.run_until(rx).unwrap(), "late");
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn nested_run_panics() {
        let event_loop = Rc::new(EventLoop::new().unwrap());
        let inner = Rc::clone(&event_loop);
        event_loop.run_until(async move {
            inner.run_until(async {});
        });
    }
}
