//! Completion delivery for work run on background workers.
//!
//! The thread that owns an [`EventLoop`] is the caller thread: every
//! completion callback runs there, when the loop is driven. Work itself runs
//! on the blocking pool from [`crate::async_bridge`], one
//! [`SerialQueue`] lane per connection.

pub mod queue;

pub use queue::{submit, SerialQueue};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub(crate) type Completion = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    keepalive: AtomicUsize,
}

/// Receiving side of the completion channel.
pub struct EventLoop {
    rx: UnboundedReceiver<Completion>,
    dispatcher: Dispatcher,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            dispatcher: Dispatcher {
                tx,
                counters: Arc::new(Counters::default()),
            },
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Tasks submitted whose completion has not run yet.
    pub fn pending_tasks(&self) -> usize {
        self.dispatcher.counters.pending.load(Ordering::SeqCst)
    }

    /// Open keepalive registrations (one per open connection).
    pub fn active_handles(&self) -> usize {
        self.dispatcher.counters.keepalive.load(Ordering::SeqCst)
    }

    /// Runs completions until no task is pending. Returns how many ran.
    ///
    /// A panic raised by a completion callback propagates out of this call.
    pub fn run(&mut self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }

    /// Blocks for the next completion and runs it. Returns `false` without
    /// blocking when nothing is pending.
    pub fn run_once(&mut self) -> bool {
        if self.pending_tasks() == 0 {
            return false;
        }
        match self.rx.blocking_recv() {
            Some(completion) => {
                self.execute(completion);
                true
            }
            None => false,
        }
    }

    /// Runs every completion that is already queued, without blocking.
    pub fn poll(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.rx.try_recv() {
            self.execute(completion);
            ran += 1;
        }
        ran
    }

    fn execute(&self, completion: Completion) {
        self.dispatcher.counters.pending.fetch_sub(1, Ordering::SeqCst);
        completion();
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending side: hands completions back to the loop thread.
#[derive(Clone)]
pub struct Dispatcher {
    tx: UnboundedSender<Completion>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub(crate) fn begin_task(&self) -> TaskTicket {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        TaskTicket {
            dispatcher: self.clone(),
            sent: false,
        }
    }

    pub fn keep_alive(&self) -> KeepAlive {
        self.counters.keepalive.fetch_add(1, Ordering::SeqCst);
        KeepAlive {
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn active_handles(&self) -> usize {
        self.counters.keepalive.load(Ordering::SeqCst)
    }
}

/// One submitted task's claim on a completion slot. Completing sends the
/// completion to the loop; dropping it unsent releases the slot.
pub(crate) struct TaskTicket {
    dispatcher: Dispatcher,
    sent: bool,
}

impl TaskTicket {
    pub(crate) fn complete(mut self, completion: Completion) {
        if self.dispatcher.tx.send(completion).is_ok() {
            self.sent = true;
        } else {
            log::warn!("Event loop is gone; dropping task completion");
        }
    }
}

impl Drop for TaskTicket {
    fn drop(&mut self) {
        if !self.sent {
            self.dispatcher
                .counters
                .pending
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Keeps the loop's active-handle count raised until dropped.
#[derive(Debug)]
pub struct KeepAlive {
    counters: Arc<Counters>,
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.counters.keepalive.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_nothing_pending_returns_immediately() {
        let mut event_loop = EventLoop::new();
        assert_eq!(event_loop.run(), 0);
        assert!(!event_loop.run_once());
    }

    #[test]
    fn test_keep_alive_counts() {
        let event_loop = EventLoop::new();
        let dispatcher = event_loop.dispatcher();
        let a = dispatcher.keep_alive();
        let b = dispatcher.keep_alive();
        assert_eq!(event_loop.active_handles(), 2);
        drop(a);
        assert_eq!(event_loop.active_handles(), 1);
        drop(b);
        assert_eq!(event_loop.active_handles(), 0);
    }

    #[test]
    fn test_completion_runs_on_loop_thread() {
        let mut event_loop = EventLoop::new();
        let ticket = event_loop.dispatcher().begin_task();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            ticket.complete(Box::new(move || {
                let _ = tx.send(std::thread::current().id());
            }));
        });
        assert_eq!(event_loop.run(), 1);
        assert_eq!(rx.recv().unwrap(), std::thread::current().id());
        assert_eq!(event_loop.pending_tasks(), 0);
    }

    #[test]
    fn test_dropped_ticket_releases_pending_slot() {
        let mut event_loop = EventLoop::new();
        let ticket = event_loop.dispatcher().begin_task();
        assert_eq!(event_loop.pending_tasks(), 1);
        drop(ticket);
        assert_eq!(event_loop.pending_tasks(), 0);
        assert_eq!(event_loop.run(), 0);
    }

    #[test]
    fn test_poll_does_not_block() {
        let mut event_loop = EventLoop::new();
        let _ticket = event_loop.dispatcher().begin_task();
        assert_eq!(event_loop.poll(), 0);
    }
}
