use super::{Completion, Dispatcher};
use crate::async_bridge;
use crate::error::{OdbcError, Result};
use crate::observability::metrics::{Gauge, GaugeGuard};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Lane {
    running: bool,
    jobs: VecDeque<Job>,
}

/// A FIFO lane of blocking jobs. At most one job of a lane runs at a time,
/// in push order; separate lanes run in parallel on the worker pool.
#[derive(Clone, Default)]
pub struct SerialQueue {
    lane: Arc<Mutex<Lane>>,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting to start.
    pub fn len(&self) -> usize {
        self.lane.lock().map(|lane| lane.jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, job: Job) -> Result<()> {
        // Fail before queueing if the worker pool cannot be built.
        async_bridge::runtime()?;
        let start = {
            let mut lane = self
                .lane
                .lock()
                .map_err(|_| OdbcError::InternalError("Failed to lock task queue".to_string()))?;
            lane.jobs.push_back(job);
            !std::mem::replace(&mut lane.running, true)
        };
        if start {
            let queue = self.clone();
            async_bridge::spawn_blocking(move || queue.drain())?;
        }
        Ok(())
    }

    fn drain(&self) {
        loop {
            let job = match self.lane.lock() {
                Ok(mut lane) => match lane.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        lane.running = false;
                        return;
                    }
                },
                Err(_) => {
                    log::error!("Task queue lock poisoned; abandoning queued jobs");
                    return;
                }
            };
            job();
        }
    }
}

/// Queues `work` on `queue` and delivers its outcome through `dispatcher`.
///
/// On a worker: `work(&handle, &mut payload)`. Then, on the loop thread:
/// `settle(&handle, outcome)`, release of `handle`, `callback(settled)`, and
/// finally release of `payload`. The callback runs exactly once, including
/// when `work` panics (the panic becomes [`OdbcError::InternalError`]).
/// An `Err` return means nothing was queued and the callback will not run.
pub fn submit<H, P, T, R, W, S, C>(
    dispatcher: &Dispatcher,
    queue: &SerialQueue,
    handle: Arc<H>,
    payload: P,
    work: W,
    settle: S,
    callback: C,
) -> Result<()>
where
    H: Send + Sync + 'static,
    P: Send + 'static,
    T: Send + 'static,
    W: FnOnce(&H, &mut P) -> Result<T> + Send + 'static,
    S: FnOnce(&H, Result<T>) -> R + Send + 'static,
    C: FnOnce(R) + Send + 'static,
{
    let ticket = dispatcher.begin_task();
    let in_flight = GaugeGuard::acquire(Gauge::TasksInFlight);
    let mut payload = payload;

    queue.push(Box::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&handle, &mut payload)))
            .unwrap_or_else(|panic| {
                Err(OdbcError::InternalError(format!(
                    "Worker task panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        let completion: Completion = Box::new(move || {
            let settled = settle(&handle, outcome);
            drop(handle);
            drop(in_flight);
            callback(settled);
            drop(payload);
        });
        ticket.complete(completion);
    }))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventLoop;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_lane_runs_jobs_in_submission_order() {
        let mut event_loop = EventLoop::new();
        let dispatcher = event_loop.dispatcher();
        let queue = SerialQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50u64 {
            let seen = Arc::clone(&seen);
            submit(
                &dispatcher,
                &queue,
                Arc::new(()),
                i,
                |_, i| {
                    std::thread::sleep(Duration::from_micros(50 * (*i % 3)));
                    Ok(*i)
                },
                |_, r| r,
                move |r| seen.lock().unwrap().push(r.unwrap()),
            )
            .unwrap();
        }

        assert_eq!(event_loop.run(), 50);
        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_work_still_completes_once() {
        let mut event_loop = EventLoop::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&calls);
        submit(
            &event_loop.dispatcher(),
            &SerialQueue::new(),
            Arc::new(()),
            (),
            |_, _| -> Result<()> { panic!("driver exploded") },
            |_, r| r,
            move |r| {
                assert!(r.unwrap_err().to_string().contains("driver exploded"));
                observed.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        event_loop.run();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_released_before_callback() {
        let mut event_loop = EventLoop::new();
        let handle = Arc::new(());
        let weak = Arc::downgrade(&handle);
        let ours = Arc::clone(&handle);
        submit(
            &event_loop.dispatcher(),
            &SerialQueue::new(),
            handle,
            (),
            |_, _| Ok(()),
            |_, r| r,
            move |_| assert_eq!(weak.strong_count(), 1),
        )
        .unwrap();
        event_loop.run();
        drop(ours);
    }

    #[test]
    #[should_panic(expected = "callback failure")]
    fn test_callback_panic_propagates_from_run() {
        let mut event_loop = EventLoop::new();
        submit(
            &event_loop.dispatcher(),
            &SerialQueue::new(),
            Arc::new(()),
            (),
            |_, _| Ok(()),
            |_, r| r,
            |_| panic!("callback failure"),
        )
        .unwrap();
        event_loop.run();
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
