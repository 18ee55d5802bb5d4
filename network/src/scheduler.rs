use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

type TaskFn = Box<dyn Fn() + Send + Sync>;

struct Task {
    period: Option<Duration>,
    cancelled: AtomicBool,
    run: TaskFn,
}

/// Cancellation handle for a scheduled task. Dropping the handle does not
/// cancel the task.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.task.cancelled.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.cancelled.load(AtomicOrdering::Acquire)
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    task: Arc<Task>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the BinaryHeap pops the earliest deadline first
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SchedulerInner {
    heap: Mutex<BinaryHeap<Entry>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
}

/// A single dedicated timer thread driving a min-heap of deadlines.
///
/// Per-peer queue flushes and the consensus epoch tick all run on this one
/// thread; tasks must stay short and hand real work to their own channels.
pub struct TickScheduler {
    inner: Arc<SchedulerInner>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TickScheduler {
    pub fn new(name: &str) -> Self {
        let inner = Arc::new(SchedulerInner {
            heap: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        });
        let thread_inner = inner.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(thread_inner))
            .expect("spawning the timer thread");
        Self {
            inner,
            thread: Some(thread),
        }
    }

    /// Schedules `run` every `period`, first firing after `initial`.
    pub fn schedule_at_fixed_rate(
        &self,
        initial: Duration,
        period: Duration,
        run: impl Fn() + Send + Sync + 'static,
    ) -> TaskHandle {
        self.schedule(initial, Some(period), Box::new(run))
    }

    /// Schedules `run` once after `delay`.
    pub fn schedule_once(&self, delay: Duration, run: impl Fn() + Send + Sync + 'static) -> TaskHandle {
        self.schedule(delay, None, Box::new(run))
    }

    fn schedule(&self, initial: Duration, period: Option<Duration>, run: TaskFn) -> TaskHandle {
        let task = Arc::new(Task {
            period,
            cancelled: AtomicBool::new(false),
            run,
        });
        let entry = Entry {
            deadline: Instant::now() + initial,
            seq: self.inner.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
            task: task.clone(),
        };
        self.inner.heap.lock().push(entry);
        self.inner.wakeup.notify_one();
        TaskHandle { task }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);
        self.inner.wakeup.notify_one();
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_loop(inner: Arc<SchedulerInner>) {
    let mut heap = inner.heap.lock();
    loop {
        if inner.shutdown.load(AtomicOrdering::Acquire) {
            return;
        }
        let now = Instant::now();
        match heap.peek() {
            None => {
                inner.wakeup.wait(&mut heap);
            }
            Some(entry) if entry.deadline > now => {
                let timeout = entry.deadline - now;
                inner.wakeup.wait_for(&mut heap, timeout);
            }
            Some(_) => {
                let entry = heap.pop().expect("peeked entry");
                if entry.task.cancelled.load(AtomicOrdering::Acquire) {
                    continue;
                }
                // run without the heap lock so tasks may reschedule
                drop(heap);
                (entry.task.run)();
                heap = inner.heap.lock();
                if let Some(period) = entry.task.period {
                    if !entry.task.cancelled.load(AtomicOrdering::Acquire) {
                        trace!(seq = entry.seq, "re-arming periodic task");
                        heap.push(Entry {
                            deadline: entry.deadline + period,
                            seq: entry.seq,
                            task: entry.task,
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn one_shot_fires_once() {
        let scheduler = TickScheduler::new("test-once");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.schedule_once(Duration::from_millis(5), move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });
        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn periodic_fires_repeatedly_until_cancelled() {
        let scheduler = TickScheduler::new("test-periodic");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = scheduler.schedule_at_fixed_rate(
            Duration::from_millis(1),
            Duration::from_millis(5),
            move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            },
        );
        thread::sleep(Duration::from_millis(80));
        let seen = fired.load(AtomicOrdering::SeqCst);
        assert!(seen >= 3, "expected at least 3 ticks, saw {seen}");

        handle.cancel();
        thread::sleep(Duration::from_millis(20));
        let frozen = fired.load(AtomicOrdering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), frozen);
    }

    #[test]
    fn earliest_deadline_runs_first() {
        let scheduler = TickScheduler::new("test-order");
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        scheduler.schedule_once(Duration::from_millis(30), move || o1.lock().push("late"));
        scheduler.schedule_once(Duration::from_millis(5), move || o2.lock().push("early"));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(*order.lock(), vec!["early", "late"]);
    }
}
