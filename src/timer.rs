use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use concurrent_queue::ConcurrentQueue;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// How long the observer parks when the heap is empty.
const IDLE_WAIT: Duration = Duration::from_millis(100);

pub type TimerCallback = Box<dyn Fn() + Send + Sync>;

/// One-shot or repeating timer.
///
/// Cancellation is advisory: `stop` flips a flag and the entry is filtered
/// when its deadline comes up. Dropping the last `Arc` has the same effect,
/// since the queue only keeps a weak reference once the timer is armed.
pub struct Timer {
    id: u64,
    delay: Duration,
    interval: Option<Duration>,
    callback: TimerCallback,
    pending: AtomicBool,
    cancelled: AtomicBool,
}

impl Timer {
    pub fn new<F>(delay: Duration, callback: F) -> Arc<Timer>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Timer {
            id: NEXT_TIMER_ID.fetch_add(1, Relaxed),
            delay,
            interval: None,
            callback: Box::new(callback),
            pending: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn repeating<F>(interval: Duration, callback: F) -> Arc<Timer>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Timer {
            id: NEXT_TIMER_ID.fetch_add(1, Relaxed),
            delay: interval,
            interval: Some(interval),
            callback: Box::new(callback),
            pending: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_repeating(&self) -> bool {
        self.interval.is_some()
    }

    pub fn stop(&self) {
        self.cancelled.store(true, Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }

    /// Run the callback unless the timer was cancelled in the meantime.
    pub fn fire(&self) {
        if !self.is_cancelled() {
            (self.callback)();
        }
    }
}

struct TimerEntry {
    at: Instant,
    timer: Weak<Timer>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &TimerEntry) -> bool {
        self.at == other.at
    }
}

// BinaryHeap is a max-heap; reverse the ordering so the nearest deadline
// surfaces first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &TimerEntry) -> CmpOrdering {
        other.at.cmp(&self.at)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &TimerEntry) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

pub type TimeoutCallback = Box<dyn Fn(Arc<Timer>) + Send + Sync>;

/// Deadline-ordered timer set with a single observer thread.
///
/// `add_timer` is wait-free from any thread; the observer drains the
/// pending-add queue, fires due timers through the configured callback and
/// parks until the next deadline. The callback is expected to bounce the
/// timer onto a poller thread rather than doing real work itself.
pub struct TimerQueue {
    started: AtomicBool,
    new_timers: ConcurrentQueue<Arc<Timer>>,
    signal: Mutex<()>,
    condvar: Condvar,
    observer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerQueue {
    pub fn new() -> Arc<TimerQueue> {
        Arc::new(TimerQueue {
            started: AtomicBool::new(false),
            new_timers: ConcurrentQueue::unbounded(),
            signal: Mutex::new(()),
            condvar: Condvar::new(),
            observer: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>, cb: TimeoutCallback) -> bool {
        if self.started.swap(true, AcqRel) {
            return false;
        }

        let queue = self.clone();
        let handle = thread::Builder::new()
            .name("timer-queue".into())
            .spawn(move || queue.observe(cb))
            .expect("spawn timer observer");

        *self.observer.lock().unwrap() = Some(handle);

        true
    }

    pub fn stop(&self) {
        self.started.store(false, Release);
        let _guard = self.signal.lock().unwrap();
        self.condvar.notify_one();
    }

    pub fn wait_stopped(&self) {
        if let Some(handle) = self.observer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Arm `timer`. Returns false when the queue is stopped or the timer is
    /// already armed.
    pub fn add_timer(&self, timer: &Arc<Timer>) -> bool {
        if !self.started.load(Acquire) {
            return false;
        }

        if timer.pending.swap(true, AcqRel) {
            return false;
        }

        timer.cancelled.store(false, Release);

        if self.new_timers.push(timer.clone()).is_err() {
            timer.pending.store(false, Release);
            return false;
        }

        let _guard = self.signal.lock().unwrap();
        self.condvar.notify_one();
        true
    }

    fn observe(self: Arc<Self>, cb: TimeoutCallback) {
        let mut timers: BinaryHeap<TimerEntry> = BinaryHeap::new();

        while self.started.load(Acquire) {
            while let Ok(timer) = self.new_timers.pop() {
                timers.push(TimerEntry {
                    at: Instant::now() + timer.delay,
                    timer: Arc::downgrade(&timer),
                });
            }

            let now = Instant::now();
            while let Some(entry) = timers.peek() {
                if entry.at > now {
                    break;
                }
                let entry = timers.pop().unwrap();

                let timer = match entry.timer.upgrade() {
                    Some(timer) => timer,
                    None => continue,
                };

                if timer.is_cancelled() {
                    timer.pending.store(false, Release);
                    continue;
                }

                if let Some(interval) = timer.interval {
                    timers.push(TimerEntry {
                        at: entry.at + interval,
                        timer: entry.timer,
                    });
                } else {
                    timer.pending.store(false, Release);
                }

                cb(timer);
            }

            let wait = timers
                .peek()
                .map(|entry| entry.at.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);

            let guard = self.signal.lock().unwrap();
            if !self.new_timers.is_empty() || !self.started.load(Acquire) {
                continue;
            }
            if !wait.is_zero() {
                let _ = self.condvar.wait_timeout(guard, wait).unwrap();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Timer, TimerQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn fires_once() {
        let queue = TimerQueue::new();
        queue.start(Box::new(|timer| timer.fire()));

        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        let timer = Timer::new(Duration::from_millis(20), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        assert!(queue.add_timer(&timer));
        assert!(!queue.add_timer(&timer));

        let deadline = Instant::now() + Duration::from_secs(1);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        queue.stop();
        queue.wait_stopped();
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let queue = TimerQueue::new();
        queue.start(Box::new(|timer| timer.fire()));

        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        let timer = Timer::new(Duration::from_millis(30), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        assert!(queue.add_timer(&timer));
        timer.stop();

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        queue.stop();
        queue.wait_stopped();
    }

    #[test]
    fn repeating_timer_reschedules() {
        let queue = TimerQueue::new();
        queue.start(Box::new(|timer| timer.fire()));

        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        let timer = Timer::repeating(Duration::from_millis(10), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        assert!(queue.add_timer(&timer));

        let deadline = Instant::now() + Duration::from_secs(1);
        while fired.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(fired.load(Ordering::SeqCst) >= 3);

        timer.stop();
        queue.stop();
        queue.wait_stopped();
    }
}
