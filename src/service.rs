use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::poller::{Channel, CompletionPoller, Poller, ReadinessPoller, Tracker};
use crate::timer::{Timer, TimerQueue};

/// Which dispatch discipline the service's pollers use.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PollMode {
    /// One epoll worker per poller; callbacks run on the poller thread.
    Readiness,
    /// One harvest thread plus a pool of dispatch workers.
    Completion,
}

/// Composition root: owns the pollers and the timer queue.
///
/// Every transport is affined to one poller by fd hash; its trackers,
/// posted events and timer fires all land on that poller's dispatch thread.
pub struct Service {
    pollers: Vec<Box<dyn Poller>>,
    timers: Arc<TimerQueue>,
    next_rr: AtomicUsize,
}

impl Service {
    /// Readiness-mode service with `workers` poller threads (0 = hardware
    /// concurrency).
    pub fn new(workers: usize) -> io::Result<Arc<Service>> {
        Service::with_mode(PollMode::Readiness, workers)
    }

    pub fn with_mode(mode: PollMode, workers: usize) -> io::Result<Arc<Service>> {
        let workers = if workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            workers
        };

        let mut pollers: Vec<Box<dyn Poller>> = Vec::new();
        match mode {
            PollMode::Readiness => {
                for _ in 0..workers {
                    pollers.push(Box::new(ReadinessPoller::new()?));
                }
            }
            PollMode::Completion => {
                // The OS set is process-wide in this discipline: one poller,
                // many dispatch workers.
                pollers.push(Box::new(CompletionPoller::new(workers)?));
            }
        }

        Ok(Arc::new(Service {
            pollers,
            timers: TimerQueue::new(),
            next_rr: AtomicUsize::new(0),
        }))
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let mut any = false;
        for poller in &self.pollers {
            any |= poller.start();
        }

        let service = Arc::downgrade(self);
        any |= self.timers.start(Box::new(move |timer| {
            if let Some(service) = service.upgrade() {
                let poller = &service.pollers[(timer.id() as usize) % service.pollers.len()];
                poller.post_callback(Box::new(move || timer.fire()));
            }
        }));

        any
    }

    pub fn stop(&self) {
        self.timers.stop();
        for poller in &self.pollers {
            poller.stop();
        }
    }

    pub fn wait_stopped(&self) {
        self.timers.wait_stopped();
        for poller in &self.pollers {
            poller.wait_stopped();
        }
    }

    fn poller_for_fd(&self, fd: RawFd) -> &dyn Poller {
        &*self.pollers[(fd as usize) % self.pollers.len()]
    }

    pub fn add_tracker(&self, tracker: &Arc<Tracker>) -> bool {
        self.poller_for_fd(tracker.fd()).add_tracker(tracker)
    }

    pub fn remove_tracker(&self, tracker: &Arc<Tracker>) {
        self.poller_for_fd(tracker.fd()).remove_tracker(tracker)
    }

    pub fn pause_tracker(&self, tracker: &Arc<Tracker>) {
        self.poller_for_fd(tracker.fd()).pause_tracker(tracker)
    }

    pub fn resume_tracker(&self, tracker: &Arc<Tracker>) {
        self.poller_for_fd(tracker.fd()).resume_tracker(tracker)
    }

    /// Deliver `code` to `channel` on its poller's dispatch thread.
    pub fn post_channel_event(&self, channel: &Arc<Channel>, code: u32) {
        self.poller_for_fd(channel.fd()).post_channel_event(channel, code)
    }

    /// Run `cb` on some poller's dispatch thread.
    pub fn post_callback(&self, cb: Box<dyn FnOnce() + Send>) {
        let idx = self.next_rr.fetch_add(1, Ordering::Relaxed) % self.pollers.len();
        self.pollers[idx].post_callback(cb)
    }

    pub fn add_timer(&self, timer: &Arc<Timer>) -> bool {
        self.timers.add_timer(timer)
    }

    pub fn pollers(&self) -> usize {
        self.pollers.len()
    }
}

#[cfg(test)]
mod test {
    use super::Service;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn start_stop() {
        let service = Service::new(2).unwrap();
        assert!(service.start());
        assert!(!service.start());
        service.stop();
        service.wait_stopped();
    }

    #[test]
    fn timer_fires_on_poller_thread() {
        let service = Service::new(1).unwrap();
        service.start();

        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        let timer = crate::timer::Timer::new(Duration::from_millis(10), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert!(service.add_timer(&timer));

        let deadline = Instant::now() + Duration::from_secs(1);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        service.stop();
        service.wait_stopped();
    }
}
