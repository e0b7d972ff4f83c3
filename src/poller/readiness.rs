use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use slab::Slab;

use crate::epoll::{Epoll, EpollOpt, Event, Events, Ready, Token};
use crate::poller::{Channel, Poller, Posted, TrackMode, Tracker, TrackerEvent, TrackerOp};
use crate::queue::Queue;

const CEV_WAKER_TOKEN: Token = Token(0);
const TEV_WAKER_TOKEN: Token = Token(1);
const TOKEN_OFFSET: usize = 2;

/// Poll timeout when the previous iteration had mailbox work, vs idle.
const BUSY_WAIT: Duration = Duration::from_millis(0);
const IDLE_WAIT: Duration = Duration::from_millis(3);

/// Readiness-notification poller: one worker thread owns the epoll set and
/// runs every channel callback, so events for one channel are naturally
/// serialized.
pub struct ReadinessPoller {
    inner: Arc<Inner>,
}

struct Inner {
    epoll: Epoll,
    started: AtomicBool,
    cevents: Queue<Posted>,
    tevents: Queue<TrackerEvent>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ReadinessPoller {
    pub fn new() -> io::Result<ReadinessPoller> {
        let epoll = Epoll::new()?;
        let cevents = Queue::unbounded()?;
        let tevents = Queue::unbounded()?;

        epoll.add(
            &cevents,
            CEV_WAKER_TOKEN,
            Ready::readable(),
            EpollOpt::edge(),
        )?;
        epoll.add(
            &tevents,
            TEV_WAKER_TOKEN,
            Ready::readable(),
            EpollOpt::edge(),
        )?;

        Ok(ReadinessPoller {
            inner: Arc::new(Inner {
                epoll,
                started: AtomicBool::new(false),
                cevents,
                tevents,
                worker: Mutex::new(None),
            }),
        })
    }
}

impl Poller for ReadinessPoller {
    fn start(&self) -> bool {
        if self.inner.started.swap(true, AcqRel) {
            return false;
        }

        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("spout-poller".into())
            .spawn(move || inner.run())
            .expect("spawn poller worker");

        *self.inner.worker.lock().unwrap() = Some(handle);

        true
    }

    fn stop(&self) {
        self.inner.started.store(false, Release);
        self.inner.cevents.close();
        self.inner.tevents.close();
        let _ = self.inner.cevents.wake();
    }

    fn wait_stopped(&self) {
        if let Some(handle) = self.inner.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn add_tracker(&self, tracker: &Arc<Tracker>) -> bool {
        if self.inner.started.load(Acquire) && tracker.set_tracked(true) {
            tracker.mark_started(true);

            let ev = TrackerEvent {
                tracker: tracker.clone(),
                op: TrackerOp::Add,
            };
            if self.inner.tevents.push(ev).is_ok() {
                return true;
            }

            tracker.set_tracked(false);
            tracker.mark_started(false);
        }

        false
    }

    fn remove_tracker(&self, tracker: &Arc<Tracker>) {
        if !tracker.mark_started(false) {
            return;
        }

        let ev = TrackerEvent {
            tracker: tracker.clone(),
            op: TrackerOp::Del,
        };
        let _ = self.inner.tevents.push(ev);
    }

    fn pause_tracker(&self, tracker: &Arc<Tracker>) {
        if let Some(token) = tracker.token() {
            tracker.set_tracked(false);
            if let Err(err) =
                self.inner
                    .epoll
                    .0
                    .modify(tracker.fd(), token, Ready::empty(), EpollOpt::edge())
            {
                debug!("poller: pause tracker fd={} failed: {}", tracker.fd(), err);
            }
        }
    }

    fn resume_tracker(&self, tracker: &Arc<Tracker>) {
        if !tracker.is_started() || !tracker.set_tracked(true) {
            return;
        }

        if let Some(token) = tracker.token() {
            if let Err(err) = self.inner.epoll.0.modify(
                tracker.fd(),
                token,
                tracker.interest() | Ready::hup(),
                tracker.epoll_opts(),
            ) {
                debug!("poller: resume tracker fd={} failed: {}", tracker.fd(), err);
            }
        }
    }

    fn post_channel_event(&self, channel: &Arc<Channel>, code: u32) {
        let _ = self.inner.cevents.push(Posted::Event {
            channel: Arc::downgrade(channel),
            code,
        });
    }

    fn post_callback(&self, cb: Box<dyn FnOnce() + Send>) {
        let _ = self.inner.cevents.push(Posted::Call(cb));
    }
}

impl Inner {
    fn run(&self) {
        let mut events = Events::with_capacity(1024);
        let mut trackers: Slab<Arc<Tracker>> = Slab::new();

        while self.started.load(Acquire) {
            let had_cev = self.handle_channel_events();
            let had_tev = self.handle_tracker_events(&mut trackers);

            let timeout = if had_cev || had_tev {
                BUSY_WAIT
            } else {
                IDLE_WAIT
            };

            if let Err(err) = self.epoll.wait(&mut events, Some(timeout)) {
                error!("poller: epoll wait failed: {}", err);
                self.started.store(false, Release);
                break;
            }

            for event in &events {
                self.dispatch(&mut trackers, event);
            }
        }

        self.release(&mut trackers);
    }

    /// Drain up to the number of channel events observed at entry, so a
    /// channel that keeps posting cannot starve I/O dispatch.
    fn handle_channel_events(&self) -> bool {
        let mut cnt = self.cevents.len();
        let had = cnt > 0;

        while cnt > 0 {
            match self.cevents.pop() {
                Ok(Posted::Event { channel, code }) => {
                    if let Some(ch) = channel.upgrade() {
                        ch.handle_channel_event(code);
                    }
                }
                Ok(Posted::Call(cb)) => cb(),
                Err(_) => break,
            }
            cnt -= 1;
        }

        had
    }

    fn handle_tracker_events(&self, trackers: &mut Slab<Arc<Tracker>>) -> bool {
        let mut cnt = self.tevents.len();
        let had = cnt > 0;

        while cnt > 0 {
            match self.tevents.pop() {
                Ok(ev) => match ev.op {
                    TrackerOp::Add => self.apply_add(trackers, ev.tracker),
                    TrackerOp::Del => self.apply_del(trackers, ev.tracker),
                },
                Err(_) => break,
            }
            cnt -= 1;
        }

        had
    }

    fn apply_add(&self, trackers: &mut Slab<Arc<Tracker>>, tracker: Arc<Tracker>) {
        let ch = match tracker.channel() {
            Some(ch) => ch,
            None => return,
        };

        let entry = trackers.vacant_entry();
        let token = Token(entry.key() + TOKEN_OFFSET);
        tracker.set_token(token);

        match self.epoll.add(
            &tracker.fd(),
            token,
            tracker.interest() | Ready::hup(),
            tracker.epoll_opts(),
        ) {
            Ok(()) => {
                entry.insert(tracker);
                ch.handle_tracker_event(true);
            }
            Err(err) => {
                warn!("poller: add tracker fd={} failed: {}", tracker.fd(), err);
                tracker.set_tracked(false);
                ch.on_error_event();
            }
        }
    }

    fn apply_del(&self, trackers: &mut Slab<Arc<Tracker>>, tracker: Arc<Tracker>) {
        if let Some(token) = tracker.token() {
            let key = token.0 - TOKEN_OFFSET;
            let installed = trackers
                .get(key)
                .map(|t| Arc::ptr_eq(t, &tracker))
                .unwrap_or(false);
            if installed {
                trackers.remove(key);
                if let Err(err) = self.epoll.delete(&tracker.fd()) {
                    debug!("poller: delete tracker fd={} failed: {}", tracker.fd(), err);
                }
            }
        }

        tracker.set_tracked(false);

        if tracker.release_once() {
            if let Some(ch) = tracker.channel() {
                ch.handle_tracker_event(false);
            }
        }
    }

    fn dispatch(&self, trackers: &mut Slab<Arc<Tracker>>, event: Event) {
        let token = event.token();

        // Mailbox wakeups have no channel; both queues are drained at the
        // top of the loop.
        if token == CEV_WAKER_TOKEN || token == TEV_WAKER_TOKEN {
            return;
        }

        let key = match token.0.checked_sub(TOKEN_OFFSET) {
            Some(key) => key,
            None => return,
        };

        let tracker = match trackers.get(key) {
            Some(tracker) => tracker.clone(),
            None => return,
        };

        if !tracker.is_started() {
            return;
        }

        if tracker.mode() == TrackMode::Oneshot {
            tracker.set_tracked(false);
        }

        let ch = match tracker.channel() {
            Some(ch) => ch,
            None => {
                trackers.remove(key);
                let _ = self.epoll.delete(&tracker.fd());
                return;
            }
        };

        let kind = event.readiness();

        if kind.is_error() {
            ch.on_error_event();
        }

        if (kind.is_readable() || kind.is_hup()) && tracker.interest().is_readable() {
            ch.on_read_event();
        }

        if kind.is_writable() && tracker.interest().is_writable() {
            ch.on_send_event();
        }
    }

    /// Loop exit: every tracker still known to this poller is released and
    /// its channel observes a final tracker-off notification.
    fn release(&self, trackers: &mut Slab<Arc<Tracker>>) {
        while let Ok(ev) = self.tevents.pop() {
            if ev.op == TrackerOp::Del {
                if let Some(token) = ev.tracker.token() {
                    let key = token.0 - TOKEN_OFFSET;
                    let installed = trackers
                        .get(key)
                        .map(|t| Arc::ptr_eq(t, &ev.tracker))
                        .unwrap_or(false);
                    if installed {
                        trackers.remove(key);
                        let _ = self.epoll.delete(&ev.tracker.fd());
                    }
                }
            }

            ev.tracker.set_tracked(false);
            ev.tracker.mark_started(false);

            if ev.tracker.release_once() {
                if let Some(ch) = ev.tracker.channel() {
                    ch.handle_tracker_event(false);
                }
            }
        }

        for tracker in trackers.drain() {
            let _ = self.epoll.delete(&tracker.fd());
            tracker.set_tracked(false);
            tracker.mark_started(false);

            if tracker.release_once() {
                if let Some(ch) = tracker.channel() {
                    ch.handle_tracker_event(false);
                }
            }
        }
    }
}
