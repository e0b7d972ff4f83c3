use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::epoll::Ready;
use crate::flow::{FlowTls, HandshakeStatus};
use crate::poller::{Channel, ChannelOps, TrackMode, Tracker};
use crate::service::Service;
use crate::timer::Timer;
use crate::transport::{Error, HandshakeCallbacks, Result, Status, StatusCell};

static NEXT_HANDSHAKER_ID: AtomicU64 = AtomicU64::new(1);

/// Transient transport that drives a TLS handshake over a bound flow.
///
/// Emits `on_handshaked` exactly once; on success it keeps the flow for the
/// TLS transport to adopt via `take_flow`, on failure the flow (and its
/// socket) is dropped. Tracker removal is queued before the callback fires,
/// so a transport started from inside the callback re-registers the fd
/// behind the removals.
pub struct TlsHandshaker {
    id: u64,
    status: StatusCell,
    tracker_cnt: AtomicUsize,
    flow: Mutex<Option<FlowTls>>,

    service: OnceLock<Arc<Service>>,
    channel: OnceLock<Arc<Channel>>,
    r_tracker: OnceLock<Arc<Tracker>>,
    s_tracker: OnceLock<Arc<Tracker>>,
    timer: Mutex<Option<Arc<Timer>>>,
    cbs: OnceLock<HandshakeCallbacks>,
}

impl TlsHandshaker {
    pub fn new(flow: FlowTls) -> Arc<TlsHandshaker> {
        Arc::new(TlsHandshaker {
            id: NEXT_HANDSHAKER_ID.fetch_add(1, Relaxed),
            status: StatusCell::new(),
            tracker_cnt: AtomicUsize::new(0),
            flow: Mutex::new(Some(flow)),
            service: OnceLock::new(),
            channel: OnceLock::new(),
            r_tracker: OnceLock::new(),
            s_tracker: OnceLock::new(),
            timer: Mutex::new(None),
            cbs: OnceLock::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Begin driving the handshake. `timeout` of zero disables the timer.
    pub fn start(
        self: &Arc<Self>,
        service: &Arc<Service>,
        timeout: Duration,
        cbs: HandshakeCallbacks,
    ) -> Result<()> {
        if !self.status.transit(Status::Init, Status::Handshaking) {
            return Err(Error::Invalid);
        }

        let _ = self.service.set(service.clone());
        let _ = self.cbs.set(cbs);

        let fd = match self.flow.lock().unwrap().as_ref() {
            Some(flow) => flow.fd(),
            None => {
                self.status.set(Status::Error);
                return Err(Error::Invalid);
            }
        };

        let me = Arc::downgrade(self);
        let ops = ChannelOps {
            on_read: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(h) = me.upgrade() {
                        h.drive();
                    }
                })
            },
            on_send: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(h) = me.upgrade() {
                        h.drive();
                    }
                })
            },
            on_error: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(h) = me.upgrade() {
                        h.finish(false, Status::Error);
                    }
                })
            },
            on_event: Box::new(|_| {}),
            on_tracker: {
                let me = me.clone();
                Box::new(move |on| {
                    if let Some(h) = me.upgrade() {
                        h.on_tracker_event(on);
                    }
                })
            },
        };

        let channel = Channel::new(fd, ops);
        let r_tracker = Tracker::new(&channel, Ready::readable(), TrackMode::Oneshot);
        let s_tracker = Tracker::new(&channel, Ready::writable(), TrackMode::Oneshot);

        let _ = self.channel.set(channel);
        let _ = self.r_tracker.set(r_tracker.clone());
        let _ = self.s_tracker.set(s_tracker.clone());

        if !service.add_tracker(&r_tracker) || !service.add_tracker(&s_tracker) {
            service.remove_tracker(&r_tracker);
            service.remove_tracker(&s_tracker);
            self.status.set(Status::Error);
            return Err(Error::Fault);
        }

        if !timeout.is_zero() {
            let me = Arc::downgrade(self);
            let timer = Timer::new(timeout, move || {
                if let Some(h) = me.upgrade() {
                    h.finish(false, Status::Timeout);
                }
            });
            if service.add_timer(&timer) {
                *self.timer.lock().unwrap() = Some(timer);
            }
        }

        // Client role queues its hello immediately; flush it now rather
        // than waiting for the first readiness event.
        self.drive();

        Ok(())
    }

    /// Abandon the handshake; `on_handshaked(false)` fires if it was still
    /// in flight.
    pub fn stop(&self) {
        self.finish(false, Status::Error);
    }

    /// On success the flow is plaintext-ready for a TLS transport.
    pub fn take_flow(&self) -> Option<FlowTls> {
        self.flow.lock().unwrap().take()
    }

    fn drive(&self) {
        if !self.status.is(Status::Handshaking) {
            return;
        }

        let step = {
            let guard = self.flow.lock().unwrap();
            match guard.as_ref() {
                Some(flow) => flow.handshake(),
                None => return,
            }
        };

        match step {
            HandshakeStatus::Done => self.finish(true, Status::Finish),
            HandshakeStatus::Pending { want_send } => {
                if let Some(service) = self.service.get() {
                    if let Some(r_tracker) = self.r_tracker.get() {
                        service.resume_tracker(r_tracker);
                    }
                    if want_send {
                        if let Some(s_tracker) = self.s_tracker.get() {
                            service.resume_tracker(s_tracker);
                        }
                    }
                }
            }
            HandshakeStatus::Abort => self.finish(false, Status::Error),
        }
    }

    fn finish(&self, success: bool, terminal: Status) {
        if !self.status.transit(Status::Handshaking, terminal) {
            return;
        }

        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.stop();
        }

        if let Some(service) = self.service.get() {
            if let Some(r_tracker) = self.r_tracker.get() {
                service.remove_tracker(r_tracker);
            }
            if let Some(s_tracker) = self.s_tracker.get() {
                service.remove_tracker(s_tracker);
            }
        }

        if !success {
            self.flow.lock().unwrap().take();
        }

        if let Some(cbs) = self.cbs.get() {
            (cbs.on_handshaked)(success);
        }
    }

    fn on_tracker_event(&self, on: bool) {
        if on {
            self.tracker_cnt.fetch_add(1, AcqRel);
            return;
        }

        let mut cur = self.tracker_cnt.load(Acquire);
        loop {
            if cur == 0 {
                break;
            }
            match self
                .tracker_cnt
                .compare_exchange(cur, cur - 1, AcqRel, Acquire)
            {
                Ok(_) => break,
                Err(now) => cur = now,
            }
        }
    }
}

impl std::fmt::Debug for TlsHandshaker {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TlsHandshaker")
            .field("id", &self.id)
            .field("status", &self.status.get())
            .finish()
    }
}
