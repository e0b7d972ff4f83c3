use std::net::SocketAddr;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::debug;

use crate::block_queue::BlockQueue;
use crate::epoll::Ready;
use crate::flow::FlowTcpDialer;
use crate::poller::{Channel, ChannelOps, TrackMode, Tracker};
use crate::service::Service;
use crate::timer::Timer;
use crate::transport::{DialerCallbacks, Error, Result, Status, StatusCell, TcpTransport};

/// Dials one TCP connection with an optional connect timeout.
///
/// The timer and the connect completion race; whichever CAS-transitions the
/// status first wins, the loser is a no-op.
pub struct TcpDialer {
    status: StatusCell,
    tracker_cnt: AtomicUsize,
    local: Option<SocketAddr>,
    remote: SocketAddr,
    connect_timeout: Duration,

    flow: OnceLock<FlowTcpDialer>,
    service: OnceLock<Arc<Service>>,
    channel: OnceLock<Arc<Channel>>,
    tracker: OnceLock<Arc<Tracker>>,
    timer: Mutex<Option<Arc<Timer>>>,
    cbs: OnceLock<DialerCallbacks<TcpTransport>>,
}

impl TcpDialer {
    /// `connect_timeout` of zero disables the timer.
    pub fn new(
        local: Option<SocketAddr>,
        remote: SocketAddr,
        connect_timeout: Duration,
    ) -> Arc<TcpDialer> {
        Arc::new(TcpDialer {
            status: StatusCell::new(),
            tracker_cnt: AtomicUsize::new(0),
            local,
            remote,
            connect_timeout,
            flow: OnceLock::new(),
            service: OnceLock::new(),
            channel: OnceLock::new(),
            tracker: OnceLock::new(),
            timer: Mutex::new(None),
            cbs: OnceLock::new(),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Begin the non-blocking connect. Exactly one of `on_dialed` /
    /// `on_timeout` / `on_stopped` will eventually fire.
    pub fn dial(
        self: &Arc<Self>,
        service: &Arc<Service>,
        cbs: DialerCallbacks<TcpTransport>,
    ) -> Result<()> {
        if !self.status.transit(Status::Init, Status::Starting) {
            return Err(Error::Invalid);
        }

        let _ = self.service.set(service.clone());
        let _ = self.cbs.set(cbs);

        let (flow, _established) = match FlowTcpDialer::new(self.local.as_ref(), &self.remote) {
            Ok(pair) => pair,
            Err(err) => {
                debug!("dialer: connect to {} failed to start: {}", self.remote, err);
                self.status.set(Status::Error);
                return Err(Error::Fault);
            }
        };
        let fd = flow.fd();
        let _ = self.flow.set(flow);

        let me = Arc::downgrade(self);
        let ops = ChannelOps {
            on_read: Box::new(|| {}),
            on_send: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(d) = me.upgrade() {
                        d.on_connect_event();
                    }
                })
            },
            on_error: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(d) = me.upgrade() {
                        d.on_connect_event();
                    }
                })
            },
            on_event: Box::new(|_| {}),
            on_tracker: {
                let me = me.clone();
                Box::new(move |on| {
                    if let Some(d) = me.upgrade() {
                        d.on_tracker_event(on);
                    }
                })
            },
        };

        let channel = Channel::new(fd, ops);
        let tracker = Tracker::new(&channel, Ready::writable(), TrackMode::Oneshot);

        let _ = self.channel.set(channel);
        let _ = self.tracker.set(tracker.clone());

        if !service.add_tracker(&tracker) {
            self.status.set(Status::Error);
            return Err(Error::Fault);
        }

        if !self.connect_timeout.is_zero() {
            let me = Arc::downgrade(self);
            let timer = Timer::new(self.connect_timeout, move || {
                if let Some(d) = me.upgrade() {
                    d.on_timeout_event();
                }
            });
            if service.add_timer(&timer) {
                *self.timer.lock().unwrap() = Some(timer);
            }
        }

        if !self.status.transit(Status::Starting, Status::Started) {
            return Err(Error::Fault);
        }

        Ok(())
    }

    pub fn stop(&self) {
        if !self.status.transit(Status::Started, Status::Stopping) {
            return;
        }

        self.cancel_timer();
        if let Some(flow) = self.flow.get() {
            flow.close();
        }
        if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
            service.remove_tracker(tracker);
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.stop();
        }
    }

    fn on_connect_event(&self) {
        if !self.status.transit(Status::Started, Status::Finish) {
            return;
        }

        self.cancel_timer();
        if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
            service.remove_tracker(tracker);
        }

        let flow = match self.flow.get() {
            Some(flow) => flow,
            None => return,
        };

        let transport = match flow.connect_result() {
            Ok(()) => flow
                .take_socket()
                .and_then(|socket| TcpTransport::from_socket(socket).ok()),
            Err(err) => {
                debug!("dialer: connect to {} failed: {}", self.remote, err);
                flow.close();
                None
            }
        };

        if let Some(cbs) = self.cbs.get() {
            (cbs.on_dialed)(transport);
        }
    }

    fn on_timeout_event(&self) {
        if !self.status.transit(Status::Started, Status::Timeout) {
            return;
        }

        if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
            service.remove_tracker(tracker);
        }
        if let Some(flow) = self.flow.get() {
            flow.close();
        }

        if let Some(cbs) = self.cbs.get() {
            (cbs.on_timeout)();
        }
    }

    fn on_tracker_event(&self, on: bool) {
        if on {
            self.tracker_cnt.fetch_add(1, AcqRel);
            return;
        }

        let mut cur = self.tracker_cnt.load(Acquire);
        let left = loop {
            if cur == 0 {
                break 0;
            }
            match self
                .tracker_cnt
                .compare_exchange(cur, cur - 1, AcqRel, Acquire)
            {
                Ok(_) => break cur - 1,
                Err(now) => cur = now,
            }
        };

        if left == 0 && self.status.transit(Status::Stopping, Status::Stopped) {
            if let Some(cbs) = self.cbs.get() {
                (cbs.on_stopped)();
            }
        }
    }
}

impl std::fmt::Debug for TcpDialer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TcpDialer")
            .field("remote", &self.remote)
            .field("status", &self.status.get())
            .finish()
    }
}

/// Blocking wrapper: dials and parks the caller until the async callback
/// resolves the promise.
pub struct TcpSyncDialer;

impl TcpSyncDialer {
    pub fn dial(
        service: &Arc<Service>,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Arc<TcpTransport>> {
        let promise: BlockQueue<Result<Arc<TcpTransport>>> = BlockQueue::new();

        let dialed = promise.clone();
        let timed_out = promise.clone();
        let cbs = DialerCallbacks {
            on_dialed: Box::new(move |transport| {
                dialed.push(transport.ok_or(Error::Fault));
            }),
            on_timeout: Box::new(move || {
                timed_out.push(Err(Error::Timeout));
            }),
            on_stopped: Box::new(|| {}),
        };

        let dialer = TcpDialer::new(local, remote, connect_timeout);
        dialer.dial(service, cbs)?;

        promise.pop()
    }
}
