use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, OnceLock};

use log::warn;

use crate::epoll::Ready;
use crate::flow::{FlowRet, FlowTcpAcceptor};
use crate::poller::{Channel, ChannelOps, TrackMode, Tracker};
use crate::service::Service;
use crate::transport::{AcceptorCallbacks, Error, Result, Status, StatusCell, TcpTransport};

/// Accepts TCP connections and hands each one to `on_accepted` as a ready
/// (not yet started) [`TcpTransport`].
pub struct TcpAcceptor {
    status: StatusCell,
    tracker_cnt: AtomicUsize,
    flow: FlowTcpAcceptor,

    service: OnceLock<Arc<Service>>,
    channel: OnceLock<Arc<Channel>>,
    tracker: OnceLock<Arc<Tracker>>,
    cbs: OnceLock<AcceptorCallbacks<TcpTransport>>,
}

impl TcpAcceptor {
    pub fn new(listen_addr: &SocketAddr) -> io::Result<Arc<TcpAcceptor>> {
        let flow = FlowTcpAcceptor::new(listen_addr)?;

        Ok(Arc::new(TcpAcceptor {
            status: StatusCell::new(),
            tracker_cnt: AtomicUsize::new(0),
            flow,
            service: OnceLock::new(),
            channel: OnceLock::new(),
            tracker: OnceLock::new(),
            cbs: OnceLock::new(),
        }))
    }

    /// The bound listen address; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.flow.local_addr()
    }

    pub fn start(
        self: &Arc<Self>,
        service: &Arc<Service>,
        cbs: AcceptorCallbacks<TcpTransport>,
    ) -> Result<()> {
        if !self.status.transit(Status::Init, Status::Starting) {
            return Err(Error::Invalid);
        }

        let _ = self.service.set(service.clone());
        let _ = self.cbs.set(cbs);

        let me = Arc::downgrade(self);
        let ops = ChannelOps {
            on_read: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(a) = me.upgrade() {
                        a.on_accept_event();
                    }
                })
            },
            on_send: Box::new(|| {}),
            on_error: Box::new(|| {}),
            on_event: Box::new(|_| {}),
            on_tracker: {
                let me = me.clone();
                Box::new(move |on| {
                    if let Some(a) = me.upgrade() {
                        a.on_tracker_event(on);
                    }
                })
            },
        };

        let channel = Channel::new(self.flow.fd(), ops);
        // Loop mode: edge-triggered without re-arming; the handler drains
        // the backlog on every event.
        let tracker = Tracker::new(&channel, Ready::readable(), TrackMode::Loop);

        let _ = self.channel.set(channel);
        let _ = self.tracker.set(tracker.clone());

        if !service.add_tracker(&tracker) {
            self.status.set(Status::Error);
            return Err(Error::Fault);
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

        if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
            service.remove_tracker(tracker);
        }
    }

    fn on_accept_event(&self) {
        loop {
            match self.flow.accept() {
                (FlowRet::Ok, Some((fd, remote))) => {
                    match TcpTransport::new(fd) {
                        Ok(transport) => {
                            if let Some(cbs) = self.cbs.get() {
                                (cbs.on_accepted)(transport);
                            }
                        }
                        Err(err) => {
                            warn!("acceptor: adopting fd from {} failed: {}", remote, err);
                        }
                    }
                }
                (FlowRet::Again, _) => break,
                _ => {
                    warn!("acceptor: accept failed on {}", self.local_addr());
                    break;
                }
            }
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

impl std::fmt::Debug for TcpAcceptor {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TcpAcceptor")
            .field("local", &self.local_addr())
            .field("status", &self.status.get())
            .finish()
    }
}
