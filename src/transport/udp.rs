use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, OnceLock};

use log::warn;

use crate::epoll::Ready;
use crate::flow::{FlowRet, FlowUdp};
use crate::poller::{Channel, ChannelOps, TrackMode, Tracker};
use crate::service::Service;
use crate::transport::{Error, Result, Status, StatusCell, UdpCallbacks};

/// Largest datagram the read path hands to `on_read_from`.
const MAX_UDP_PAYLOAD: usize = 65536;

/// Datagram transport bound to one local address. No connection state: each
/// receive surfaces the peer address, each send names its destination.
pub struct UdpTransport {
    status: StatusCell,
    tracker_cnt: AtomicUsize,
    local: SocketAddr,
    flow: FlowUdp,

    service: OnceLock<Arc<Service>>,
    channel: OnceLock<Arc<Channel>>,
    tracker: OnceLock<Arc<Tracker>>,
    cbs: OnceLock<UdpCallbacks>,
}

impl UdpTransport {
    pub fn new(bind_addr: &SocketAddr) -> io::Result<Arc<UdpTransport>> {
        let flow = FlowUdp::new(bind_addr)?;
        let local = flow.local_addr()?;

        Ok(Arc::new(UdpTransport {
            status: StatusCell::new(),
            tracker_cnt: AtomicUsize::new(0),
            local,
            flow,
            service: OnceLock::new(),
            channel: OnceLock::new(),
            tracker: OnceLock::new(),
            cbs: OnceLock::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn is_started(&self) -> bool {
        self.status.is(Status::Started)
    }

    pub fn start(self: &Arc<Self>, service: &Arc<Service>, cbs: UdpCallbacks) -> Result<()> {
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
                    if let Some(t) = me.upgrade() {
                        t.on_read_event();
                    }
                })
            },
            on_send: Box::new(|| {}),
            on_error: Box::new(|| {}),
            on_event: Box::new(|_| {}),
            on_tracker: {
                let me = me.clone();
                Box::new(move |on| {
                    if let Some(t) = me.upgrade() {
                        t.on_tracker_event(on);
                    }
                })
            },
        };

        let channel = Channel::new(self.flow.fd(), ops);
        let tracker = Tracker::new(&channel, Ready::readable(), TrackMode::Oneshot);

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
        if self.status.transit(Status::Started, Status::Stopping) {
            if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
                service.remove_tracker(tracker);
            }
            return;
        }

        // A fatal read error got here first: upgrade so the terminal
        // callback is on_stopped.
        let _ = self
            .status
            .transit(Status::Disconnecting, Status::Stopping);
    }

    /// Send one datagram now. Zero-length payloads are valid.
    pub fn send_to(&self, b: &[u8], remote: &SocketAddr) -> Result<()> {
        if !self.status.is(Status::Started) {
            return Err(Error::Invalid);
        }

        match self.flow.send_to(b, remote) {
            FlowRet::Ok => Ok(()),
            FlowRet::Again => Err(Error::Again),
            _ => Err(Error::Fault),
        }
    }

    fn on_read_event(&self) {
        let mut buf = [0u8; MAX_UDP_PAYLOAD];

        match self.flow.read_from(&mut buf) {
            (FlowRet::Ok, n, Some(remote)) => {
                if let Some(cbs) = self.cbs.get() {
                    (cbs.on_read_from)(&buf[..n], remote);
                }
            }
            (FlowRet::Abort, _, _) => {
                // Hard socket error: re-arming would spin on it forever.
                self.try_disconnect();
                return;
            }
            _ => {}
        }

        if self.status.is(Status::Started) {
            if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
                service.resume_tracker(tracker);
            }
        }
    }

    fn try_disconnect(&self) {
        if self.status.transit(Status::Started, Status::Disconnecting) {
            warn!("udp transport {}: read failed, disconnecting", self.local);
            if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
                service.remove_tracker(tracker);
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

        if left == 0 {
            if self.status.transit(Status::Stopping, Status::Stopped) {
                if let Some(cbs) = self.cbs.get() {
                    (cbs.on_stopped)();
                }
            } else if self.status.transit(Status::Disconnecting, Status::Disconnected) {
                if let Some(cbs) = self.cbs.get() {
                    (cbs.on_disconnected)();
                }
            }
        }
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("UdpTransport")
            .field("local", &self.local)
            .field("status", &self.status.get())
            .finish()
    }
}
