use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, OnceLock};

use concurrent_queue::ConcurrentQueue;
use log::debug;

use crate::buffer::{IoBuffer, MAX_FLOW_BUFFER_SIZE};
use crate::epoll::Ready;
use crate::flow::{FlowRet, FlowTcp};
use crate::poller::{Channel, ChannelOps, TrackMode, Tracker};
use crate::service::Service;
use crate::transport::{
    Error, Result, Status, StatusCell, TransportCallbacks, DISCONNECTED_EVENT,
};

/// Stream transport over a connected TCP socket.
///
/// The read side is affined to one poller; `send` may be called from any
/// thread and is serialized by the send-chance flag: whoever flips it
/// becomes the writer and drains the send list until it is empty or the
/// socket pushes back.
pub struct TcpTransport {
    status: StatusCell,
    tracker_cnt: AtomicUsize,
    local: SocketAddr,
    remote: SocketAddr,
    flow: FlowTcp,

    service: OnceLock<Arc<Service>>,
    channel: OnceLock<Arc<Channel>>,
    r_tracker: OnceLock<Arc<Tracker>>,
    s_tracker: OnceLock<Arc<Tracker>>,
    cbs: OnceLock<TransportCallbacks>,

    sendlist: ConcurrentQueue<IoBuffer>,
    next_send_chance: AtomicBool,
    pending_send_size: AtomicUsize,
    inflight: AtomicUsize,
    max_pending_send_size: AtomicUsize,

    read_loop: AtomicBool,
}

impl TcpTransport {
    /// Adopt an established socket; addresses are read back from the fd.
    pub fn new(fd: RawFd) -> io::Result<Arc<TcpTransport>> {
        let flow = FlowTcp::new(fd)?;
        let local = flow.local_addr()?;
        let remote = flow.peer_addr()?;
        Ok(Self::build(flow, local, remote))
    }

    /// Adopt an established socket with known addresses.
    pub fn with_addrs(
        fd: RawFd,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> io::Result<Arc<TcpTransport>> {
        let flow = FlowTcp::new(fd)?;
        Ok(Self::build(flow, local, remote))
    }

    pub(crate) fn from_socket(socket: crate::sys::socket::Socket) -> io::Result<Arc<TcpTransport>> {
        let local = socket.local_addr()?;
        let remote = socket.peer_addr()?;
        Self::with_addrs(socket.into_raw(), local, remote)
    }

    fn build(flow: FlowTcp, local: SocketAddr, remote: SocketAddr) -> Arc<TcpTransport> {
        Arc::new(TcpTransport {
            status: StatusCell::new(),
            tracker_cnt: AtomicUsize::new(0),
            local,
            remote,
            flow,
            service: OnceLock::new(),
            channel: OnceLock::new(),
            r_tracker: OnceLock::new(),
            s_tracker: OnceLock::new(),
            cbs: OnceLock::new(),
            sendlist: ConcurrentQueue::unbounded(),
            next_send_chance: AtomicBool::new(false),
            pending_send_size: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            max_pending_send_size: AtomicUsize::new(0),
            read_loop: AtomicBool::new(true),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_started(&self) -> bool {
        self.status.is(Status::Started)
    }

    pub fn pending_send_size(&self) -> usize {
        self.pending_send_size.load(Acquire)
    }

    /// Live trackers registered for this transport; drops back to zero
    /// before the terminal callback fires.
    pub fn tracker_count(&self) -> usize {
        self.tracker_cnt.load(Acquire)
    }

    /// Move `Init → Starting → Started`: install read and send trackers and
    /// arm the first read. `max_pending_send_size` of 0 means unlimited.
    pub fn start(
        self: &Arc<Self>,
        service: &Arc<Service>,
        max_pending_send_size: usize,
        cbs: TransportCallbacks,
    ) -> Result<()> {
        if !self.status.transit(Status::Init, Status::Starting) {
            return Err(Error::Invalid);
        }

        let _ = self.service.set(service.clone());
        let _ = self.cbs.set(cbs);
        self.max_pending_send_size
            .store(max_pending_send_size, Relaxed);

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
            on_send: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(t) = me.upgrade() {
                        t.on_send_event();
                    }
                })
            },
            on_error: {
                let me = me.clone();
                Box::new(move || {
                    if let Some(t) = me.upgrade() {
                        t.try_disconnect();
                    }
                })
            },
            on_event: {
                let me = me.clone();
                Box::new(move |code| {
                    if let Some(t) = me.upgrade() {
                        t.handle_channel_event(code);
                    }
                })
            },
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

        if !self.status.transit(Status::Starting, Status::Started) {
            return Err(Error::Fault);
        }

        Ok(())
    }

    /// Graceful stop: reads halt now, queued sends drain, then the socket
    /// closes and `on_stopped` fires.
    pub fn stop(&self) {
        loop {
            if self.status.transit(Status::Started, Status::Stopping)
                || self.status.transit(Status::Paused, Status::Stopping)
            {
                if let (Some(service), Some(r_tracker)) = (self.service.get(), self.r_tracker.get())
                {
                    service.remove_tracker(r_tracker);
                }
                // Drain or finalize the write side unless a writer already
                // owns the chance; that writer observes Stopping itself.
                self.try_drive_send();
                return;
            }

            if !(self.status.is(Status::Started) || self.status.is(Status::Paused)) {
                break;
            }
        }

        // Disconnected under our feet: upgrade so the terminal callback is
        // on_stopped.
        let _ = self
            .status
            .transit(Status::Disconnecting, Status::Stopping);
    }

    /// Immediate stop: the queue is discarded and the socket closed.
    pub fn force_stop(&self) {
        loop {
            if self.status.transit(Status::Started, Status::Stopping)
                || self.status.transit(Status::Paused, Status::Stopping)
            {
                self.clear_sendlist();
                self.flow.shutdown();
                self.remove_all_trackers();
                return;
            }

            if !(self.status.is(Status::Started) || self.status.is(Status::Paused)) {
                break;
            }
        }

        let _ = self
            .status
            .transit(Status::Disconnecting, Status::Stopping);
    }

    /// Halt the read side without tearing anything down.
    pub fn pause(&self) -> Result<()> {
        if !self.status.transit(Status::Started, Status::Paused) {
            return Err(Error::Invalid);
        }

        if let (Some(service), Some(r_tracker)) = (self.service.get(), self.r_tracker.get()) {
            service.pause_tracker(r_tracker);
        }
        Ok(())
    }

    pub fn restart(&self) -> Result<()> {
        if !self.status.transit(Status::Paused, Status::Started) {
            return Err(Error::Invalid);
        }

        self.resume_read();
        Ok(())
    }

    /// Deliver a single `on_read` for the next readable event.
    pub fn read_for_once(&self) -> Result<()> {
        if !self.status.is(Status::Started) {
            return Err(Error::Invalid);
        }

        self.read_loop.store(false, Release);
        self.resume_read();
        Ok(())
    }

    /// Deliver `on_read` continuously (the default).
    pub fn read_for_loop(&self) -> Result<()> {
        if !self.status.is(Status::Started) {
            return Err(Error::Invalid);
        }

        self.read_loop.store(true, Release);
        self.resume_read();
        Ok(())
    }

    /// Queue `b` for sending, segmented into 4 KiB buffers.
    ///
    /// Rejected with `Invalid` for empty input or a transport that is not
    /// started, and with `Again` — without enqueuing anything — once the
    /// pending-send cap would be exceeded.
    pub fn send(&self, b: &[u8]) -> Result<()> {
        if b.is_empty() {
            return Err(Error::Invalid);
        }

        if !self.status.is(Status::Started) {
            return Err(Error::Invalid);
        }

        let max = self.max_pending_send_size.load(Relaxed);
        let mut cur = self.pending_send_size.load(Acquire);
        loop {
            if max != 0 && cur + b.len() > max {
                return Err(Error::Again);
            }
            match self.pending_send_size.compare_exchange(
                cur,
                cur + b.len(),
                AcqRel,
                Acquire,
            ) {
                Ok(_) => break,
                Err(now) => cur = now,
            }
        }

        for chunk in b.chunks(MAX_FLOW_BUFFER_SIZE) {
            if self.sendlist.push(IoBuffer::from_slice(chunk)).is_err() {
                self.pending_send_size.fetch_sub(b.len(), AcqRel);
                return Err(Error::Fault);
            }
        }

        self.try_drive_send();
        Ok(())
    }

    fn resume_read(&self) {
        if let (Some(service), Some(r_tracker)) = (self.service.get(), self.r_tracker.get()) {
            service.resume_tracker(r_tracker);
        }
    }

    fn resume_send(&self) {
        if let (Some(service), Some(s_tracker)) = (self.service.get(), self.s_tracker.get()) {
            service.resume_tracker(s_tracker);
        }
    }

    fn remove_all_trackers(&self) {
        if let Some(service) = self.service.get() {
            if let Some(r_tracker) = self.r_tracker.get() {
                service.remove_tracker(r_tracker);
            }
            if let Some(s_tracker) = self.s_tracker.get() {
                service.remove_tracker(s_tracker);
            }
        }
    }

    fn clear_sendlist(&self) {
        while self.sendlist.pop().is_ok() {}
        self.pending_send_size.store(0, Release);
        self.inflight.store(0, Release);
    }

    fn on_read_event(&self) {
        let mut buf = [0u8; MAX_FLOW_BUFFER_SIZE];

        match self.flow.read(&mut buf) {
            (FlowRet::Ok, n) => {
                if let Some(cbs) = self.cbs.get() {
                    (cbs.on_read)(&buf[..n]);
                }
                if self.read_loop.load(Acquire) && self.status.is(Status::Started) {
                    self.resume_read();
                }
            }
            (FlowRet::NoData, _) => {
                // Not under Paused: a stale event must not undo the pause.
                if self.status.is(Status::Started) {
                    self.resume_read();
                }
            }
            _ => self.try_disconnect(),
        }
    }

    fn on_send_event(&self) {
        if self.flow.has_data_to_send() {
            // A partial write retained the send chance for this event.
            self.drive_send();
        } else {
            self.try_drive_send();
        }
    }

    fn try_drive_send(&self) {
        if !self.next_send_chance.swap(true, AcqRel) {
            self.drive_send();
        }
    }

    /// Writer loop; the caller holds the send chance.
    fn drive_send(&self) {
        loop {
            match self.flow.send() {
                FlowRet::Ok => {
                    let n = self.inflight.swap(0, AcqRel);
                    if n > 0 {
                        self.pending_send_size.fetch_sub(n, AcqRel);
                    }
                }
                FlowRet::NoData => match self.sendlist.pop() {
                    Ok(iob) => {
                        self.inflight.store(iob.data_len(), Release);
                        self.flow.want_to_send(&iob);
                    }
                    Err(_) => {
                        if self.status.is(Status::Stopping) {
                            self.finalize_graceful_stop();
                            self.next_send_chance.store(false, Release);
                            return;
                        }

                        self.next_send_chance.store(false, Release);

                        // A concurrent send may have enqueued after our pop
                        // while we still held the chance; never leave a
                        // queued buffer without a writer.
                        if (!self.sendlist.is_empty() || self.status.is(Status::Stopping))
                            && !self.next_send_chance.swap(true, AcqRel)
                        {
                            continue;
                        }
                        return;
                    }
                },
                FlowRet::Again => {
                    // Chance stays held; the next write-readiness event
                    // re-enters the loop.
                    self.resume_send();
                    return;
                }
                FlowRet::Abort => {
                    self.next_send_chance.store(false, Release);
                    self.try_disconnect();
                    return;
                }
            }
        }
    }

    fn finalize_graceful_stop(&self) {
        if let (Some(service), Some(s_tracker)) = (self.service.get(), self.s_tracker.get()) {
            service.remove_tracker(s_tracker);
        }
        self.flow.shutdown();
    }

    fn try_disconnect(&self) {
        if self.status.transit(Status::Started, Status::Disconnecting)
            || self.status.transit(Status::Paused, Status::Disconnecting)
        {
            debug!("tcp transport {} -> {}: disconnecting", self.local, self.remote);
            if let (Some(service), Some(channel)) = (self.service.get(), self.channel.get()) {
                service.post_channel_event(channel, DISCONNECTED_EVENT);
            }
        }
    }

    fn handle_channel_event(&self, code: u32) {
        if code == DISCONNECTED_EVENT {
            self.clear_sendlist();
            self.flow.shutdown();
            self.remove_all_trackers();
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
            self.try_finalize();
        }
    }

    /// All trackers are gone; fire the terminal callback exactly once.
    fn try_finalize(&self) {
        if self.status.transit(Status::Stopping, Status::Stopped) {
            self.flow.shutdown();
            if let Some(cbs) = self.cbs.get() {
                (cbs.on_stopped)();
            }
        } else if self.status.transit(Status::Disconnecting, Status::Disconnected) {
            self.flow.shutdown();
            if let Some(cbs) = self.cbs.get() {
                (cbs.on_disconnected)();
            }
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TcpTransport")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("status", &self.status.get())
            .finish()
    }
}
