use std::net::SocketAddr;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use log::debug;
use rustls::ClientConfig;

use crate::block_queue::BlockQueue;
use crate::epoll::Ready;
use crate::flow::{FlowTcpDialer, FlowTls};
use crate::poller::{Channel, ChannelOps, TrackMode, Tracker};
use crate::service::Service;
use crate::timer::Timer;
use crate::transport::{
    DialerCallbacks, Error, HandshakeCallbacks, Result, Status, StatusCell, TlsHandshaker,
    TlsTransport,
};

/// Dials TCP, then drives a client-side TLS handshake before surfacing the
/// transport. The connect and the handshake each run under their own
/// timeout budget; losing racers are no-ops under the status CAS.
pub struct TlsDialer {
    status: StatusCell,
    tracker_cnt: AtomicUsize,
    local: Option<SocketAddr>,
    remote: SocketAddr,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    config: Arc<ClientConfig>,
    server_name: String,

    flow: OnceLock<FlowTcpDialer>,
    handshaker: Mutex<Option<Arc<TlsHandshaker>>>,
    service: OnceLock<Arc<Service>>,
    channel: OnceLock<Arc<Channel>>,
    tracker: OnceLock<Arc<Tracker>>,
    timer: Mutex<Option<Arc<Timer>>>,
    cbs: OnceLock<DialerCallbacks<TlsTransport>>,
    weak_self: OnceLock<Weak<TlsDialer>>,
}

impl TlsDialer {
    pub fn new(
        config: Arc<ClientConfig>,
        server_name: &str,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        connect_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Arc<TlsDialer> {
        Arc::new(TlsDialer {
            status: StatusCell::new(),
            tracker_cnt: AtomicUsize::new(0),
            local,
            remote,
            connect_timeout,
            handshake_timeout,
            config,
            server_name: server_name.to_string(),
            flow: OnceLock::new(),
            handshaker: Mutex::new(None),
            service: OnceLock::new(),
            channel: OnceLock::new(),
            tracker: OnceLock::new(),
            timer: Mutex::new(None),
            cbs: OnceLock::new(),
            weak_self: OnceLock::new(),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn dial(
        self: &Arc<Self>,
        service: &Arc<Service>,
        cbs: DialerCallbacks<TlsTransport>,
    ) -> Result<()> {
        if !self.status.transit(Status::Init, Status::Starting) {
            return Err(Error::Invalid);
        }

        let _ = self.service.set(service.clone());
        let _ = self.cbs.set(cbs);
        let _ = self.weak_self.set(Arc::downgrade(self));

        let (flow, _established) = match FlowTcpDialer::new(self.local.as_ref(), &self.remote) {
            Ok(pair) => pair,
            Err(err) => {
                debug!(
                    "tls dialer: connect to {} failed to start: {}",
                    self.remote, err
                );
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
        if self.status.transit(Status::Started, Status::Stopping) {
            self.cancel_timer();
            if let Some(flow) = self.flow.get() {
                flow.close();
            }
            if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
                service.remove_tracker(tracker);
            }
            return;
        }

        if self.status.transit(Status::Handshaking, Status::Stopping) {
            let hs = self.handshaker.lock().unwrap().take();
            if let Some(hs) = hs {
                // Fires on_handshaked(false); the failure path below maps
                // Stopping to the on_stopped callback.
                hs.stop();
            }
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.stop();
        }
    }

    fn on_connect_event(&self) {
        if !self.status.transit(Status::Started, Status::Handshaking) {
            return;
        }

        self.cancel_timer();
        if let (Some(service), Some(tracker)) = (self.service.get(), self.tracker.get()) {
            service.remove_tracker(tracker);
        }

        let service = match self.service.get() {
            Some(service) => service.clone(),
            None => return,
        };

        let flow = match self.flow.get() {
            Some(flow) => flow,
            None => return,
        };

        if let Err(err) = flow.connect_result() {
            debug!("tls dialer: connect to {} failed: {}", self.remote, err);
            flow.close();
            self.fail_dial();
            return;
        }

        let socket = match flow.take_socket() {
            Some(socket) => socket,
            None => {
                self.fail_dial();
                return;
            }
        };

        let tls_flow = match FlowTls::client(socket.into_raw(), self.config.clone(), &self.server_name)
        {
            Ok(flow) => flow,
            Err(err) => {
                debug!("tls dialer: tls engine setup failed: {}", err);
                self.fail_dial();
                return;
            }
        };

        let hs = TlsHandshaker::new(tls_flow);
        *self.handshaker.lock().unwrap() = Some(hs.clone());

        let me = match self.weak_self.get() {
            Some(weak) => weak.clone(),
            None => return,
        };
        let cbs = HandshakeCallbacks {
            on_handshaked: Box::new(move |success| {
                if let Some(dialer) = me.upgrade() {
                    dialer.on_handshaked(success);
                }
            }),
        };

        if hs.start(&service, self.handshake_timeout, cbs).is_err() {
            self.handshaker.lock().unwrap().take();
            self.fail_dial();
        }
    }

    fn fail_dial(&self) {
        if self.status.transit(Status::Handshaking, Status::Error) {
            if let Some(cbs) = self.cbs.get() {
                (cbs.on_dialed)(None);
            }
        }
    }

    fn on_handshaked(&self, success: bool) {
        let hs = self.handshaker.lock().unwrap().take();

        if success {
            if self.status.transit(Status::Handshaking, Status::Finish) {
                let transport = hs
                    .and_then(|hs| hs.take_flow())
                    .and_then(|flow| TlsTransport::from_flow(flow).ok());
                if let Some(cbs) = self.cbs.get() {
                    (cbs.on_dialed)(transport);
                }
            } else if self.status.transit(Status::Stopping, Status::Stopped) {
                if let Some(cbs) = self.cbs.get() {
                    (cbs.on_stopped)();
                }
            }
            return;
        }

        let timed_out = hs.map(|hs| hs.status() == Status::Timeout).unwrap_or(false);

        if timed_out && self.status.transit(Status::Handshaking, Status::Timeout) {
            if let Some(cbs) = self.cbs.get() {
                (cbs.on_timeout)();
            }
        } else if self.status.transit(Status::Handshaking, Status::Error) {
            if let Some(cbs) = self.cbs.get() {
                (cbs.on_dialed)(None);
            }
        } else if self.status.transit(Status::Stopping, Status::Stopped) {
            if let Some(cbs) = self.cbs.get() {
                (cbs.on_stopped)();
            }
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

impl std::fmt::Debug for TlsDialer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TlsDialer")
            .field("remote", &self.remote)
            .field("status", &self.status.get())
            .finish()
    }
}

/// Blocking wrapper around [`TlsDialer`].
pub struct TlsSyncDialer;

impl TlsSyncDialer {
    pub fn dial(
        service: &Arc<Service>,
        config: Arc<ClientConfig>,
        server_name: &str,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        connect_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Result<Arc<TlsTransport>> {
        let promise: BlockQueue<Result<Arc<TlsTransport>>> = BlockQueue::new();

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

        let dialer = TlsDialer::new(
            config,
            server_name,
            local,
            remote,
            connect_timeout,
            handshake_timeout,
        );
        dialer.dial(service, cbs)?;

        promise.pop()
    }
}
