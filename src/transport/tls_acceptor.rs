use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use indexmap::IndexMap;
use log::warn;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::epoll::Ready;
use crate::flow::{FlowRet, FlowTcpAcceptor, FlowTls};
use crate::poller::{Channel, ChannelOps, TrackMode, Tracker};
use crate::service::Service;
use crate::transport::{
    AcceptorCallbacks, Error, HandshakeCallbacks, Result, Status, StatusCell, TlsHandshaker,
    TlsTransport,
};

/// Accepts TCP connections and runs a server-side TLS handshake on each;
/// `on_accepted` sees only connections that completed the handshake within
/// the configured budget.
///
/// Handshakers in flight are retained in a table keyed by their id and
/// removed on completion or timeout.
pub struct TlsAcceptor {
    status: StatusCell,
    tracker_cnt: AtomicUsize,
    flow: FlowTcpAcceptor,
    config: Arc<ServerConfig>,
    handshake_timeout: Duration,
    handshakers: Mutex<IndexMap<u64, Arc<TlsHandshaker>>>,

    service: OnceLock<Arc<Service>>,
    channel: OnceLock<Arc<Channel>>,
    tracker: OnceLock<Arc<Tracker>>,
    cbs: OnceLock<AcceptorCallbacks<TlsTransport>>,
    weak_self: OnceLock<std::sync::Weak<TlsAcceptor>>,
}

impl TlsAcceptor {
    pub fn new(
        config: Arc<ServerConfig>,
        listen_addr: &SocketAddr,
        handshake_timeout: Duration,
    ) -> io::Result<Arc<TlsAcceptor>> {
        let flow = FlowTcpAcceptor::new(listen_addr)?;

        Ok(Arc::new(TlsAcceptor {
            status: StatusCell::new(),
            tracker_cnt: AtomicUsize::new(0),
            flow,
            config,
            handshake_timeout,
            handshakers: Mutex::new(IndexMap::new()),
            service: OnceLock::new(),
            channel: OnceLock::new(),
            tracker: OnceLock::new(),
            cbs: OnceLock::new(),
            weak_self: OnceLock::new(),
        }))
    }

    pub fn with_cert_chain(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        listen_addr: &SocketAddr,
        handshake_timeout: Duration,
    ) -> io::Result<Arc<TlsAcceptor>> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        Self::new(Arc::new(config), listen_addr, handshake_timeout)
    }

    pub fn from_pem_files(
        cert_path: &Path,
        key_path: &Path,
        listen_addr: &SocketAddr,
        handshake_timeout: Duration,
    ) -> io::Result<Arc<TlsAcceptor>> {
        let mut cert_reader = BufReader::new(File::open(cert_path)?);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut key_reader = BufReader::new(File::open(key_path)?);
        let key = rustls_pemfile::private_key(&mut key_reader)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no private key found"))?;

        Self::with_cert_chain(certs, key, listen_addr, handshake_timeout)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.flow.local_addr()
    }

    pub fn start(
        self: &Arc<Self>,
        service: &Arc<Service>,
        cbs: AcceptorCallbacks<TlsTransport>,
    ) -> Result<()> {
        if !self.status.transit(Status::Init, Status::Starting) {
            return Err(Error::Invalid);
        }

        let _ = self.service.set(service.clone());
        let _ = self.cbs.set(cbs);
        let _ = self.weak_self.set(Arc::downgrade(self));

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

        let pending: Vec<Arc<TlsHandshaker>> = {
            let mut handshakers = self.handshakers.lock().unwrap();
            handshakers.drain(..).map(|(_, hs)| hs).collect()
        };
        for hs in pending {
            hs.stop();
        }
    }

    fn on_accept_event(&self) {
        let service = match self.service.get() {
            Some(service) => service.clone(),
            None => return,
        };

        loop {
            match self.flow.accept() {
                (FlowRet::Ok, Some((fd, remote))) => {
                    let flow = match FlowTls::server(fd, self.config.clone()) {
                        Ok(flow) => flow,
                        Err(err) => {
                            warn!("tls acceptor: adopting fd from {} failed: {}", remote, err);
                            continue;
                        }
                    };

                    let hs = TlsHandshaker::new(flow);
                    let id = hs.id();
                    self.handshakers.lock().unwrap().insert(id, hs.clone());

                    let me = match self.weak_self.get() {
                        Some(weak) => weak.clone(),
                        None => break,
                    };
                    let cbs = HandshakeCallbacks {
                        on_handshaked: Box::new(move |success| {
                            if let Some(acceptor) = me.upgrade() {
                                acceptor.on_handshaked(id, success);
                            }
                        }),
                    };

                    if hs.start(&service, self.handshake_timeout, cbs).is_err() {
                        self.handshakers.lock().unwrap().swap_remove(&id);
                    }
                }
                (FlowRet::Again, _) => break,
                _ => {
                    warn!("tls acceptor: accept failed on {}", self.local_addr());
                    break;
                }
            }
        }
    }

    fn on_handshaked(&self, id: u64, success: bool) {
        let hs = self.handshakers.lock().unwrap().swap_remove(&id);

        if !success || !self.status.is(Status::Started) {
            return;
        }

        let flow = match hs.and_then(|hs| hs.take_flow()) {
            Some(flow) => flow,
            None => return,
        };

        match TlsTransport::from_flow(flow) {
            Ok(transport) => {
                if let Some(cbs) = self.cbs.get() {
                    (cbs.on_accepted)(transport);
                }
            }
            Err(err) => warn!("tls acceptor: adopting handshaked flow failed: {}", err),
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

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TlsAcceptor")
            .field("local", &self.local_addr())
            .field("status", &self.status.get())
            .finish()
    }
}
