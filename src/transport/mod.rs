use std::net::SocketAddr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use thiserror::Error;

pub use tcp::TcpTransport;
pub use tcp_acceptor::TcpAcceptor;
pub use tcp_dialer::{TcpDialer, TcpSyncDialer};
pub use tls::TlsTransport;
pub use tls_acceptor::TlsAcceptor;
pub use tls_dialer::{TlsDialer, TlsSyncDialer};
pub use tls_handshaker::TlsHandshaker;
pub use udp::UdpTransport;

mod tcp;
mod tcp_acceptor;
mod tcp_dialer;
mod tls;
mod tls_acceptor;
mod tls_dialer;
mod tls_handshaker;
mod udp;

/// Channel-event code: run the disconnect process on the dispatch thread.
pub(crate) const DISCONNECTED_EVENT: u32 = 1;

/// Failure codes at the public transport surface.
#[derive(Error, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    #[error("invalid state or arguments")]
    Invalid,
    #[error("socket or system call failure")]
    Fault,
    #[error("backpressure, retry later")]
    Again,
    #[error("transport disconnected")]
    Disconnected,
    #[error("operation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Transport lifecycle states. Transitions are atomic CAS; terminal states
/// are `Stopped`, `Disconnected`, `Timeout`, `Error` and `Finish`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum Status {
    Init = 0,
    Starting,
    Started,
    Paused,
    Stopping,
    Stopped,
    Disconnecting,
    Disconnected,
    Handshaking,
    Timeout,
    Error,
    Finish,
}

impl Status {
    fn from_u32(raw: u32) -> Status {
        match raw {
            0 => Status::Init,
            1 => Status::Starting,
            2 => Status::Started,
            3 => Status::Paused,
            4 => Status::Stopping,
            5 => Status::Stopped,
            6 => Status::Disconnecting,
            7 => Status::Disconnected,
            8 => Status::Handshaking,
            9 => Status::Timeout,
            10 => Status::Error,
            _ => Status::Finish,
        }
    }
}

/// CAS cell holding a [`Status`].
pub(crate) struct StatusCell(AtomicU32);

impl StatusCell {
    pub fn new() -> StatusCell {
        StatusCell(AtomicU32::new(Status::Init as u32))
    }

    pub fn get(&self) -> Status {
        Status::from_u32(self.0.load(Acquire))
    }

    pub fn is(&self, status: Status) -> bool {
        self.get() == status
    }

    /// CAS `from` → `to`; true when this call made the transition.
    pub fn transit(&self, from: Status, to: Status) -> bool {
        self.0
            .compare_exchange(from as u32, to as u32, AcqRel, Acquire)
            .is_ok()
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as u32, Release);
    }
}

/// Per-transport user callbacks, delivered on the poller thread owning the
/// transport, in order; at most one terminal callback fires.
pub struct TransportCallbacks {
    pub on_read: Box<dyn Fn(&[u8]) + Send + Sync>,
    pub on_disconnected: Box<dyn Fn() + Send + Sync>,
    pub on_stopped: Box<dyn Fn() + Send + Sync>,
}

impl Default for TransportCallbacks {
    fn default() -> Self {
        TransportCallbacks {
            on_read: Box::new(|_| {}),
            on_disconnected: Box::new(|| {}),
            on_stopped: Box::new(|| {}),
        }
    }
}

pub struct UdpCallbacks {
    pub on_read_from: Box<dyn Fn(&[u8], SocketAddr) + Send + Sync>,
    pub on_disconnected: Box<dyn Fn() + Send + Sync>,
    pub on_stopped: Box<dyn Fn() + Send + Sync>,
}

impl Default for UdpCallbacks {
    fn default() -> Self {
        UdpCallbacks {
            on_read_from: Box::new(|_, _| {}),
            on_disconnected: Box::new(|| {}),
            on_stopped: Box::new(|| {}),
        }
    }
}

pub struct AcceptorCallbacks<T> {
    pub on_accepted: Box<dyn Fn(Arc<T>) + Send + Sync>,
    pub on_stopped: Box<dyn Fn() + Send + Sync>,
}

impl<T> Default for AcceptorCallbacks<T> {
    fn default() -> Self {
        AcceptorCallbacks {
            on_accepted: Box::new(|_| {}),
            on_stopped: Box::new(|| {}),
        }
    }
}

pub struct DialerCallbacks<T> {
    /// `None` when the connect failed outright.
    pub on_dialed: Box<dyn Fn(Option<Arc<T>>) + Send + Sync>,
    pub on_timeout: Box<dyn Fn() + Send + Sync>,
    pub on_stopped: Box<dyn Fn() + Send + Sync>,
}

impl<T> Default for DialerCallbacks<T> {
    fn default() -> Self {
        DialerCallbacks {
            on_dialed: Box::new(|_| {}),
            on_timeout: Box::new(|| {}),
            on_stopped: Box::new(|| {}),
        }
    }
}

pub struct HandshakeCallbacks {
    pub on_handshaked: Box<dyn Fn(bool) + Send + Sync>,
}

impl Default for HandshakeCallbacks {
    fn default() -> Self {
        HandshakeCallbacks {
            on_handshaked: Box::new(|_| {}),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Status, StatusCell};

    #[test]
    fn cas_transitions() {
        let cell = StatusCell::new();
        assert!(cell.is(Status::Init));

        assert!(cell.transit(Status::Init, Status::Starting));
        assert!(!cell.transit(Status::Init, Status::Starting));
        assert!(cell.transit(Status::Starting, Status::Started));
        assert!(cell.transit(Status::Started, Status::Stopping));
        assert!(cell.transit(Status::Stopping, Status::Stopped));
        assert!(cell.is(Status::Stopped));
    }
}
