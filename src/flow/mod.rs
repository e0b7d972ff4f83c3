pub use tcp::FlowTcp;
pub use tcp_acceptor::FlowTcpAcceptor;
pub use tcp_dialer::FlowTcpDialer;
pub use tls::{FlowTls, HandshakeStatus};
pub use udp::FlowUdp;

mod tcp;
mod tcp_acceptor;
mod tcp_dialer;
mod tls;
mod udp;

/// Flow-level result of one socket operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlowRet {
    /// Operation completed.
    Ok,
    /// Partial progress; retry on the next readiness event.
    Again,
    /// Nothing to do (empty send buffer, no bytes to read).
    NoData,
    /// Peer closed or hard error.
    Abort,
}
