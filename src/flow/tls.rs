use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use log::debug;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;

use crate::buffer::{IoBuffer, MAX_FLOW_BUFFER_SIZE};
use crate::flow::{FlowRet, FlowTcp};

/// Outcome of one handshake-driving step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HandshakeStatus {
    /// Handshake complete; the flow carries application data now.
    Done,
    /// Waiting for the peer; `want_send` is set when outbound records are
    /// still queued behind a full socket buffer.
    Pending { want_send: bool },
    /// Fatal alert, malformed record, or transport failure.
    Abort,
}

/// TLS flow: a record engine layered over a TCP flow.
///
/// Plaintext goes in through `send_to_ssl`, records come back out of the
/// underlying TCP send buffer; `read_from_ssl` decodes the opposite
/// direction. `Again` from the TCP layer propagates unchanged.
pub struct FlowTls {
    tcp: FlowTcp,
    session: Mutex<Connection>,
}

impl FlowTls {
    pub fn client(fd: RawFd, config: Arc<ClientConfig>, server_name: &str) -> io::Result<FlowTls> {
        let tcp = FlowTcp::new(fd)?;

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid server name"))?;
        let session = ClientConnection::new(config, name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(FlowTls {
            tcp,
            session: Mutex::new(Connection::Client(session)),
        })
    }

    pub fn server(fd: RawFd, config: Arc<ServerConfig>) -> io::Result<FlowTls> {
        let tcp = FlowTcp::new(fd)?;

        let session = ServerConnection::new(config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(FlowTls {
            tcp,
            session: Mutex::new(Connection::Server(session)),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.tcp.fd()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.peer_addr()
    }

    /// Move queued records into the TCP send buffer and push them to the
    /// socket. `Ok` means everything pending went out.
    fn flush_records(&self, session: &mut Connection) -> FlowRet {
        while session.wants_write() {
            let mut out = Vec::with_capacity(MAX_FLOW_BUFFER_SIZE);
            if session.write_tls(&mut out).is_err() {
                return FlowRet::Abort;
            }
            if out.is_empty() {
                break;
            }
            self.tcp.want_to_send(&IoBuffer::from_slice(&out));
        }

        match self.tcp.send() {
            FlowRet::NoData => FlowRet::Ok,
            ret => ret,
        }
    }

    fn feed_records(&self, session: &mut Connection, raw: &[u8]) -> FlowRet {
        let mut cursor = raw;
        while !cursor.is_empty() {
            match session.read_tls(&mut cursor) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => return FlowRet::Abort,
            }
        }

        if let Err(err) = session.process_new_packets() {
            debug!("tls: record processing failed: {}", err);
            // Best effort: put the alert on the wire before giving up.
            let _ = self.flush_records(session);
            return FlowRet::Abort;
        }

        FlowRet::Ok
    }

    /// Drive handshake record I/O one step.
    pub fn handshake(&self) -> HandshakeStatus {
        let mut session = self.session.lock().unwrap();

        loop {
            match self.flush_records(&mut session) {
                FlowRet::Ok => {}
                FlowRet::Again => return HandshakeStatus::Pending { want_send: true },
                _ => return HandshakeStatus::Abort,
            }

            if !session.is_handshaking() {
                return HandshakeStatus::Done;
            }

            let mut raw = [0u8; MAX_FLOW_BUFFER_SIZE];
            match self.tcp.read(&mut raw) {
                (FlowRet::Ok, n) => {
                    if self.feed_records(&mut session, &raw[..n]) != FlowRet::Ok {
                        return HandshakeStatus::Abort;
                    }
                }
                (FlowRet::NoData, _) => {
                    return HandshakeStatus::Pending {
                        want_send: session.wants_write(),
                    }
                }
                _ => return HandshakeStatus::Abort,
            }
        }
    }

    /// Feed plaintext to the engine and flush the produced records.
    pub fn send_to_ssl(&self, iob: &IoBuffer) -> FlowRet {
        let mut session = self.session.lock().unwrap();

        if session.writer().write_all(iob.data()).is_err() {
            return FlowRet::Abort;
        }

        self.flush_records(&mut session)
    }

    /// Continue flushing after a write-readiness event.
    pub fn continue_send(&self) -> FlowRet {
        let mut session = self.session.lock().unwrap();
        self.flush_records(&mut session)
    }

    pub fn has_data_to_send(&self) -> bool {
        if self.tcp.has_data_to_send() {
            return true;
        }
        self.session.lock().unwrap().wants_write()
    }

    /// Pull records off the wire and return decoded plaintext.
    pub fn read_from_ssl(&self, buf: &mut [u8]) -> (FlowRet, usize) {
        let mut session = self.session.lock().unwrap();

        if let Some(ret) = drain_plaintext(&mut session, buf) {
            return ret;
        }

        let mut raw = [0u8; MAX_FLOW_BUFFER_SIZE];
        match self.tcp.read(&mut raw) {
            (FlowRet::Ok, n) => {
                if self.feed_records(&mut session, &raw[..n]) != FlowRet::Ok {
                    return (FlowRet::Abort, 0);
                }
                // Key updates and tickets may queue records of their own.
                if session.wants_write() {
                    let _ = self.flush_records(&mut session);
                }
                drain_plaintext(&mut session, buf).unwrap_or((FlowRet::NoData, 0))
            }
            (FlowRet::NoData, _) => (FlowRet::NoData, 0),
            _ => (FlowRet::Abort, 0),
        }
    }

    pub fn shutdown(&self) {
        self.tcp.shutdown();
    }
}

fn drain_plaintext(session: &mut Connection, buf: &mut [u8]) -> Option<(FlowRet, usize)> {
    match session.reader().read(buf) {
        // Clean closure: the peer sent close_notify.
        Ok(0) => Some((FlowRet::Abort, 0)),
        Ok(n) => Some((FlowRet::Ok, n)),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => None,
        Err(_) => Some((FlowRet::Abort, 0)),
    }
}
