use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use crate::flow::FlowRet;
use crate::sys::socket::Socket;

const LISTEN_BACKLOG: libc::c_int = 1024;

/// Listen-socket flow: bind + listen at init, non-blocking accept after.
pub struct FlowTcpAcceptor {
    socket: Socket,
    local: SocketAddr,
}

impl FlowTcpAcceptor {
    pub fn new(listen_addr: &SocketAddr) -> io::Result<FlowTcpAcceptor> {
        let socket = Socket::stream(listen_addr)?;
        socket.set_reuseaddr()?;
        socket.bind(listen_addr)?;
        socket.listen(LISTEN_BACKLOG)?;
        let local = socket.local_addr()?;

        Ok(FlowTcpAcceptor { socket, local })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.raw()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// One accept attempt. `Again` means the backlog is drained; aborted
    /// connections are skipped the same way.
    pub fn accept(&self) -> (FlowRet, Option<(RawFd, SocketAddr)>) {
        match self.socket.accept() {
            Ok((socket, remote)) => (FlowRet::Ok, Some((socket.into_raw(), remote))),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => (FlowRet::Again, None),
            Err(ref e) if e.raw_os_error() == Some(libc::ECONNABORTED) => (FlowRet::Again, None),
            Err(_) => (FlowRet::Abort, None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::FlowTcpAcceptor;
    use crate::flow::FlowRet;
    use std::net::TcpStream;

    #[test]
    fn bind_ephemeral_and_accept() {
        let listen = "127.0.0.1:0".parse().unwrap();
        let acceptor = FlowTcpAcceptor::new(&listen).unwrap();
        assert_ne!(acceptor.local_addr().port(), 0);

        // Nothing queued yet.
        let (ret, pending) = acceptor.accept();
        assert_eq!(ret, FlowRet::Again);
        assert!(pending.is_none());

        let _client = TcpStream::connect(acceptor.local_addr()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let (ret, pending) = acceptor.accept();
        assert_eq!(ret, FlowRet::Ok);
        let (fd, _remote) = pending.unwrap();
        unsafe {
            libc::close(fd);
        }
    }
}
