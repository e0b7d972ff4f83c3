use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use crate::sys::socket::Socket;

/// Outbound-connect flow: non-blocking connect at init, completion observed
/// via write readiness plus `SO_ERROR`.
pub struct FlowTcpDialer {
    socket: Mutex<Option<Socket>>,
    fd: RawFd,
    remote: SocketAddr,
}

impl FlowTcpDialer {
    /// Create the socket, optionally bind `local`, and start the connect.
    /// The second return value is true when the connect finished
    /// immediately (loopback fast path).
    pub fn new(
        local: Option<&SocketAddr>,
        remote: &SocketAddr,
    ) -> io::Result<(FlowTcpDialer, bool)> {
        let socket = Socket::stream(remote)?;

        if let Some(local) = local {
            socket.set_reuseaddr()?;
            socket.bind(local)?;
        }

        let established = socket.connect(remote)?;
        let fd = socket.raw();

        Ok((
            FlowTcpDialer {
                socket: Mutex::new(Some(socket)),
                fd,
                remote: *remote,
            },
            established,
        ))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self.socket.lock().unwrap().as_ref() {
            Some(socket) => socket.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "socket taken")),
        }
    }

    /// Check the pending connect after write readiness fired.
    pub fn connect_result(&self) -> io::Result<()> {
        match self.socket.lock().unwrap().as_ref() {
            Some(socket) => match socket.take_error()? {
                None => Ok(()),
                Some(err) => Err(err),
            },
            None => Err(io::Error::new(io::ErrorKind::NotFound, "socket taken")),
        }
    }

    /// Hand the established socket to a transport.
    pub fn take_socket(&self) -> Option<Socket> {
        self.socket.lock().unwrap().take()
    }

    pub fn close(&self) {
        self.socket.lock().unwrap().take();
    }
}

#[cfg(test)]
mod test {
    use super::FlowTcpDialer;
    use std::net::TcpListener;

    #[test]
    fn connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();

        let (dialer, _established) = FlowTcpDialer::new(None, &target).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        dialer.connect_result().unwrap();
        assert!(dialer.take_socket().is_some());
        assert!(dialer.take_socket().is_none());
    }
}
