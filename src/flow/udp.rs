use std::io;
use std::net::{self, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::flow::FlowRet;

/// Datagram flow: no connection state, one datagram per operation.
pub struct FlowUdp {
    socket: net::UdpSocket,
}

impl FlowUdp {
    pub fn new(bind_addr: &SocketAddr) -> io::Result<FlowUdp> {
        let socket = net::UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        Ok(FlowUdp { socket })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn read_from(&self, buf: &mut [u8]) -> (FlowRet, usize, Option<SocketAddr>) {
        loop {
            match self.socket.recv_from(buf) {
                Ok((n, remote)) => return (FlowRet::Ok, n, Some(remote)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return (FlowRet::NoData, 0, None)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // ICMP errors from earlier sends surface here; not fatal for
                // an unconnected socket.
                Err(ref e) if e.raw_os_error() == Some(libc::ECONNREFUSED) => {
                    return (FlowRet::NoData, 0, None)
                }
                Err(_) => return (FlowRet::Abort, 0, None),
            }
        }
    }

    /// A zero-length datagram is a valid send.
    pub fn send_to(&self, b: &[u8], remote: &SocketAddr) -> FlowRet {
        loop {
            match self.socket.send_to(b, remote) {
                Ok(_) => return FlowRet::Ok,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return FlowRet::Again,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return FlowRet::Abort,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::FlowUdp;
    use crate::flow::FlowRet;

    #[test]
    fn datagram_round_trip() {
        let bind = "127.0.0.1:0".parse().unwrap();
        let a = FlowUdp::new(&bind).unwrap();
        let b = FlowUdp::new(&bind).unwrap();

        let b_addr = b.local_addr().unwrap();
        assert_eq!(a.send_to(b"hello", &b_addr), FlowRet::Ok);

        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut buf = [0u8; 64];
        let (ret, n, from) = b.read_from(&mut buf);
        assert_eq!(ret, FlowRet::Ok);
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from.unwrap(), a.local_addr().unwrap());
    }

    #[test]
    fn zero_length_datagram() {
        let bind = "127.0.0.1:0".parse().unwrap();
        let a = FlowUdp::new(&bind).unwrap();
        let b = FlowUdp::new(&bind).unwrap();

        assert_eq!(a.send_to(b"", &b.local_addr().unwrap()), FlowRet::Ok);

        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut buf = [0u8; 8];
        let (ret, n, from) = b.read_from(&mut buf);
        assert_eq!(ret, FlowRet::Ok);
        assert_eq!(n, 0);
        assert!(from.is_some());
    }
}
