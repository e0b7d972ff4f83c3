use std::io::{self, Read, Write};
use std::net::{self, Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Mutex;

use crate::buffer::IoBuffer;
use crate::flow::FlowRet;

/// Stream-socket flow: owns the fd, issues recv/send, keeps the
/// partially-written send buffer.
///
/// The send buffer is touched only by the transport's current writer (the
/// send-chance holder, or the poller's send event that inherits it).
pub struct FlowTcp {
    stream: net::TcpStream,
    send_buffer: Mutex<IoBuffer>,
}

impl FlowTcp {
    /// Adopt an established socket. The fd is switched to non-blocking and
    /// TCP_NODELAY; ownership transfers to the flow.
    pub fn new(fd: RawFd) -> io::Result<FlowTcp> {
        let stream = unsafe { net::TcpStream::from_raw_fd(fd) };
        stream.set_nonblocking(true)?;
        // Nagle off; transports already batch into 4 KiB segments.
        let _ = stream.set_nodelay(true);

        Ok(FlowTcp {
            stream,
            send_buffer: Mutex::new(IoBuffer::new()),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Submission hook for the completion discipline; readiness pollers
    /// deliver read events unasked, so there is nothing to do.
    pub fn want_to_read(&self) -> FlowRet {
        FlowRet::Ok
    }

    pub fn read(&self, buf: &mut [u8]) -> (FlowRet, usize) {
        loop {
            match (&self.stream).read(buf) {
                Ok(0) => return (FlowRet::Abort, 0),
                Ok(n) => return (FlowRet::Ok, n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return (FlowRet::NoData, 0)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return (FlowRet::Abort, 0),
            }
        }
    }

    /// Queue bytes behind any partial write already pending.
    pub fn want_to_send(&self, iob: &IoBuffer) -> FlowRet {
        let mut sb = self.send_buffer.lock().unwrap();
        sb.append(iob.data());
        FlowRet::Ok
    }

    pub fn send(&self) -> FlowRet {
        let mut sb = self.send_buffer.lock().unwrap();

        if sb.data_len() == 0 {
            return FlowRet::NoData;
        }

        loop {
            match (&self.stream).write(sb.data()) {
                Ok(0) => return FlowRet::Again,
                Ok(n) => {
                    sb.shift(n);
                    if sb.data_len() == 0 {
                        sb.reset();
                        return FlowRet::Ok;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return FlowRet::Again,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return FlowRet::Abort,
            }
        }
    }

    pub fn has_data_to_send(&self) -> bool {
        self.send_buffer.lock().unwrap().data_len() > 0
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod test {
    use super::FlowTcp;
    use crate::buffer::IoBuffer;
    use crate::flow::FlowRet;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::IntoRawFd;

    fn pair() -> (FlowTcp, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (FlowTcp::new(client.into_raw_fd()).unwrap(), server)
    }

    #[test]
    fn send_and_read() {
        let (flow, mut peer) = pair();

        flow.want_to_send(&IoBuffer::from_slice(b"ping"));
        assert_eq!(flow.send(), FlowRet::Ok);
        assert!(!flow.has_data_to_send());

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut rbuf = [0u8; 16];
        let (ret, n) = flow.read(&mut rbuf);
        assert_eq!(ret, FlowRet::Ok);
        assert_eq!(&rbuf[..n], b"pong");
    }

    #[test]
    fn read_after_peer_close_aborts() {
        let (flow, peer) = pair();
        drop(peer);
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut buf = [0u8; 16];
        let (ret, _) = flow.read(&mut buf);
        assert_eq!(ret, FlowRet::Abort);
    }

    #[test]
    fn empty_send_is_no_data() {
        let (flow, _peer) = pair();
        assert_eq!(flow.send(), FlowRet::NoData);
    }
}
