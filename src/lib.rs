//! Reactor-style network transport library.
//!
//! `spout-io` multiplexes readiness events from many sockets onto a small
//! pool of poller threads and layers CAS-driven transport state machines on
//! top: TCP, UDP and TLS transports, acceptors and dialers with connect and
//! handshake timeouts, and a timer queue. An RFC 8446 handshake message
//! layer for QUIC-style callers lives in [`tls13`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spout_io::service::Service;
//! use spout_io::transport::{AcceptorCallbacks, TcpAcceptor, TransportCallbacks};
//!
//! let service = Service::new(2).unwrap();
//! service.start();
//!
//! let acceptor = TcpAcceptor::new(&"127.0.0.1:0".parse().unwrap()).unwrap();
//! let sv = service.clone();
//! acceptor
//!     .start(
//!         &service,
//!         AcceptorCallbacks {
//!             on_accepted: Box::new(move |transport| {
//!                 let echo = Arc::downgrade(&transport);
//!                 let cbs = TransportCallbacks {
//!                     on_read: Box::new(move |data| {
//!                         if let Some(t) = echo.upgrade() {
//!                             let _ = t.send(data);
//!                         }
//!                     }),
//!                     ..Default::default()
//!                 };
//!                 let _ = transport.start(&sv, 0, cbs);
//!             }),
//!             on_stopped: Box::new(|| {}),
//!         },
//!     )
//!     .unwrap();
//! ```

mod sys;

pub mod block_queue;
pub mod buffer;
pub mod epoll;
pub mod flow;
pub mod poller;
pub mod queue;
pub mod service;
pub mod timer;
pub mod tls13;
pub mod transport;
pub mod waker;

pub use buffer::IoBuffer;
pub use epoll::{Epoll, EpollOpt, Event, Events, Ready, Source, Token};
pub use service::{PollMode, Service};
pub use timer::{Timer, TimerQueue};
pub use waker::Waker;
