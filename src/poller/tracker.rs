use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Weak};

use crate::epoll::{EpollOpt, Ready, Token};
use crate::poller::Channel;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrackMode {
    /// Interest is disarmed after each event; re-armed with `resume_tracker`.
    Oneshot,
    /// Interest stays armed; edge-triggered, so the handler must drain.
    Loop,
}

/// Interest registration for one channel in one poller.
///
/// `tracked` means the poller's OS set currently has the interest armed;
/// `started` means the owner considers the tracker live. A tracker moves
/// created → added → (paused ↔ resumed) → removed and is never shared
/// between pollers.
pub struct Tracker {
    channel: Weak<Channel>,
    fd: RawFd,
    interest: Ready,
    mode: TrackMode,
    tracked: AtomicBool,
    started: AtomicBool,
    released: AtomicBool,
    token: AtomicUsize,
}

impl Tracker {
    pub fn new(channel: &Arc<Channel>, interest: Ready, mode: TrackMode) -> Arc<Tracker> {
        Arc::new(Tracker {
            channel: Arc::downgrade(channel),
            fd: channel.fd(),
            interest,
            mode,
            tracked: AtomicBool::new(false),
            started: AtomicBool::new(false),
            released: AtomicBool::new(false),
            token: AtomicUsize::new(usize::MAX),
        })
    }

    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Ready {
        self.interest
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    pub fn epoll_opts(&self) -> EpollOpt {
        match self.mode {
            TrackMode::Oneshot => EpollOpt::edge() | EpollOpt::oneshot(),
            TrackMode::Loop => EpollOpt::edge(),
        }
    }

    /// Flip the tracked flag; returns true when this call changed it.
    pub fn set_tracked(&self, on: bool) -> bool {
        self.tracked.swap(on, AcqRel) != on
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked.load(Acquire)
    }

    pub fn mark_started(&self, on: bool) -> bool {
        self.started.swap(on, AcqRel) != on
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Acquire)
    }

    /// First caller wins the right to deliver the final tracker-off
    /// notification to the channel.
    pub(crate) fn release_once(&self) -> bool {
        !self.released.swap(true, AcqRel)
    }

    pub(crate) fn set_token(&self, token: Token) {
        self.token.store(token.0, Release);
    }

    pub(crate) fn token(&self) -> Option<Token> {
        let raw = self.token.load(Acquire);
        if raw == usize::MAX {
            None
        } else {
            Some(Token(raw))
        }
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Tracker")
            .field("fd", &self.fd)
            .field("interest", &self.interest)
            .field("mode", &self.mode)
            .field("tracked", &self.is_tracked())
            .field("started", &self.is_started())
            .finish()
    }
}
