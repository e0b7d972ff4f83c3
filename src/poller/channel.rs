use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

pub type EventFn = Box<dyn Fn() + Send + Sync>;
pub type CodeFn = Box<dyn Fn(u32) + Send + Sync>;
pub type TrackerFn = Box<dyn Fn(bool) + Send + Sync>;

/// Capability record a channel registers at construction. The poller sees
/// nothing else of the endpoint behind the fd.
pub struct ChannelOps {
    pub on_read: EventFn,
    pub on_send: EventFn,
    pub on_error: EventFn,
    pub on_event: CodeFn,
    pub on_tracker: TrackerFn,
}

impl ChannelOps {
    pub fn noop() -> ChannelOps {
        ChannelOps {
            on_read: Box::new(|| {}),
            on_send: Box::new(|| {}),
            on_error: Box::new(|| {}),
            on_event: Box::new(|_| {}),
            on_tracker: Box::new(|_| {}),
        }
    }
}

/// Endpoint attached to an fd, identified by a stable numeric id.
///
/// Pollers hold channels weakly; the owning transport drops its `Arc` to
/// detach, and in-flight events for a dead channel are discarded.
pub struct Channel {
    id: u64,
    fd: RawFd,
    ops: ChannelOps,
}

impl Channel {
    pub fn new(fd: RawFd, ops: ChannelOps) -> Arc<Channel> {
        Arc::new(Channel {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            fd,
            ops,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn on_read_event(&self) {
        (self.ops.on_read)()
    }

    pub fn on_send_event(&self) {
        (self.ops.on_send)()
    }

    pub fn on_error_event(&self) {
        (self.ops.on_error)()
    }

    pub fn handle_channel_event(&self, code: u32) {
        (self.ops.on_event)(code)
    }

    pub fn handle_tracker_event(&self, on: bool) {
        (self.ops.on_tracker)(on)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Channel")
            .field("id", &self.id)
            .field("fd", &self.fd)
            .finish()
    }
}
