use std::sync::Arc;

pub use channel::{Channel, ChannelOps};
pub use tracker::{TrackMode, Tracker};

pub use completion::CompletionPoller;
pub use readiness::ReadinessPoller;

mod channel;
mod completion;
mod readiness;
mod tracker;

/// Deferred work posted to a poller from any thread: an event for a channel,
/// or a bare callback (timer fires travel this way).
pub(crate) enum Posted {
    Event {
        channel: std::sync::Weak<Channel>,
        code: u32,
    },
    Call(Box<dyn FnOnce() + Send>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TrackerOp {
    Add,
    Del,
}

pub(crate) struct TrackerEvent {
    pub tracker: Arc<Tracker>,
    pub op: TrackerOp,
}

/// Event-dispatch engine over an OS multiplexer.
///
/// Two implementations share this contract: [`ReadinessPoller`] dispatches
/// readiness events on its own worker thread, [`CompletionPoller`] harvests
/// events on one thread and dispatches them on a pool of workers.
pub trait Poller: Send + Sync {
    /// Launch the worker thread(s). Returns false if already started.
    fn start(&self) -> bool;

    /// Signal loop exit. Trackers still installed are released: their
    /// channels observe a final tracker-off notification.
    fn stop(&self);

    /// Join the worker thread(s).
    fn wait_stopped(&self);

    /// Request installation of `tracker`. Returns false when the poller is
    /// stopped or the tracker is already tracked. The tracker becomes
    /// effective before the next dispatch batch.
    fn add_tracker(&self, tracker: &Arc<Tracker>) -> bool;

    /// Request removal. The channel observes a tracker-off notification on
    /// the dispatch thread once the removal is applied.
    fn remove_tracker(&self, tracker: &Arc<Tracker>);

    /// Clear OS interest for a one-shot tracker. Takes effect immediately
    /// (applied with a direct syscall, not through the mailbox).
    fn pause_tracker(&self, tracker: &Arc<Tracker>);

    /// Re-arm a one-shot tracker after it fired or was paused.
    fn resume_tracker(&self, tracker: &Arc<Tracker>);

    /// Deliver `code` to the channel on the poller's dispatch thread.
    fn post_channel_event(&self, channel: &Arc<Channel>, code: u32);

    /// Run `cb` on the poller's dispatch thread.
    fn post_callback(&self, cb: Box<dyn FnOnce() + Send>);
}
