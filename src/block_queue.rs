use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Blocking queue for cross-thread hand-off: `pop` parks the caller until an
/// element arrives.
#[derive(Debug)]
pub struct BlockQueue<T>
where
    T: Send,
{
    inner: Arc<BlockQueueInner<T>>,
}

impl<T> Clone for BlockQueue<T>
where
    T: Send,
{
    fn clone(&self) -> BlockQueue<T> {
        BlockQueue {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Debug)]
struct BlockQueueInner<T> {
    queue: Mutex<VecDeque<T>>,
    condvar: Condvar,
}

impl<T> BlockQueue<T>
where
    T: Send,
{
    pub fn new() -> BlockQueue<T> {
        BlockQueue::with_capacity(16)
    }

    pub fn with_capacity(capacity: usize) -> BlockQueue<T> {
        BlockQueue {
            inner: Arc::new(BlockQueueInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn push(&self, value: T) {
        let mut queue = self.inner.queue.lock().unwrap();
        queue.push_back(value);

        self.inner.condvar.notify_one();
    }

    pub fn pop(&self) -> T {
        let mut queue = self.inner.queue.lock().unwrap();

        loop {
            if let Some(elem) = queue.pop_front() {
                return elem;
            }

            queue = self.inner.condvar.wait(queue).unwrap();
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut queue = self.inner.queue.lock().unwrap();

        if let Some(elem) = queue.pop_front() {
            return Some(elem);
        }

        let (mut queue, _) = self.inner.condvar.wait_timeout(queue, timeout).unwrap();
        queue.pop_front()
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut queue = self.inner.queue.lock().unwrap();
        queue.pop_front()
    }
}

impl<T: Send> Default for BlockQueue<T> {
    fn default() -> Self {
        BlockQueue::new()
    }
}

#[cfg(test)]
mod test {
    use super::BlockQueue;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn cross_thread_hand_off() {
        let queue = BlockQueue::new();
        let producer = queue.clone();

        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.push(7u32);
        });

        assert_eq!(queue.pop(), 7);
        th.join().unwrap();
    }

    #[test]
    fn pop_timeout_empty() {
        let queue: BlockQueue<u32> = BlockQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }
}
