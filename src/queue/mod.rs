//! # Queue Module
//!
//! A FIFO of deferred work with optional delayed delivery. Producers on any
//! thread post closures; the socket server's owning thread drains them from
//! its pump. The queue itself knows nothing about servers — producers pair a
//! queue handle with a [`crate::server::Wakeup`] to get the pump re-entered.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A unit of deferred work.
pub struct Message {
    id: u64,
    job: Box<dyn FnOnce() + Send>,
}

impl Message {
    /// Identifier assigned at post time; unique within the queue.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Delayed {
    due: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline (then
        // the earliest post) surfaces first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    delayed: BinaryHeap<Delayed>,
    next_id: u64,
    next_seq: u64,
}

impl QueueState {
    /// Move due delayed messages into the ready FIFO.
    fn promote(&mut self, now: Instant) {
        while let Some(head) = self.delayed.peek() {
            if head.due > now {
                break;
            }
            let entry = self.delayed.pop().expect("peeked entry present");
            self.ready.push_back(entry.message);
        }
    }
}

struct Inner {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// Thread-safe message queue handle.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<Inner>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                available: Condvar::new(),
            }),
        }
    }

    /// Post work for immediate delivery; returns the message id.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> u64 {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.ready.push_back(Message {
            id,
            job: Box::new(job),
        });
        drop(state);
        self.inner.available.notify_one();
        id
    }

    /// Post work to become deliverable after `delay`.
    pub fn post_delayed(&self, delay: Duration, job: impl FnOnce() + Send + 'static) -> u64 {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.delayed.push(Delayed {
            due: Instant::now() + delay,
            seq,
            message: Message {
                id,
                job: Box::new(job),
            },
        });
        drop(state);
        self.inner.available.notify_one();
        id
    }

    /// Number of messages ready for delivery right now.
    pub fn len(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.promote(Instant::now());
        state.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next deliverable message.
    ///
    /// `timeout` of `None` means do not block; `Some(d)` blocks up to `d`
    /// waiting for a message to arrive or become due.
    pub fn get(&self, timeout: Option<Duration>) -> Option<Message> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.inner.state.lock();
        loop {
            state.promote(Instant::now());
            if let Some(message) = state.ready.pop_front() {
                return Some(message);
            }
            let deadline = deadline?;
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            // Wake early if a delayed message comes due before the caller's
            // deadline.
            let wait_until = match state.delayed.peek() {
                Some(head) if head.due < deadline => head.due,
                _ => deadline,
            };
            self.inner.available.wait_until(&mut state, wait_until);
        }
    }

    /// Run a message taken from this queue.
    pub fn dispatch(&self, message: Message) {
        (message.job)();
    }

    /// Time until the next delayed message becomes due.
    ///
    /// `Some(ZERO)` when something is deliverable already, `None` when
    /// nothing is scheduled.
    pub fn delay_until_next(&self) -> Option<Duration> {
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        state.promote(now);
        if !state.ready.is_empty() {
            return Some(Duration::ZERO);
        }
        state.delayed.peek().map(|head| head.due - now)
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            queue.post(move || log.lock().push(i));
        }
        assert_eq!(queue.len(), 5);
        while let Some(msg) = queue.get(None) {
            queue.dispatch(msg);
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_nonblocking_get_on_empty() {
        let queue = MessageQueue::new();
        assert!(queue.get(None).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_delayed_promotion() {
        let queue = MessageQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        queue.post_delayed(Duration::from_millis(20), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(queue.get(None).is_none());
        let delay = queue.delay_until_next().expect("scheduled message");
        assert!(delay <= Duration::from_millis(20));

        let msg = queue
            .get(Some(Duration::from_millis(500)))
            .expect("message becomes due");
        queue.dispatch(msg);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(queue.delay_until_next().is_none());
    }

    #[test]
    fn test_delayed_equal_deadlines_keep_post_order() {
        let queue = MessageQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let due = Duration::from_millis(5);
        for i in 0..3 {
            let log = log.clone();
            queue.post_delayed(due, move || log.lock().push(i));
        }
        std::thread::sleep(Duration::from_millis(10));
        while let Some(msg) = queue.get(None) {
            queue.dispatch(msg);
        }
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_cross_thread_post() {
        let queue = MessageQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let producer = {
            let queue = queue.clone();
            let hits = hits.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let hits = hits.clone();
                    queue.post(move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        };
        producer.join().unwrap();
        while let Some(msg) = queue.get(None) {
            queue.dispatch(msg);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_blocking_get_wakes_on_post() {
        let queue = MessageQueue::new();
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                queue.post(|| {});
            })
        };
        let msg = queue.get(Some(Duration::from_secs(2)));
        assert!(msg.is_some());
        producer.join().unwrap();
    }
}
