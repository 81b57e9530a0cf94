//! Guest pump for host-owned loops.
//!
//! `NotifyServer` does no I/O multiplexing of its own: waiting is the host
//! loop's job, and a wake-up delivers the queue drain synchronously on the
//! calling thread. A re-entrancy guard keeps a message that wakes the server
//! again from recursing into another drain.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::queue::MessageQueue;
use crate::socket::{AsyncSocket, SocketType};

use super::{SocketServer, WakeSignal, Wakeup};

struct NotifyState {
    queue: Option<MessageQueue>,
    dispatching: bool,
}

struct NotifySignal {
    state: Mutex<NotifyState>,
    /// Same cell as the wake-up handle's pending flag.
    pending: Arc<Mutex<bool>>,
}

impl WakeSignal for NotifySignal {
    fn signal(&self) {
        let queue = {
            let mut state = self.state.lock();
            if state.dispatching {
                // Delivered synchronously from inside a drain; the running
                // loop picks the new work up itself.
                return;
            }
            state.dispatching = true;
            state.queue.clone()
        };

        loop {
            *self.pending.lock() = false;
            if let Some(queue) = &queue {
                while let Some(message) = queue.get(None) {
                    queue.dispatch(message);
                }
            }
            // A wake that slipped in while draining would otherwise leave a
            // stale pending flag and swallow the next wake.
            if !*self.pending.lock() {
                break;
            }
        }

        self.state.lock().dispatching = false;
    }
}

/// Socket server variant hosted inside another event loop.
///
/// `wait` cannot block here; only the zero-timeout no-op form succeeds.
/// Sockets are host-provided, so `create_async_socket` always returns
/// `None`.
pub struct NotifyServer {
    signal: Arc<NotifySignal>,
    wakeup: Wakeup,
}

impl NotifyServer {
    pub fn new() -> Self {
        let pending = Arc::new(Mutex::new(false));
        let signal = Arc::new(NotifySignal {
            state: Mutex::new(NotifyState {
                queue: None,
                dispatching: false,
            }),
            pending: pending.clone(),
        });
        let wakeup = Wakeup::with_pending(pending, signal.clone());
        Self { signal, wakeup }
    }
}

impl Default for NotifyServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketServer for NotifyServer {
    fn create_async_socket(&mut self, _kind: SocketType) -> Option<AsyncSocket> {
        warn!("notify server cannot create sockets; use the poll server");
        None
    }

    fn set_queue(&mut self, queue: MessageQueue) {
        self.signal.state.lock().queue = Some(queue);
    }

    fn wait(&mut self, cms: Option<std::time::Duration>, process_io: bool) -> bool {
        let _ = process_io;
        // Waiting belongs to the host loop; only the no-op form succeeds.
        cms == Some(std::time::Duration::ZERO)
    }

    fn wake_up(&self) {
        self.wakeup.wake();
    }

    fn wakeup(&self) -> Wakeup {
        self.wakeup.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_wait_only_supports_noop() {
        let mut server = NotifyServer::new();
        assert!(server.wait(Some(Duration::ZERO), false));
        assert!(!server.wait(Some(Duration::from_millis(10)), false));
        assert!(!server.wait(None, true));
    }

    #[test]
    fn test_wake_dispatches_synchronously() {
        let mut server = NotifyServer::new();
        let queue = MessageQueue::new();
        server.set_queue(queue.clone());

        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            queue.post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        server.wake_up();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reentrant_wake_does_not_recurse() {
        let mut server = NotifyServer::new();
        let queue = MessageQueue::new();
        server.set_queue(queue.clone());

        let hits = Arc::new(AtomicUsize::new(0));
        let wakeup = server.wakeup();
        {
            let hits = hits.clone();
            let queue = queue.clone();
            let inner_hits = hits.clone();
            queue.clone().post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                // Posting plus waking from inside the drain must neither
                // recurse nor get lost.
                let inner_hits = inner_hits.clone();
                queue.post(move || {
                    inner_hits.fetch_add(1, Ordering::SeqCst);
                });
                wakeup.wake();
            });
        }

        server.wake_up();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // The mid-drain wake was absorbed; a fresh wake still works.
        let fresh = hits.clone();
        queue.post(move || {
            fresh.fetch_add(1, Ordering::SeqCst);
        });
        server.wake_up();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
