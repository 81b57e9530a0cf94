//! # Server Module
//!
//! The event pump. A socket server owns one thread's wait cycles: it
//! multiplexes socket readiness and cross-thread wake-ups into signal
//! callbacks and message-queue pumping, all delivered on that owning thread.
//!
//! Two variants satisfy the same contract: [`PollServer`] runs a full OS
//! readiness pump; [`NotifyServer`] is a guest inside somebody else's loop
//! and only knows how to pump the message queue.

mod notify;
mod poll;

pub use notify::NotifyServer;
pub use poll::{PollConfig, PollServer};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::Token;
use parking_lot::Mutex;

use crate::queue::MessageQueue;
use crate::socket::{AsyncSocket, SocketType};

/// Process-wide token allocator.
///
/// Every socket and every server wake source draws from one pool, so tokens
/// never collide across servers living on the same thread.
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn alloc_token() -> Token {
    Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
}

/// An event pump bound to one owning thread.
///
/// Everything except [`SocketServer::wake_up`] (and the [`Wakeup`] handle)
/// must be called on that thread; signal callbacks and queue dispatch happen
/// from inside [`SocketServer::wait`].
pub trait SocketServer {
    /// Create a socket owned by this server's pump. Variants that cannot do
    /// their own I/O return `None`.
    fn create_async_socket(&mut self, kind: SocketType) -> Option<AsyncSocket>;

    /// Attach the message queue this server pumps.
    fn set_queue(&mut self, queue: MessageQueue);

    /// Run one wait cycle.
    ///
    /// - `process_io = true`: pump native events for up to `cms`
    ///   (`None` = forever); socket signals fire inside this call.
    /// - `process_io = false`, `cms = None`: block until a wake-up arrives,
    ///   pump the queue once, and return; no socket signals fire.
    /// - `process_io = false`, `cms = Some(ZERO)`: no-op, returns `true`.
    fn wait(&mut self, cms: Option<Duration>, process_io: bool) -> bool;

    /// Wake the pump from any thread.
    fn wake_up(&self);

    /// Cloneable cross-thread handle to [`SocketServer::wake_up`].
    fn wakeup(&self) -> Wakeup;
}

/// The primitive a wake-up handle pokes once per pending flag edge.
pub(crate) trait WakeSignal: Send + Sync {
    fn signal(&self);
}

/// Cross-thread wake-up handle.
///
/// Repeated wakes collapse into one in-flight signal: the pending flag is
/// set under a lock and only its false-to-true edge reaches the underlying
/// primitive. The receiving pump clears the flag before draining.
#[derive(Clone)]
pub struct Wakeup {
    pending: Arc<Mutex<bool>>,
    signal: Arc<dyn WakeSignal>,
}

impl Wakeup {
    pub(crate) fn new(signal: Arc<dyn WakeSignal>) -> Self {
        Self::with_pending(Arc::new(Mutex::new(false)), signal)
    }

    /// Build around an existing pending cell, for variants whose signal
    /// needs to observe the flag itself.
    pub(crate) fn with_pending(pending: Arc<Mutex<bool>>, signal: Arc<dyn WakeSignal>) -> Self {
        Self { pending, signal }
    }

    /// Wake the owning pump. Idempotent while a wake is in flight.
    pub fn wake(&self) {
        {
            let mut pending = self.pending.lock();
            if *pending {
                return;
            }
            *pending = true;
        }
        self.signal.signal();
    }

    pub(crate) fn clear_pending(&self) {
        *self.pending.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSignal(AtomicUsize);

    impl WakeSignal for CountingSignal {
        fn signal(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_wakeup_collapses_while_pending() {
        let signal = Arc::new(CountingSignal(AtomicUsize::new(0)));
        let wakeup = Wakeup::new(signal.clone());

        for _ in 0..1000 {
            wakeup.wake();
        }
        assert_eq!(signal.0.load(Ordering::SeqCst), 1);

        // Once the pump clears the flag, the next wake signals again.
        wakeup.clear_pending();
        wakeup.wake();
        assert_eq!(signal.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_token_allocator_is_unique() {
        let a = alloc_token();
        let b = alloc_token();
        assert_ne!(a, b);
    }
}
