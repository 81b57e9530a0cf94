//! OS readiness pump.
//!
//! `PollServer` alternates between draining the application message queue
//! and blocking on the OS poller, which delivers both socket readiness and
//! the cross-thread wake token. One instance runs on exactly one thread; all
//! socket signals and queue dispatch happen inside `wait` on that thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::consts::DEFAULT_POLL_CAPACITY;
use crate::queue::MessageQueue;
use crate::socket::{
    AsyncSocket, DnsOutcome, PollContext, Readiness, Resolver, SocketError, SocketType,
    SystemResolver,
};

use super::{alloc_token, SocketServer, WakeSignal, Wakeup};

/// Configuration for a [`PollServer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Event capacity of one poll cycle
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Default connect watchdog in milliseconds; 0 disables it
    #[serde(default)]
    pub connect_timeout_ms: u64,
}

fn default_capacity() -> usize {
    DEFAULT_POLL_CAPACITY
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POLL_CAPACITY,
            connect_timeout_ms: 0,
        }
    }
}

struct MioWakeSignal {
    waker: Waker,
}

impl WakeSignal for MioWakeSignal {
    fn signal(&self) {
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "wake post failed");
        }
    }
}

/// The readiness-pump socket server.
pub struct PollServer {
    poll: Poll,
    events: Events,
    ctx: Rc<PollContext>,
    queue: Option<MessageQueue>,
    wakeup: Wakeup,
    wake_token: Token,
    dns_rx: Receiver<DnsOutcome>,
    /// Deadline of the next delayed queue message, re-armed by `pump`
    delay_deadline: Option<Instant>,
    /// Readiness observed while callbacks were disabled, owed to sinks
    redispatch: Vec<(Token, Readiness)>,
    config: PollConfig,
}

impl PollServer {
    pub fn new() -> crate::Result<Self> {
        Self::with_config(PollConfig::default())
    }

    pub fn with_config(config: PollConfig) -> crate::Result<Self> {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Build with an injected name-resolution capability.
    pub fn with_resolver(config: PollConfig, resolver: Arc<dyn Resolver>) -> crate::Result<Self> {
        let poll = Poll::new()?;
        let wake_token = alloc_token();
        let waker = Waker::new(poll.registry(), wake_token)?;
        let wakeup = Wakeup::new(Arc::new(MioWakeSignal { waker }));
        let registry = poll.registry().try_clone()?;
        let (dns_tx, dns_rx) = channel();
        let ctx = Rc::new(PollContext {
            registry,
            sockets: RefCell::new(HashMap::new()),
            pending_close: RefCell::new(Default::default()),
            resolver,
            dns_tx,
            wakeup: wakeup.clone(),
        });
        let events = Events::with_capacity(config.capacity.max(1));
        Ok(Self {
            poll,
            events,
            ctx,
            queue: None,
            wakeup,
            wake_token,
            dns_rx,
            delay_deadline: None,
            redispatch: Vec::new(),
            config,
        })
    }

    /// Number of sockets currently registered with this server.
    pub fn registered_sockets(&self) -> usize {
        self.ctx
            .sockets
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn lookup(&self, token: Token) -> Option<AsyncSocket> {
        let weak = self.ctx.sockets.borrow().get(&token).cloned()?;
        match weak.upgrade() {
            Some(core) => Some(AsyncSocket::from_core(core)),
            None => {
                // Socket was dropped without close; sweep the stale entry.
                self.ctx.sockets.borrow_mut().remove(&token);
                None
            }
        }
    }

    fn dispatch_readiness(&self, token: Token, readiness: Readiness) {
        if let Some(socket) = self.lookup(token) {
            socket.handle_readiness(readiness);
        }
    }

    /// Drain the queue and re-arm the delay timer. Runs once per wake
    /// delivery; dispatches at least one message so work posted between
    /// size checks is not starved.
    fn pump(&mut self) {
        self.wakeup.clear_pending();
        let Some(queue) = self.queue.clone() else {
            return;
        };
        let max_messages = std::cmp::max(1, queue.len());
        for _ in 0..max_messages {
            match queue.get(None) {
                Some(message) => queue.dispatch(message),
                None => break,
            }
        }
        self.delay_deadline = queue.delay_until_next().map(|d| Instant::now() + d);
    }

    fn enable_callbacks(&mut self, enable: bool) {
        let entries: Vec<_> = self
            .ctx
            .sockets
            .borrow()
            .iter()
            .map(|(token, weak)| (*token, weak.clone()))
            .collect();
        for (token, weak) in entries {
            let Some(core) = weak.upgrade() else {
                self.ctx.sockets.borrow_mut().remove(&token);
                continue;
            };
            let socket = AsyncSocket::from_core(core);
            let deferred = socket.set_callbacks_enabled(enable);
            if enable && deferred.any() {
                self.redispatch.push((token, deferred));
            }
        }
    }

    /// Deliver readiness that was deferred while callbacks were disabled.
    fn flush_redispatch(&mut self) {
        for (token, readiness) in std::mem::take(&mut self.redispatch) {
            self.dispatch_readiness(token, readiness);
        }
    }

    /// DNS completions, drained closes, connect watchdogs, due delay timer.
    fn service_housekeeping(&mut self) {
        while let Ok(outcome) = self.dns_rx.try_recv() {
            if let Some(socket) = self.lookup(outcome.token) {
                socket.complete_dns(&outcome);
            }
        }

        loop {
            let token = self.ctx.pending_close.borrow_mut().pop_front();
            match token {
                Some(token) => {
                    if let Some(socket) = self.lookup(token) {
                        socket.deliver_pending_close();
                    }
                }
                None => break,
            }
        }

        let now = Instant::now();
        let expired: Vec<_> = {
            let sockets = self.ctx.sockets.borrow();
            sockets
                .values()
                .filter_map(|weak| weak.upgrade())
                .map(AsyncSocket::from_core)
                .filter(|s| matches!(s.connect_deadline(), Some(deadline) if deadline <= now))
                .collect()
        };
        for socket in expired {
            warn!("connect watchdog fired, forcing close");
            socket.synthetic_close(SocketError::TimedOut);
        }

        if matches!(self.delay_deadline, Some(deadline) if deadline <= now) {
            self.delay_deadline = None;
            self.pump();
        }
    }

    fn earliest_connect_deadline(&self) -> Option<Instant> {
        self.ctx
            .sockets
            .borrow()
            .values()
            .filter_map(|weak| weak.upgrade())
            .filter_map(|core| AsyncSocket::from_core(core).connect_deadline())
            .min()
    }

    fn poll_timeout(&self, deadline: Option<Instant>) -> Option<Duration> {
        let mut target = deadline;
        for candidate in [self.delay_deadline, self.earliest_connect_deadline()] {
            target = match (target, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        target.map(|t| t.saturating_duration_since(Instant::now()))
    }

    fn poll_once(&mut self, timeout: Option<Duration>) -> bool {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return true,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "poll failed");
                    return false;
                }
            }
        }
    }

    fn collect_batch(&self) -> Vec<(Token, Readiness)> {
        self.events
            .iter()
            .map(|event| {
                (
                    event.token(),
                    Readiness {
                        readable: event.is_readable(),
                        writable: event.is_writable(),
                        read_closed: event.is_read_closed(),
                        error: event.is_error(),
                    },
                )
            })
            .collect()
    }

    fn wait_process_io(&mut self, cms: Option<Duration>) -> bool {
        let deadline = cms.map(|d| Instant::now() + d);
        self.flush_redispatch();
        // Spin the pump at least once, and as long as requested.
        loop {
            self.service_housekeeping();
            let timeout = self.poll_timeout(deadline);
            if !self.poll_once(timeout) {
                return false;
            }
            for (token, readiness) in self.collect_batch() {
                if token == self.wake_token {
                    self.pump();
                } else {
                    self.dispatch_readiness(token, readiness);
                }
            }
            self.service_housekeeping();
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break;
                }
            }
        }
        true
    }

    /// Block until a wake-up, pumping only the queue. Socket callbacks are
    /// disabled for the duration; the OS poller offers no wake-only filter,
    /// so readiness observed here is deferred, not dropped.
    fn wait_for_wakeup(&mut self, cms: Option<Duration>) -> bool {
        let deadline = cms.map(|d| Instant::now() + d);
        self.enable_callbacks(false);
        let mut woke = false;
        loop {
            let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if matches!(timeout, Some(t) if t.is_zero()) {
                break;
            }
            if !self.poll_once(timeout) {
                break;
            }
            for (token, readiness) in self.collect_batch() {
                if token == self.wake_token {
                    woke = true;
                } else {
                    // Suppressed by the disabled-callbacks state; recorded
                    // on the socket for later redispatch.
                    self.dispatch_readiness(token, readiness);
                }
            }
            if woke {
                break;
            }
            if deadline.is_none() {
                continue;
            }
        }
        if woke {
            self.pump();
        }
        self.enable_callbacks(true);
        woke
    }
}

impl SocketServer for PollServer {
    fn create_async_socket(&mut self, kind: SocketType) -> Option<AsyncSocket> {
        let socket = AsyncSocket::create(self.ctx.clone(), kind);
        if self.config.connect_timeout_ms > 0 {
            socket.set_connect_timeout(Duration::from_millis(self.config.connect_timeout_ms));
        }
        debug!(?kind, "socket created");
        Some(socket)
    }

    fn set_queue(&mut self, queue: MessageQueue) {
        self.delay_deadline = queue.delay_until_next().map(|d| Instant::now() + d);
        self.queue = Some(queue);
    }

    fn wait(&mut self, cms: Option<Duration>, process_io: bool) -> bool {
        if process_io {
            return self.wait_process_io(cms);
        }
        if cms == Some(Duration::ZERO) {
            // No-op; this is the in-place pump case.
            return true;
        }
        self.wait_for_wakeup(cms)
    }

    fn wake_up(&self) {
        self.wakeup.wake();
    }

    fn wakeup(&self) -> Wakeup {
        self.wakeup.clone()
    }
}
