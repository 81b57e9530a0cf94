//! # Socket Module
//!
//! Non-blocking sockets with an event-signal contract. Sockets are created
//! by a [`crate::server::PollServer`] and live on its owning thread; every
//! signal a sink receives is delivered from inside that server's `wait`.

mod dns;
mod error;
mod mtu;

pub use dns::{Resolver, SystemResolver};
pub use error::SocketError;
pub use mtu::{PingOutcome, Pinger};

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::server::Wakeup;

/// Transport type of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Connection-oriented byte stream (TCP)
    Stream,
    /// Connectionless datagrams (UDP)
    Datagram,
}

/// Lifecycle state of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    /// Bound but not yet listening; usually collapsed into `Closed`
    Binding,
    Connecting,
    Connected,
    Listening,
    /// Peer close seen, receive buffer not yet drained
    Closing,
}

/// Socket options exposed through `set_option`/`option`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// Don't-Fragment bit, recorded on the handle. `estimate_mtu` always
    /// probes with DF set regardless of this option.
    DontFragment,
    ReceiveBuffer,
    SendBuffer,
    NoDelay,
}

/// Observer for socket signals.
///
/// One sink per socket; all methods run on the owning server's thread from
/// inside `wait`. Replacing the sink from within one of its own callbacks is
/// a programming error.
pub trait SocketSink {
    /// Fired once when an initiated connect completes successfully
    fn on_connect(&mut self, _socket: &AsyncSocket) {}
    /// Fired each time the socket reports readable
    fn on_read(&mut self, _socket: &AsyncSocket) {}
    /// Fired each time the socket reports writable
    fn on_write(&mut self, _socket: &AsyncSocket) {}
    /// Fired when a listening socket has a connection to accept
    fn on_accept(&mut self, _socket: &AsyncSocket) {}
    /// Fired exactly once; `error` is `None` on graceful close
    fn on_close(&mut self, _socket: &AsyncSocket, _error: Option<SocketError>) {}
}

/// Signal computed from readiness, delivered to the sink
#[derive(Debug, Clone, Copy)]
pub(crate) enum Signal {
    Connect,
    Read,
    Write,
    Accept,
    Close(Option<SocketError>),
}

/// Readiness flags as reported by one poll event
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub error: bool,
}

impl Readiness {
    fn merge(&mut self, other: Readiness) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.read_closed |= other.read_closed;
        self.error |= other.error;
    }

    pub(crate) fn any(&self) -> bool {
        self.readable || self.writable || self.read_closed || self.error
    }
}

/// Completion of an asynchronous name lookup, routed back to the pump thread
pub(crate) struct DnsOutcome {
    pub token: Token,
    pub generation: u64,
    pub port: u16,
    pub result: Result<std::net::IpAddr, SocketError>,
}

/// Plumbing shared between a poll server and every socket it created.
///
/// The socket map holds weak references only: the server never prolongs a
/// socket's lifetime.
pub(crate) struct PollContext {
    pub(crate) registry: Registry,
    pub(crate) sockets: RefCell<HashMap<Token, Weak<RefCell<SocketCore>>>>,
    pub(crate) pending_close: RefCell<VecDeque<Token>>,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) dns_tx: Sender<DnsOutcome>,
    pub(crate) wakeup: Wakeup,
}

enum SocketIo {
    None,
    Stream(TcpStream),
    Listener(TcpListener),
    Dgram(UdpSocket),
}

pub(crate) struct SocketCore {
    ctx: Rc<PollContext>,
    token: Token,
    kind: SocketType,
    state: SocketState,
    io: SocketIo,
    sink: Rc<RefCell<Option<Box<dyn SocketSink>>>>,
    last_error: Option<SocketError>,
    remote: Option<Endpoint>,
    bound: Option<SocketAddr>,
    callbacks_enabled: bool,
    deferred: Readiness,
    closing: bool,
    close_error: Option<SocketError>,
    close_due: bool,
    close_signaled: bool,
    dns_pending: bool,
    dns_generation: u64,
    connect_timeout: Option<Duration>,
    connect_deadline: Option<Instant>,
    opt_dont_fragment: bool,
    opt_nodelay: bool,
    opt_recv_buffer: i32,
    opt_send_buffer: i32,
}

/// A non-blocking socket handle.
///
/// Cheap to clone; all clones refer to the same underlying socket. The
/// handle is deliberately not `Send`: sockets belong to the thread that owns
/// the server that created them.
#[derive(Clone)]
pub struct AsyncSocket {
    core: Rc<RefCell<SocketCore>>,
}

impl AsyncSocket {
    pub(crate) fn create(ctx: Rc<PollContext>, kind: SocketType) -> AsyncSocket {
        let token = crate::server::alloc_token();
        let core = SocketCore {
            ctx,
            token,
            kind,
            state: SocketState::Closed,
            io: SocketIo::None,
            sink: Rc::new(RefCell::new(None)),
            last_error: None,
            remote: None,
            bound: None,
            callbacks_enabled: true,
            deferred: Readiness::default(),
            closing: false,
            close_error: None,
            close_due: false,
            close_signaled: false,
            dns_pending: false,
            dns_generation: 0,
            connect_timeout: None,
            connect_deadline: None,
            opt_dont_fragment: false,
            opt_nodelay: false,
            opt_recv_buffer: 0,
            opt_send_buffer: 0,
        };
        let socket = AsyncSocket {
            core: Rc::new(RefCell::new(core)),
        };
        socket.register_with_server();
        socket
    }

    /// Wrap an accepted stream; the socket starts out connected.
    fn attach(ctx: Rc<PollContext>, mut stream: TcpStream, peer: SocketAddr) -> Result<AsyncSocket, SocketError> {
        let token = crate::server::alloc_token();
        ctx.registry
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
            .map_err(SocketError::from)?;
        let core = SocketCore {
            ctx,
            token,
            kind: SocketType::Stream,
            state: SocketState::Connected,
            io: SocketIo::Stream(stream),
            sink: Rc::new(RefCell::new(None)),
            last_error: None,
            remote: Some(Endpoint::from(peer)),
            bound: None,
            callbacks_enabled: true,
            deferred: Readiness::default(),
            closing: false,
            close_error: None,
            close_due: false,
            close_signaled: false,
            dns_pending: false,
            dns_generation: 0,
            connect_timeout: None,
            connect_deadline: None,
            opt_dont_fragment: false,
            opt_nodelay: false,
            opt_recv_buffer: 0,
            opt_send_buffer: 0,
        };
        let socket = AsyncSocket {
            core: Rc::new(RefCell::new(core)),
        };
        socket.register_with_server();
        Ok(socket)
    }

    pub(crate) fn from_core(core: Rc<RefCell<SocketCore>>) -> AsyncSocket {
        AsyncSocket { core }
    }

    fn register_with_server(&self) {
        let (ctx, token) = {
            let core = self.core.borrow();
            (core.ctx.clone(), core.token)
        };
        ctx.sockets
            .borrow_mut()
            .insert(token, Rc::downgrade(&self.core));
    }

    /// Current lifecycle state
    pub fn state(&self) -> SocketState {
        self.core.borrow().state
    }

    /// Kind this socket was created as
    pub fn kind(&self) -> SocketType {
        self.core.borrow().kind
    }

    /// Most recent failure recorded on this socket
    pub fn last_error(&self) -> Option<SocketError> {
        self.core.borrow().last_error
    }

    /// Remote endpoint of a connect in progress or established
    pub fn remote_endpoint(&self) -> Option<Endpoint> {
        self.core.borrow().remote.clone()
    }

    /// Local endpoint, once the socket has an OS handle
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        let core = self.core.borrow();
        let addr = match &core.io {
            SocketIo::Stream(s) => s.local_addr().ok(),
            SocketIo::Listener(l) => l.local_addr().ok(),
            SocketIo::Dgram(s) => s.local_addr().ok(),
            SocketIo::None => None,
        };
        addr.map(Endpoint::from)
    }

    /// Install the single signal sink
    pub fn set_sink(&self, sink: Box<dyn SocketSink>) {
        let slot = self.core.borrow().sink.clone();
        *slot.borrow_mut() = Some(sink);
    }

    /// Arm a watchdog that forces a synthetic `TimedOut` close if a connect
    /// has not completed within `timeout`. Cancelled when the connect
    /// succeeds.
    pub fn set_connect_timeout(&self, timeout: Duration) {
        let mut core = self.core.borrow_mut();
        core.connect_timeout = Some(timeout);
        if core.state == SocketState::Connecting {
            core.connect_deadline = Some(Instant::now() + timeout);
        }
    }

    /// Bind to a local endpoint.
    ///
    /// For stream sockets the address is recorded and the OS handle is
    /// created at `listen`; datagram sockets get their handle here.
    pub fn bind(&self, endpoint: &Endpoint) -> Result<(), SocketError> {
        let mut core = self.core.borrow_mut();
        if core.state != SocketState::Closed {
            return Err(core.record(SocketError::InvalidState));
        }
        let addr = endpoint
            .to_socket_addr()
            .ok_or_else(|| core.record(SocketError::AddressUnavailable))?;
        match core.kind {
            SocketType::Stream => {
                core.bound = Some(addr);
                core.state = SocketState::Binding;
                Ok(())
            }
            SocketType::Datagram => {
                let mut socket = UdpSocket::bind(addr).map_err(|e| core.record(e.into()))?;
                core.ctx
                    .registry
                    .register(&mut socket, core.token, Interest::READABLE | Interest::WRITABLE)
                    .map_err(|e| core.record(e.into()))?;
                core.io = SocketIo::Dgram(socket);
                core.bound = Some(addr);
                Ok(())
            }
        }
    }

    /// Start listening for connections (stream sockets only).
    pub fn listen(&self, _backlog: u32) -> Result<(), SocketError> {
        let mut core = self.core.borrow_mut();
        if core.kind != SocketType::Stream || core.state != SocketState::Binding {
            return Err(core.record(SocketError::InvalidState));
        }
        let addr = core.bound.expect("bound address present in Binding state");
        let mut listener = TcpListener::bind(addr).map_err(|e| core.record(e.into()))?;
        core.ctx
            .registry
            .register(&mut listener, core.token, Interest::READABLE)
            .map_err(|e| core.record(e.into()))?;
        core.io = SocketIo::Listener(listener);
        core.state = SocketState::Listening;
        debug!(token = core.token.0, %addr, "socket listening");
        Ok(())
    }

    /// Accept a pending connection; `Ok(None)` when none is queued.
    pub fn accept(&self) -> Result<Option<(AsyncSocket, Endpoint)>, SocketError> {
        let (ctx, accepted) = {
            let mut core = self.core.borrow_mut();
            let SocketIo::Listener(listener) = &core.io else {
                return Err(core.record(SocketError::InvalidState));
            };
            match listener.accept() {
                Ok((stream, peer)) => (core.ctx.clone(), (stream, peer)),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(core.record(e.into())),
            }
        };
        let (stream, peer) = accepted;
        let socket = AsyncSocket::attach(ctx, stream, peer)?;
        Ok(Some((socket, Endpoint::from(peer))))
    }

    /// Initiate a connection.
    ///
    /// With an unresolved endpoint this starts an asynchronous name lookup;
    /// the connect continues on the pump thread once the address is known.
    /// At most one lookup is pending per socket and `close` cancels it.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<(), SocketError> {
        let mut core = self.core.borrow_mut();
        if core.state != SocketState::Closed {
            return Err(core.record(SocketError::InvalidState));
        }
        core.remote = Some(endpoint.clone());
        match core.kind {
            SocketType::Datagram => {
                let addr = endpoint
                    .to_socket_addr()
                    .ok_or_else(|| core.record(SocketError::AddressUnavailable))?;
                if matches!(core.io, SocketIo::None) {
                    let any: SocketAddr = if addr.is_ipv4() {
                        "0.0.0.0:0".parse().unwrap()
                    } else {
                        "[::]:0".parse().unwrap()
                    };
                    let mut socket = UdpSocket::bind(any).map_err(|e| core.record(e.into()))?;
                    core.ctx
                        .registry
                        .register(&mut socket, core.token, Interest::READABLE | Interest::WRITABLE)
                        .map_err(|e| core.record(e.into()))?;
                    core.io = SocketIo::Dgram(socket);
                }
                let SocketIo::Dgram(socket) = &core.io else {
                    unreachable!("datagram io just ensured");
                };
                socket.connect(addr).map_err(|e| core.record(e.into()))?;
                core.state = SocketState::Connected;
                Ok(())
            }
            SocketType::Stream => {
                if endpoint.is_unresolved() {
                    let host = endpoint.hostname().expect("unresolved endpoint has hostname");
                    core.dns_pending = true;
                    core.dns_generation += 1;
                    core.state = SocketState::Connecting;
                    if let Some(timeout) = core.connect_timeout {
                        core.connect_deadline = Some(Instant::now() + timeout);
                    }
                    debug!(token = core.token.0, host, "async name lookup");
                    dns::spawn_lookup(
                        &core.ctx,
                        core.token,
                        core.dns_generation,
                        host.to_string(),
                        endpoint.port(),
                    );
                    return Ok(());
                }
                let addr = endpoint.to_socket_addr().expect("resolved endpoint");
                core.start_connect(addr)
            }
        }
    }

    /// Send on a connected socket.
    pub fn send(&self, data: &[u8]) -> Result<usize, SocketError> {
        let mut core = self.core.borrow_mut();
        if core.state != SocketState::Connected {
            return Err(core.record(SocketError::NotConnected));
        }
        match &mut core.io {
            SocketIo::Stream(s) => match s.write(data) {
                Ok(n) => Ok(n),
                Err(e) => Err(core.record(e.into())),
            },
            SocketIo::Dgram(s) => match s.send(data) {
                Ok(n) => Ok(n),
                Err(e) => Err(core.record(e.into())),
            },
            _ => Err(core.record(SocketError::NotConnected)),
        }
    }

    /// Receive from a connected socket.
    ///
    /// When the peer has closed, the deferred close signal is released once
    /// this call observes the drained receive buffer.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let (result, release_close) = {
            let mut core = self.core.borrow_mut();
            let result = core.recv_inner(buf);
            let drained = match &result {
                Ok(0) => true,
                Ok(_) => core.stream_drained(),
                Err(SocketError::WouldBlock) => true,
                Err(_) => true,
            };
            let release = core.closing && !core.close_signaled && !core.close_due && drained;
            if release {
                core.close_due = true;
            }
            (result, release)
        };
        if release_close {
            let (ctx, token) = {
                let core = self.core.borrow();
                (core.ctx.clone(), core.token)
            };
            ctx.pending_close.borrow_mut().push_back(token);
            ctx.wakeup.wake();
        }
        result
    }

    /// Send a datagram to a specific endpoint.
    pub fn send_to(&self, data: &[u8], endpoint: &Endpoint) -> Result<usize, SocketError> {
        let mut core = self.core.borrow_mut();
        let addr = endpoint
            .to_socket_addr()
            .ok_or_else(|| core.record(SocketError::AddressUnavailable))?;
        match &core.io {
            SocketIo::Dgram(s) => match s.send_to(data, addr) {
                Ok(n) => Ok(n),
                Err(e) => Err(core.record(e.into())),
            },
            _ => Err(core.record(SocketError::InvalidState)),
        }
    }

    /// Receive a datagram along with its source endpoint.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Endpoint), SocketError> {
        let mut core = self.core.borrow_mut();
        match &core.io {
            SocketIo::Dgram(s) => match s.recv_from(buf) {
                Ok((n, addr)) => Ok((n, Endpoint::from(addr))),
                Err(e) => Err(core.record(e.into())),
            },
            _ => Err(core.record(SocketError::InvalidState)),
        }
    }

    /// Close the socket, releasing the OS handle, any pending name lookup
    /// and the server registration. Idempotent.
    pub fn close(&self) {
        let ctx = {
            let mut core = self.core.borrow_mut();
            core.close_impl();
            core.ctx.clone()
        };
        let token = self.core.borrow().token;
        ctx.sockets.borrow_mut().remove(&token);
    }

    /// Set a socket option. `NoDelay` reaches the OS immediately when a
    /// stream handle exists; buffer sizes and `DontFragment` are recorded
    /// on the handle and read back by `option` only.
    pub fn set_option(&self, option: SocketOption, value: i32) -> Result<(), SocketError> {
        let mut core = self.core.borrow_mut();
        match option {
            SocketOption::DontFragment => core.opt_dont_fragment = value != 0,
            SocketOption::ReceiveBuffer => core.opt_recv_buffer = value,
            SocketOption::SendBuffer => core.opt_send_buffer = value,
            SocketOption::NoDelay => {
                core.opt_nodelay = value != 0;
                if let SocketIo::Stream(s) = &core.io {
                    s.set_nodelay(value != 0).map_err(|e| core.record(e.into()))?;
                }
            }
        }
        Ok(())
    }

    /// Read back a socket option recorded on this handle.
    pub fn option(&self, option: SocketOption) -> Result<i32, SocketError> {
        let core = self.core.borrow();
        Ok(match option {
            SocketOption::DontFragment => core.opt_dont_fragment as i32,
            SocketOption::ReceiveBuffer => core.opt_recv_buffer,
            SocketOption::SendBuffer => core.opt_send_buffer,
            SocketOption::NoDelay => core.opt_nodelay as i32,
        })
    }

    /// Estimate the path MTU toward the connected remote endpoint by
    /// walking the canonical packet sizes with Don't-Fragment probes.
    pub fn estimate_mtu(&self, pinger: &dyn Pinger) -> Result<u16, SocketError> {
        let ip = {
            let mut core = self.core.borrow_mut();
            match core.remote.as_ref().and_then(|ep| ep.ip()) {
                Some(ip) => ip,
                None => return Err(core.record(SocketError::NotConnected)),
            }
        };
        mtu::walk(ip, pinger).map_err(|e| self.core.borrow_mut().record(e))
    }

    // --- server-side entry points -------------------------------------

    pub(crate) fn handle_readiness(&self, readiness: Readiness) {
        let signals = self.core.borrow_mut().process_readiness(readiness);
        for signal in signals {
            self.deliver(signal);
        }
    }

    pub(crate) fn deliver(&self, signal: Signal) {
        let sink = self.core.borrow().sink.clone();
        let mut guard = sink.borrow_mut();
        if let Some(sink) = guard.as_mut() {
            match signal {
                Signal::Connect => sink.on_connect(self),
                Signal::Read => sink.on_read(self),
                Signal::Write => sink.on_write(self),
                Signal::Accept => sink.on_accept(self),
                Signal::Close(err) => sink.on_close(self, err),
            }
        }
    }

    /// Deliver the deferred close once the receive buffer has drained.
    pub(crate) fn deliver_pending_close(&self) {
        let signal = {
            let mut core = self.core.borrow_mut();
            if core.close_signaled || !core.close_due {
                None
            } else {
                core.close_signaled = true;
                core.close_due = false;
                core.closing = false;
                core.state = SocketState::Closed;
                if let Some(err) = core.close_error {
                    core.last_error = Some(err);
                }
                Some(Signal::Close(core.close_error))
            }
        };
        if let Some(signal) = signal {
            self.deliver(signal);
        }
    }

    /// Force a synthetic close, used by the connect watchdog.
    pub(crate) fn synthetic_close(&self, error: SocketError) {
        let fire = {
            let mut core = self.core.borrow_mut();
            if core.close_signaled {
                false
            } else {
                core.close_signaled = true;
                core.last_error = Some(error);
                core.state = SocketState::Closed;
                true
            }
        };
        if fire {
            self.deliver(Signal::Close(Some(error)));
        }
    }

    pub(crate) fn connect_deadline(&self) -> Option<Instant> {
        let core = self.core.borrow();
        if core.state == SocketState::Connecting {
            core.connect_deadline
        } else {
            None
        }
    }

    pub(crate) fn set_callbacks_enabled(&self, enabled: bool) -> Readiness {
        let mut core = self.core.borrow_mut();
        core.callbacks_enabled = enabled;
        if enabled {
            std::mem::take(&mut core.deferred)
        } else {
            Readiness::default()
        }
    }

    /// Continue or fail a connect after its name lookup completed.
    pub(crate) fn complete_dns(&self, outcome: &DnsOutcome) {
        let failed = {
            let mut core = self.core.borrow_mut();
            if !core.dns_pending || core.dns_generation != outcome.generation || core.close_signaled
            {
                return; // cancelled or superseded
            }
            core.dns_pending = false;
            match outcome.result {
                Ok(ip) => {
                    if let Some(remote) = core.remote.as_mut() {
                        remote.set_resolved(ip);
                    }
                    let addr = SocketAddr::new(ip, outcome.port);
                    match core.start_connect(addr) {
                        Ok(()) => None,
                        Err(err) => Some(err),
                    }
                }
                Err(err) => {
                    core.record(err);
                    Some(err)
                }
            }
        };
        if let Some(err) = failed {
            warn!(error = %err, "async connect failed after name lookup");
            self.close();
            self.synthetic_close(err);
        }
    }
}

impl SocketCore {
    fn record(&mut self, error: SocketError) -> SocketError {
        self.last_error = Some(error);
        error
    }

    fn start_connect(&mut self, addr: SocketAddr) -> Result<(), SocketError> {
        let mut stream = TcpStream::connect(addr).map_err(|e| self.record(e.into()))?;
        if self.opt_nodelay {
            let _ = stream.set_nodelay(true);
        }
        self.ctx
            .registry
            .register(&mut stream, self.token, Interest::READABLE | Interest::WRITABLE)
            .map_err(|e| self.record(e.into()))?;
        self.io = SocketIo::Stream(stream);
        self.state = SocketState::Connecting;
        if let Some(timeout) = self.connect_timeout {
            self.connect_deadline = Some(Instant::now() + timeout);
        }
        debug!(token = self.token.0, %addr, "connect initiated");
        Ok(())
    }

    fn recv_inner(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        match self.state {
            SocketState::Connected | SocketState::Closing => {}
            _ => return Err(self.record(SocketError::NotConnected)),
        }
        match &mut self.io {
            SocketIo::Stream(s) => match s.read(buf) {
                Ok(n) => Ok(n),
                Err(e) => Err(self.record(e.into())),
            },
            SocketIo::Dgram(s) => match s.recv(buf) {
                Ok(n) => Ok(n),
                Err(e) => Err(self.record(e.into())),
            },
            _ => Err(self.record(SocketError::NotConnected)),
        }
    }

    /// True when nothing is left to read from a closing stream.
    fn stream_drained(&self) -> bool {
        match &self.io {
            SocketIo::Stream(s) => {
                let mut probe = [0u8; 1];
                !matches!(s.peek(&mut probe), Ok(n) if n > 0)
            }
            _ => true,
        }
    }

    fn take_io_error(&self) -> Option<SocketError> {
        match &self.io {
            SocketIo::Stream(s) => s.take_error().ok().flatten().map(SocketError::from),
            SocketIo::Dgram(s) => s.take_error().ok().flatten().map(SocketError::from),
            _ => None,
        }
    }

    /// Connect completion check: `Ok(true)` connected, `Ok(false)` still in
    /// progress, `Err` failed.
    fn check_connect(&mut self) -> Result<bool, SocketError> {
        let SocketIo::Stream(s) = &self.io else {
            return Err(SocketError::InvalidState);
        };
        if let Ok(Some(err)) = s.take_error() {
            return Err(err.into());
        }
        match s.peer_addr() {
            Ok(_) => Ok(true),
            Err(e)
                if e.kind() == std::io::ErrorKind::NotConnected
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn process_readiness(&mut self, readiness: Readiness) -> Vec<Signal> {
        let mut out = Vec::new();
        if self.close_signaled || matches!(self.io, SocketIo::None) {
            return out;
        }
        if !self.callbacks_enabled {
            self.deferred.merge(readiness);
            return out;
        }

        if self.state == SocketState::Connecting && !self.dns_pending {
            match self.check_connect() {
                Ok(true) => {
                    self.state = SocketState::Connected;
                    self.connect_deadline = None;
                    out.push(Signal::Connect);
                }
                Ok(false) => return out,
                Err(err) => {
                    // A failed connect never reports Connect; it is folded
                    // into a single close signal, like a peer close would be.
                    self.record(err);
                    self.state = SocketState::Closed;
                    self.close_signaled = true;
                    out.push(Signal::Close(Some(err)));
                    return out;
                }
            }
        } else if readiness.error {
            if let Some(err) = self.take_io_error() {
                self.record(err);
            }
        }

        if readiness.writable {
            match (&self.io, self.state) {
                // A bound datagram socket is usable without a connect.
                (SocketIo::Dgram(_), _) => out.push(Signal::Write),
                (SocketIo::Stream(_), SocketState::Connected) => out.push(Signal::Write),
                _ => {}
            }
        }

        let mut read_signaled = false;
        if readiness.readable {
            match (&self.io, self.state) {
                (SocketIo::Listener(_), _) => out.push(Signal::Accept),
                (SocketIo::Dgram(_), _) => {
                    out.push(Signal::Read);
                    read_signaled = true;
                }
                (SocketIo::Stream(_), SocketState::Connected | SocketState::Closing) => {
                    out.push(Signal::Read);
                    read_signaled = true;
                }
                _ => {}
            }
        }

        if readiness.read_closed
            && matches!(self.io, SocketIo::Stream(_))
            && !self.closing
            && self.state == SocketState::Connected
        {
            self.closing = true;
            self.state = SocketState::Closing;
            self.close_error = self.take_io_error();
            if self.stream_drained() {
                self.closing = false;
                self.close_signaled = true;
                self.state = SocketState::Closed;
                if let Some(err) = self.close_error {
                    self.record(err);
                }
                out.push(Signal::Close(self.close_error));
            } else if !read_signaled {
                // Prompt the owner to drain; the close follows the drain.
                out.push(Signal::Read);
            }
        }

        out
    }

    fn close_impl(&mut self) {
        match std::mem::replace(&mut self.io, SocketIo::None) {
            SocketIo::Stream(mut s) => {
                let _ = self.ctx.registry.deregister(&mut s);
            }
            SocketIo::Listener(mut l) => {
                let _ = self.ctx.registry.deregister(&mut l);
            }
            SocketIo::Dgram(mut s) => {
                let _ = self.ctx.registry.deregister(&mut s);
            }
            SocketIo::None => {}
        }
        // Cancel any in-flight lookup; stale completions are dropped by the
        // generation check.
        self.dns_pending = false;
        self.dns_generation += 1;
        self.closing = false;
        self.close_error = None;
        self.close_due = false;
        self.remote = None;
        self.bound = None;
        self.connect_deadline = None;
        self.state = SocketState::Closed;
    }
}

impl Drop for SocketCore {
    fn drop(&mut self) {
        self.close_impl();
    }
}
