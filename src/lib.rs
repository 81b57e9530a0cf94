//! # xtalk
//!
//! Event-driven socket services and XMPP 1.0 stream negotiation for
//! real-time communication clients.
//!
//! ## Architecture
//!
//! The crate is organized into the following layers:
//!
//! - **Endpoint Layer**: resolved/unresolved endpoint identity
//! - **Socket Layer**: non-blocking sockets with a signal-sink contract
//! - **Queue Layer**: deferred work consumed by the event pump
//! - **Server Layer**: the event pump; wait cycles, cross-thread wake-ups,
//!   socket registration
//! - **XMPP Layer**: stream negotiation state machine, stanza trees, SASL
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xtalk::{MessageQueue, PollServer, SocketServer, SocketType};
//!
//! let queue = MessageQueue::new();
//! let mut server = PollServer::new()?;
//! server.set_queue(queue.clone());
//!
//! let socket = server.create_async_socket(SocketType::Stream).unwrap();
//! // connect, register a sink, then drive everything from one thread:
//! loop {
//!     server.wait(None, true);
//! }
//! ```

pub mod endpoint;
pub mod queue;
pub mod server;
pub mod socket;
pub mod xmpp;

// Re-export commonly used types
pub use endpoint::Endpoint;
pub use queue::{Message, MessageQueue};
pub use server::{NotifyServer, PollConfig, PollServer, SocketServer, Wakeup};
pub use socket::{
    AsyncSocket, Pinger, Resolver, SocketError, SocketOption, SocketSink, SocketState, SocketType,
    SystemResolver,
};
pub use xmpp::{
    Element, Jid, LoginEngine, LoginError, LoginState, LoginTask, QName, SaslMechanism, Settings,
};

/// Error types for the xtalk crate
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum XtalkError {
        #[error("socket error: {0}")]
        Socket(#[from] crate::socket::SocketError),

        #[error("login error: {0}")]
        Login(#[from] crate::xmpp::LoginError),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("XML error: {0}")]
        Xml(String),

        #[error("invalid JID: {0}")]
        Jid(String),
    }

    pub type Result<T> = std::result::Result<T, XtalkError>;
}

pub use error::{Result, XtalkError};

/// Constants used throughout the crate
pub mod consts {
    /// XMPP stream version spoken by the login task
    pub const XMPP_VERSION: &str = "1.0";

    /// Default listen backlog
    pub const DEFAULT_LISTEN_BACKLOG: u32 = 128;

    /// Default event capacity of a poll cycle
    pub const DEFAULT_POLL_CAPACITY: usize = 64;

    /// IPv4 header size in bytes (for MTU probes)
    pub const IP_HEADER_SIZE: usize = 20;

    /// ICMP echo header size in bytes (for MTU probes)
    pub const ICMP_HEADER_SIZE: usize = 8;
}
