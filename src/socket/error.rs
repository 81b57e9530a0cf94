//! Socket failure taxonomy and translation from OS error codes.

use std::io;
use thiserror::Error;

/// Failure kinds carried by the socket layer.
///
/// Operations record the most recent kind on the socket (`last_error`) in
/// addition to returning it, so owners reacting to a close signal can ask
/// the socket what went wrong.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    #[error("operation would block")]
    WouldBlock,

    #[error("access denied")]
    AccessDenied,

    #[error("address unavailable")]
    AddressUnavailable,

    #[error("network is down")]
    NetworkDown,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("connection aborted")]
    ConnectionAborted,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("operation timed out")]
    TimedOut,

    #[error("host is down")]
    HostDown,

    #[error("host unreachable")]
    HostUnreachable,

    #[error("host not found")]
    HostNotFound,

    #[error("socket is not connected")]
    NotConnected,

    #[error("operation invalid in current socket state")]
    InvalidState,

    #[error("socket error code {0}")]
    Other(i32),
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock => SocketError::WouldBlock,
            ErrorKind::PermissionDenied => SocketError::AccessDenied,
            ErrorKind::AddrNotAvailable | ErrorKind::AddrInUse => SocketError::AddressUnavailable,
            ErrorKind::NetworkDown => SocketError::NetworkDown,
            ErrorKind::NetworkUnreachable => SocketError::NetworkUnreachable,
            ErrorKind::ConnectionReset => SocketError::ConnectionReset,
            ErrorKind::ConnectionAborted => SocketError::ConnectionAborted,
            ErrorKind::ConnectionRefused => SocketError::ConnectionRefused,
            ErrorKind::TimedOut => SocketError::TimedOut,
            ErrorKind::HostUnreachable => SocketError::HostUnreachable,
            ErrorKind::NotConnected => SocketError::NotConnected,
            _ => SocketError::Other(err.raw_os_error().unwrap_or(-1)),
        }
    }
}
