//! The engine edge consumed by the login task.
//!
//! The surrounding XMPP engine owns the transport, TLS, id generation and
//! SASL policy; the login task only drives the negotiation sequence through
//! this trait.

use thiserror::Error;

use super::element::Element;
use super::jid::Jid;
use super::sasl::SaslMechanism;

/// Reasons a login attempt can fail.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginError {
    #[error("stream version not supported")]
    Version,

    #[error("TLS negotiation failed")]
    Tls,

    #[error("authentication could not be started")]
    Auth,

    #[error("credentials rejected")]
    Unauthorized,

    #[error("resource binding failed")]
    Bind,
}

/// Collaborator interface of the surrounding engine.
///
/// All calls arrive on the engine's owning thread; the login task never
/// serializes access itself.
pub trait LoginEngine {
    /// Reset stream-level state before a (re)start.
    fn raise_reset(&mut self);

    /// Emit a stream header toward `domain`.
    fn send_start(&mut self, domain: &str);

    /// Emit a stanza on the wire.
    fn send_stanza(&mut self, stanza: &Element);

    /// Begin the TLS handshake against the named host; subsequent I/O is
    /// encrypted once it completes.
    fn start_tls(&mut self, domain: &str);

    /// Mint a unique IQ identifier.
    fn next_id(&mut self) -> String;

    /// Pick the preferred SASL mechanism from the server's offer.
    fn choose_sasl_mechanism(&self, offered: &[String], encrypted: bool) -> Option<String>;

    /// Instantiate a mechanism by name.
    fn sasl_mechanism(&self, name: &str) -> Option<Box<dyn SaslMechanism>>;

    /// The negotiation finished; `jid` is the bound full JID.
    fn signal_bound(&mut self, jid: &Jid);

    /// The negotiation failed.
    fn signal_error(&mut self, reason: LoginError, cause: i32);

    /// JID the login is performed for; its domain names the stream peer.
    fn user_jid(&self) -> &Jid;

    /// Whether TLS is required by configuration.
    fn tls_needed(&self) -> bool;

    /// Cleared by the task once the TLS upgrade has been requested.
    fn set_tls_needed(&mut self, needed: bool);

    /// Resource the client asks to bind, possibly empty.
    fn requested_resource(&self) -> &str;

    /// Whether the transport is already encrypted.
    fn is_encrypted(&self) -> bool;
}
