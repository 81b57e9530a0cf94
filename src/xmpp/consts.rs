//! Namespaces and qualified names of the XMPP 1.0 client stream.

use once_cell::sync::Lazy;

use super::element::QName;

pub const NS_CLIENT: &str = "jabber:client";
pub const NS_STREAM: &str = "http://etherx.jabber.org/streams";
pub const NS_TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";

pub static QN_STREAM_STREAM: Lazy<QName> = Lazy::new(|| QName::new(NS_STREAM, "stream"));
pub static QN_STREAM_FEATURES: Lazy<QName> = Lazy::new(|| QName::new(NS_STREAM, "features"));

pub static QN_TLS_STARTTLS: Lazy<QName> = Lazy::new(|| QName::new(NS_TLS, "starttls"));
pub static QN_TLS_PROCEED: Lazy<QName> = Lazy::new(|| QName::new(NS_TLS, "proceed"));
pub static QN_TLS_FAILURE: Lazy<QName> = Lazy::new(|| QName::new(NS_TLS, "failure"));

pub static QN_SASL_MECHANISMS: Lazy<QName> = Lazy::new(|| QName::new(NS_SASL, "mechanisms"));
pub static QN_SASL_MECHANISM: Lazy<QName> = Lazy::new(|| QName::new(NS_SASL, "mechanism"));
pub static QN_SASL_AUTH: Lazy<QName> = Lazy::new(|| QName::new(NS_SASL, "auth"));
pub static QN_SASL_CHALLENGE: Lazy<QName> = Lazy::new(|| QName::new(NS_SASL, "challenge"));
pub static QN_SASL_RESPONSE: Lazy<QName> = Lazy::new(|| QName::new(NS_SASL, "response"));
pub static QN_SASL_SUCCESS: Lazy<QName> = Lazy::new(|| QName::new(NS_SASL, "success"));
pub static QN_SASL_FAILURE: Lazy<QName> = Lazy::new(|| QName::new(NS_SASL, "failure"));

pub static QN_IQ: Lazy<QName> = Lazy::new(|| QName::new(NS_CLIENT, "iq"));
pub static QN_BIND: Lazy<QName> = Lazy::new(|| QName::new(NS_BIND, "bind"));
pub static QN_BIND_RESOURCE: Lazy<QName> = Lazy::new(|| QName::new(NS_BIND, "resource"));
pub static QN_BIND_JID: Lazy<QName> = Lazy::new(|| QName::new(NS_BIND, "jid"));
pub static QN_SESSION: Lazy<QName> = Lazy::new(|| QName::new(NS_SESSION, "session"));

/// Alias kept close to the wire names used in stream handling
pub use self::QN_STREAM_STREAM as QN_STREAM;

pub const MECH_PLAIN: &str = "PLAIN";
