//! # XMPP Module
//!
//! The client half of XMPP 1.0 stream negotiation and its supporting types.
//!
//! ## Components
//!
//! - **Element/QName**: stanza trees, built programmatically or parsed
//! - **Jid**: jabber identifiers with the full/bare distinction
//! - **LoginEngine**: the edge the surrounding engine implements
//! - **SaslMechanism**: pluggable authentication exchanges (PLAIN shipped)
//! - **LoginTask**: the stream negotiation state machine

pub mod consts;
mod element;
mod engine;
mod jid;
mod login;
mod sasl;

pub use element::{Element, QName};
pub use engine::{LoginEngine, LoginError};
pub use jid::Jid;
pub use login::{LoginState, LoginTask};
pub use sasl::{PlainMechanism, SaslMechanism};

use serde::{Deserialize, Serialize};

use crate::error::XtalkError;

/// Client login configuration, as an engine typically loads it from
/// application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Bare JID to authenticate as (e.g. "foo@example.com")
    pub jid: String,
    /// Resource to request at bind; empty lets the server assign one
    #[serde(default)]
    pub resource: String,
    /// Whether the stream must be upgraded to TLS before authentication
    #[serde(default = "default_require_tls")]
    pub require_tls: bool,
}

fn default_require_tls() -> bool {
    true
}

impl Settings {
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            resource: String::new(),
            require_tls: true,
        }
    }

    /// Parsed form of the configured JID.
    pub fn user_jid(&self) -> Result<Jid, XtalkError> {
        Jid::parse(&self.jid)
    }
}
