//! SASL mechanism interface and the PLAIN mechanism.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::consts::{MECH_PLAIN, QN_SASL_AUTH};
use super::element::Element;

/// One SASL mechanism driving its own `<auth>`/`<challenge>`/`<response>`
/// exchange. The caller owns every element a mechanism returns.
pub trait SaslMechanism {
    /// Mechanism name as advertised by servers.
    fn name(&self) -> &str;

    /// Produce the opening `<auth>` element; `None` when the exchange
    /// cannot start.
    fn start_auth(&mut self) -> Option<Element>;

    /// Produce the `<response>` to a server challenge; `None` aborts the
    /// exchange.
    fn handle_challenge(&mut self, challenge: &Element) -> Option<Element>;
}

/// RFC 4616 PLAIN: a single initial response carrying
/// `authzid NUL authcid NUL passwd`, base64-encoded.
pub struct PlainMechanism {
    username: String,
    password: String,
}

impl PlainMechanism {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslMechanism for PlainMechanism {
    fn name(&self) -> &str {
        MECH_PLAIN
    }

    fn start_auth(&mut self) -> Option<Element> {
        let mut message = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        message.push(0);
        message.extend_from_slice(self.username.as_bytes());
        message.push(0);
        message.extend_from_slice(self.password.as_bytes());
        Some(
            Element::new(&QN_SASL_AUTH)
                .with_attr("mechanism", MECH_PLAIN)
                .with_text(BASE64.encode(message)),
        )
    }

    fn handle_challenge(&mut self, _challenge: &Element) -> Option<Element> {
        // PLAIN is a single-shot exchange; a challenge is a protocol error.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp::consts::NS_SASL;

    #[test]
    fn test_plain_initial_response() {
        let mut plain = PlainMechanism::new("foo", "bar");
        let auth = plain.start_auth().expect("PLAIN always starts");
        assert!(auth.is_named(&QN_SASL_AUTH));
        assert_eq!(auth.name().ns(), NS_SASL);
        assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
        // RFC 4616 test vector for foo/bar with empty authzid
        assert_eq!(auth.body_text(), "AGZvbwBiYXI=");
    }

    #[test]
    fn test_plain_rejects_challenge() {
        let mut plain = PlainMechanism::new("foo", "bar");
        let challenge = Element::new(&crate::xmpp::consts::QN_SASL_CHALLENGE);
        assert!(plain.handle_challenge(&challenge).is_none());
    }
}
