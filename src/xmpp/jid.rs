//! Jabber identifiers: `[node@]domain[/resource]`.
//!
//! Full stringprep/precis validation is out of scope; this type carries the
//! split form and the predicates the negotiation needs.

use std::fmt;

use crate::error::XtalkError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn new(
        node: Option<impl Into<String>>,
        domain: impl Into<String>,
        resource: Option<impl Into<String>>,
    ) -> Self {
        Self {
            node: node.map(Into::into),
            domain: domain.into(),
            resource: resource.map(Into::into),
        }
    }

    /// Parse the textual form. Empty node/resource parts are rejected.
    pub fn parse(text: &str) -> Result<Jid, XtalkError> {
        let (node, rest) = match text.split_once('@') {
            Some((node, rest)) => (Some(node), rest),
            None => (None, text),
        };
        let (domain, resource) = match rest.split_once('/') {
            Some((domain, resource)) => (domain, Some(resource)),
            None => (rest, None),
        };
        if domain.is_empty()
            || node.is_some_and(str::is_empty)
            || resource.is_some_and(str::is_empty)
        {
            return Err(XtalkError::Jid(text.to_string()));
        }
        Ok(Jid {
            node: node.map(str::to_string),
            domain: domain.to_string(),
            resource: resource.map(str::to_string),
        })
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Valid means a non-empty domain is present.
    pub fn is_valid(&self) -> bool {
        !self.domain.is_empty()
    }

    /// Full means a resource is present on a valid JID.
    pub fn is_full(&self) -> bool {
        self.is_valid() && self.resource.is_some()
    }

    /// The same identity without the resource.
    pub fn bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{}@", node)?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}
