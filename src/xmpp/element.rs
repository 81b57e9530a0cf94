//! Stanza trees.
//!
//! The login task consumes pre-parsed elements: qualified name, attributes
//! and child nodes in document order. Parsing and serialization live at the
//! edges (transports, tests, logging) and go through quick-xml.

use std::fmt;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::writer::Writer;

use crate::error::XtalkError;

use super::consts::NS_STREAM;

/// Namespace-qualified element name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    ns: String,
    local: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn local(&self) -> &str {
        &self.local
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.local)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Element(Element),
    Text(String),
}

/// An XML tree element: qualified name, attributes and children in document
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: QName,
    attrs: Vec<(String, String)>,
    nodes: Vec<Node>,
}

impl Element {
    pub fn new(name: &QName) -> Self {
        Self {
            name: name.clone(),
            attrs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn is_named(&self, name: &QName) -> bool {
        self.name == *name
    }

    // --- attributes ----------------------------------------------------

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.attrs.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.attrs.push((name, value));
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    // --- children ------------------------------------------------------

    pub fn add_child(&mut self, child: Element) {
        self.nodes.push(Node::Element(child));
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.add_child(child);
        self
    }

    pub fn add_text(&mut self, text: impl Into<String>) {
        self.nodes.push(Node::Text(text.into()));
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.add_text(text);
        self
    }

    /// Child elements in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    pub fn first_element(&self) -> Option<&Element> {
        self.children().next()
    }

    pub fn first_named(&self, name: &QName) -> Option<&Element> {
        self.children().find(|el| el.is_named(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a QName) -> impl Iterator<Item = &'a Element> + 'a {
        self.children().filter(move |el| el.is_named(name))
    }

    /// Concatenated direct text content.
    pub fn body_text(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            if let Node::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }

    /// Body text of the first child with the given name.
    pub fn text_named(&self, name: &QName) -> Option<String> {
        self.first_named(name).map(Element::body_text)
    }

    // --- wire form -----------------------------------------------------

    /// Serialize to XML. Namespace declarations are synthesized where the
    /// tree does not already carry explicit `xmlns` attributes; elements in
    /// the streams namespace use the conventional `stream:` prefix.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        self.write(&mut writer, "", false);
        String::from_utf8(writer.into_inner()).expect("serializer emits UTF-8")
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>, inherited_default: &str, stream_declared: bool) {
        let streams_ns = self.name.ns() == NS_STREAM;
        let tag = if streams_ns {
            format!("stream:{}", self.name.local())
        } else {
            self.name.local().to_string()
        };

        let mut start = BytesStart::new(tag.as_str());
        for (key, value) in &self.attrs {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        let mut child_default = inherited_default;
        let mut declared = stream_declared || self.has_attr("xmlns:stream");
        if streams_ns {
            if !declared {
                start.push_attribute(("xmlns:stream", NS_STREAM));
                declared = true;
            }
        } else {
            if self.name.ns() != inherited_default
                && !self.name.ns().is_empty()
                && !self.has_attr("xmlns")
            {
                start.push_attribute(("xmlns", self.name.ns()));
            }
            child_default = self.name.ns();
        }

        if self.nodes.is_empty() {
            let _ = writer.write_event(Event::Empty(start));
            return;
        }
        let _ = writer.write_event(Event::Start(start));
        for node in &self.nodes {
            match node {
                Node::Element(el) => el.write(writer, child_default, declared),
                Node::Text(text) => {
                    let _ = writer.write_event(Event::Text(BytesText::new(text)));
                }
            }
        }
        let _ = writer.write_event(Event::End(BytesEnd::new(tag.as_str())));
    }

    /// Parse one complete element from its XML form.
    pub fn parse(input: &str) -> Result<Element, XtalkError> {
        let mut reader = NsReader::from_str(input);
        let mut stack: Vec<Element> = Vec::new();
        loop {
            match reader.read_resolved_event() {
                Ok((resolved, Event::Start(start))) => {
                    let element = element_from_start(resolved, &start)?;
                    stack.push(element);
                }
                Ok((resolved, Event::Empty(start))) => {
                    let element = element_from_start(resolved, &start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.add_child(element),
                        None => return Ok(element),
                    }
                }
                Ok((_, Event::End(_))) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| XtalkError::Xml("unbalanced end tag".into()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.add_child(element),
                        None => return Ok(element),
                    }
                }
                Ok((_, Event::Text(text))) => {
                    let text = text
                        .unescape()
                        .map_err(|e| XtalkError::Xml(e.to_string()))?;
                    if let Some(top) = stack.last_mut() {
                        if !text.trim().is_empty() {
                            top.add_text(text.into_owned());
                        }
                    }
                }
                Ok((_, Event::CData(data))) => {
                    if let Some(top) = stack.last_mut() {
                        top.add_text(String::from_utf8_lossy(&data).into_owned());
                    }
                }
                Ok((_, Event::Eof)) => {
                    return Err(XtalkError::Xml("unexpected end of document".into()));
                }
                Ok(_) => {}
                Err(e) => return Err(XtalkError::Xml(e.to_string())),
            }
        }
    }
}

fn element_from_start(
    resolved: ResolveResult<'_>,
    start: &BytesStart<'_>,
) -> Result<Element, XtalkError> {
    let ns = match resolved {
        ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.0).into_owned(),
        _ => String::new(),
    };
    let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut element = Element::new(&QName::new(ns, local));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XtalkError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| XtalkError::Xml(e.to_string()))?
            .into_owned();
        element.set_attr(key, value);
    }
    Ok(element)
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}
