//! Helpers on top of `xmltree::Element` for the request/response XML
//! the engine deals with.
//!
//! Emission never goes through the namespace machinery of the writer:
//! prefixes are part of the element name, and `xmlns` declarations are
//! written as plain attributes wherever an element carries its own
//! namespace. That is what the original wire format looks like, and it
//! keeps opaque stored fragments round-trip safe.
use std::io::{Cursor, Read, Write};

use xml::EmitterConfig;
use xml::attribute::Attribute;
use xml::name::Name;
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xmltree::{Element, XMLNode};

use crate::errors::DavError;
use crate::util::MemBuffer;

pub(crate) trait ElementExt {
    fn new2<'a, N: Into<&'a str>>(n: N) -> Self;
    fn text<T: Into<String>>(self, t: T) -> Self;
    fn push(&mut self, e: Element);
    fn attr<S: Into<String>>(self, name: S, value: S) -> Self;
    fn parse2<R: Read>(r: R) -> Result<Element, DavError>;
    fn child_elements(&self) -> Vec<&Element>;
    fn into_child_elements(self) -> Vec<Element>;
    fn has_child_elements(&self) -> bool;
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
}

impl ElementExt for Element {
    // `new2("D:href")` makes an element with prefix "D" and name "href".
    fn new2<'a, N: Into<&'a str>>(n: N) -> Element {
        let v: Vec<&str> = n.into().splitn(2, ':').collect();
        if v.len() == 1 {
            Element::new(v[0])
        } else {
            let mut e = Element::new(v[1]);
            e.prefix = Some(v[0].to_string());
            e
        }
    }

    fn text<T: Into<String>>(mut self, t: T) -> Element {
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn push(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn attr<S: Into<String>>(mut self, name: S, value: S) -> Element {
        self.attributes.insert(name.into(), value.into());
        self
    }

    fn parse2<R: Read>(r: R) -> Result<Element, DavError> {
        match Element::parse(r) {
            Ok(elem) => Ok(elem),
            Err(xmltree::ParseError::MalformedXml(_)) => Err(DavError::XmlParseError),
            Err(_) => Err(DavError::XmlReadError),
        }
    }

    fn child_elements(&self) -> Vec<&Element> {
        self.children
            .iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn into_child_elements(self) -> Vec<Element> {
        self.children
            .into_iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn has_child_elements(&self) -> bool {
        self.children
            .iter()
            .any(|n| matches!(n, XMLNode::Element(_)))
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let qname = match &self.prefix {
            Some(p) => format!("{}:{}", p, self.name),
            None => self.name.clone(),
        };

        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        // carry the element's own namespace as a declaration, unless
        // one is already present as an attribute.
        let decl = match (&self.prefix, &self.namespace) {
            (Some(p), Some(ns)) => Some((format!("xmlns:{}", p), ns.clone())),
            (None, Some(ns)) => Some(("xmlns".to_string(), ns.clone())),
            _ => None,
        };
        if let Some((k, v)) = &decl {
            if !self.attributes.contains_key(k) {
                attributes.push((k.clone(), v.clone()));
            }
        }
        for (k, v) in &self.attributes {
            attributes.push((k.clone(), v.clone()));
        }
        let attributes = attributes
            .iter()
            .map(|(k, v)| Attribute {
                name: Name::local(k.as_str()),
                value: v.as_str(),
            })
            .collect::<Vec<_>>();

        emitter.write(XmlWEvent::StartElement {
            name: Name::local(&qname),
            attributes: std::borrow::Cow::Owned(attributes),
            namespace: std::borrow::Cow::Owned(xml::namespace::Namespace::empty()),
        })?;
        for node in &self.children {
            match node {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) => emitter.write(XmlWEvent::Characters(t))?,
                XMLNode::CData(t) => emitter.write(XmlWEvent::Characters(t))?,
                _ => {}
            }
        }
        emitter.write(XmlWEvent::EndElement {
            name: Some(Name::local(&qname)),
        })
    }
}

/// New event writer over a [`MemBuffer`] with the XML declaration
/// already written.
pub(crate) fn emitter(buf: MemBuffer) -> Result<EventWriter<MemBuffer>, DavError> {
    let mut emitter = EventWriter::new_with_config(
        buf,
        EmitterConfig {
            perform_indent: false,
            ..Default::default()
        },
    );
    emitter.write(XmlWEvent::StartDocument {
        version: xml::common::XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}

/// Serialize the content of an element (both text and nested elements)
/// to a string, without the outer tags. This is the storage format for
/// dead property values.
pub(crate) fn inner_xml(elem: &Element) -> String {
    let mut out = String::new();
    for node in &elem.children {
        match node {
            XMLNode::Text(t) => out.push_str(&escape_text(t)),
            XMLNode::CData(t) => out.push_str(&escape_text(t)),
            XMLNode::Element(e) => {
                let mut w = EventWriter::new_with_config(
                    MemBuffer::new(),
                    EmitterConfig {
                        write_document_declaration: false,
                        ..Default::default()
                    },
                );
                if e.write_ev(&mut w).is_ok() {
                    let bytes = w.into_inner().take();
                    out.push_str(&String::from_utf8_lossy(&bytes));
                }
            }
            _ => {}
        }
    }
    out
}

/// Parse a stored fragment back into child nodes. Fragments that do not
/// parse (they are opaque, after all) are preserved as a text node.
pub(crate) fn parse_fragment(fragment: &str) -> Vec<XMLNode> {
    let wrapped = format!("<fragment-wrapper>{}</fragment-wrapper>", fragment);
    match Element::parse(Cursor::new(wrapped.into_bytes())) {
        Ok(elem) => elem.children,
        Err(_) => vec![XMLNode::Text(fragment.to_string())],
    }
}

fn escape_text(t: &str) -> String {
    t.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
