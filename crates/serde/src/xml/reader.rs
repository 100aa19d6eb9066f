//! Pull reader with resolved names.
//!
//! [`XmlEventReader`] wraps `quick_xml::Reader` and yields owned [`XmlEvent`]s whose element
//! and attribute names carry their namespace URI. Adjacent text, CDATA sections and entity
//! references are merged into a single text event; declarations and doctypes are skipped.

use std::collections::VecDeque;
use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};

use crate::error::{Result, XmlError};
use crate::name::{Namespace, QName};
use crate::namespace::NamespaceStack;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: QName,
    pub attributes: Vec<XmlAttribute>,
    pub namespace_decls: Vec<Namespace>,
}

impl StartElement {
    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == *name)
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    Start(StartElement),
    End(QName),
    Text(String),
    Comment(String),
    ProcessingInstruction(String),
    Eof,
}

impl XmlEvent {
    /// Whitespace-only text, comments and processing instructions.
    pub fn is_ignorable(&self) -> bool {
        match self {
            XmlEvent::Text(text) => is_whitespace(text),
            XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction(_) => true,
            _ => false,
        }
    }
}

pub fn is_whitespace(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

pub struct XmlEventReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    namespaces: NamespaceStack,
    peeked: VecDeque<XmlEvent>,
    /// Converted events not yet merged: synthesized end tags of empty elements and the event
    /// read past the end of a text run.
    raw_queue: VecDeque<XmlEvent>,
}

impl<'a> XmlEventReader<&'a [u8]> {
    pub fn from_str(xml: &'a str) -> Self {
        Self::new(xml.as_bytes())
    }
}

impl<R: BufRead> XmlEventReader<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = true;
        XmlEventReader {
            reader,
            buf: Vec::new(),
            namespaces: NamespaceStack::new(),
            peeked: VecDeque::new(),
            raw_queue: VecDeque::new(),
        }
    }

    /// Namespace URI bound to `prefix` at the current position.
    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces.uri_for(prefix)
    }

    /// Depth of the most recently read event.
    pub fn depth(&self) -> usize {
        self.namespaces.depth()
    }

    pub fn peek(&mut self) -> Result<&XmlEvent> {
        if self.peeked.is_empty() {
            let event = self.read_merged()?;
            self.peeked.push_back(event);
        }
        self.peeked
            .front()
            .ok_or_else(|| XmlError::malformed("event buffer unexpectedly empty"))
    }

    pub fn next(&mut self) -> Result<XmlEvent> {
        match self.peeked.pop_front() {
            Some(event) => Ok(event),
            None => self.read_merged(),
        }
    }

    /// Skips ignorable events and peeks at the next significant one.
    pub fn peek_significant(&mut self) -> Result<&XmlEvent> {
        while self.peek()?.is_ignorable() {
            self.next()?;
        }
        self.peek()
    }

    pub fn require_start(&mut self) -> Result<StartElement> {
        while self.peek()?.is_ignorable() {
            self.next()?;
        }
        match self.next()? {
            XmlEvent::Start(start) => Ok(start),
            other => Err(unexpected("a start tag", &other)),
        }
    }

    /// Consumes the end tag of `name`, skipping ignorable content before it.
    pub fn require_end(&mut self, name: &QName) -> Result<()> {
        while self.peek()?.is_ignorable() {
            self.next()?;
        }
        match self.next()? {
            XmlEvent::End(end) if end == *name => Ok(()),
            other => Err(unexpected(&format!("`</{}>`", name.qualified()), &other)),
        }
    }

    /// Consumes everything up to and including the end tag of an element whose start tag was
    /// already read.
    pub fn skip_to_end(&mut self) -> Result<()> {
        let mut depth = 1usize;
        loop {
            match self.next()? {
                XmlEvent::Start(_) => depth += 1,
                XmlEvent::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                XmlEvent::Eof => {
                    return Err(XmlError::malformed("unexpected end of document"));
                }
                _ => {}
            }
        }
    }

    /// Consumes the next element including all of its content.
    pub fn skip_element(&mut self) -> Result<()> {
        self.require_start()?;
        self.skip_to_end()
    }

    /// Reads text content up to the end tag of an element whose start tag was already read,
    /// consuming the end tag. Child elements are an error.
    pub fn read_element_text(&mut self, name: &QName) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next()? {
                XmlEvent::Text(t) => text.push_str(&t),
                XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction(_) => {}
                XmlEvent::End(_) => return Ok(text),
                XmlEvent::Start(start) => {
                    return Err(XmlError::malformed(format!(
                        "unexpected element `{}` inside simple content of `{}`",
                        start.name, name
                    )));
                }
                XmlEvent::Eof => {
                    return Err(XmlError::malformed(format!(
                        "unexpected end of document inside `{}`",
                        name
                    )));
                }
            }
        }
    }

    fn read_merged(&mut self) -> Result<XmlEvent> {
        let mut text = match self.read_raw()? {
            XmlEvent::Text(text) => text,
            other => return Ok(other),
        };
        loop {
            match self.read_raw()? {
                XmlEvent::Text(more) => text.push_str(&more),
                other => {
                    self.raw_queue.push_front(other);
                    return Ok(XmlEvent::Text(text));
                }
            }
        }
    }

    fn read_raw(&mut self) -> Result<XmlEvent> {
        if let Some(event) = self.raw_queue.pop_front() {
            return Ok(event);
        }
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(start) => {
                    let start = start.into_owned();
                    XmlEvent::Start(self.open_element(&start)?)
                }
                Event::End(end) => {
                    let raw = std::str::from_utf8(end.name().as_ref())?.to_string();
                    let name = self.resolve_element_name(&raw)?;
                    self.namespaces.pop_scope();
                    XmlEvent::End(name)
                }
                Event::Empty(start) => {
                    let start = start.into_owned();
                    let element = self.open_element(&start)?;
                    self.raw_queue.push_back(XmlEvent::End(element.name.clone()));
                    self.namespaces.pop_scope();
                    XmlEvent::Start(element)
                }
                Event::Text(text) => XmlEvent::Text(std::str::from_utf8(text.as_ref())?.to_string()),
                Event::CData(cdata) => {
                    XmlEvent::Text(std::str::from_utf8(cdata.as_ref())?.to_string())
                }
                Event::GeneralRef(reference) => {
                    let name = std::str::from_utf8(reference.as_ref())?;
                    XmlEvent::Text(resolve_entity(name)?)
                }
                Event::Comment(comment) => {
                    XmlEvent::Comment(std::str::from_utf8(comment.as_ref())?.to_string())
                }
                Event::PI(pi) => {
                    XmlEvent::ProcessingInstruction(std::str::from_utf8(pi.as_ref())?.to_string())
                }
                Event::Decl(_) | Event::DocType(_) => continue,
                Event::Eof => XmlEvent::Eof,
            };
            return Ok(event);
        }
    }

    fn open_element(&mut self, start: &BytesStart<'_>) -> Result<StartElement> {
        let raw_name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut raw_attributes = Vec::new();
        let mut namespace_decls = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let raw_value = std::str::from_utf8(&attr.value)?;
            let value = unescape(raw_value)
                .map_err(quick_xml::Error::from)?
                .into_owned();
            if key == "xmlns" {
                namespace_decls.push(Namespace::new("", value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                namespace_decls.push(Namespace::new(prefix, value));
            } else {
                raw_attributes.push((key, value));
            }
        }

        self.namespaces.push_scope();
        for ns in &namespace_decls {
            self.namespaces.declare(ns.prefix.clone(), ns.uri.clone());
        }

        let name = self.resolve_element_name(&raw_name)?;
        let mut attributes = Vec::with_capacity(raw_attributes.len());
        for (key, value) in raw_attributes {
            let name = match key.split_once(':') {
                Some((prefix, local)) => QName::new(self.bound_uri(prefix, &key)?, local, prefix),
                None => QName::local(key),
            };
            attributes.push(XmlAttribute { name, value });
        }
        Ok(StartElement {
            name,
            attributes,
            namespace_decls,
        })
    }

    fn resolve_element_name(&self, raw: &str) -> Result<QName> {
        match raw.split_once(':') {
            Some((prefix, local)) => Ok(QName::new(self.bound_uri(prefix, raw)?, local, prefix)),
            None => Ok(QName::new(self.namespaces.default_namespace(), raw, "")),
        }
    }

    fn bound_uri(&self, prefix: &str, name: &str) -> Result<String> {
        self.namespaces
            .uri_for(prefix)
            .map(str::to_string)
            .ok_or_else(|| {
                XmlError::malformed(format!("unbound namespace prefix in `{}`", name))
            })
    }
}

/// Replacement text for `&name;`: predefined entities and character references.
fn resolve_entity(name: &str) -> Result<String> {
    if let Some(reference) = name.strip_prefix('#') {
        let code = match reference.strip_prefix('x').or_else(|| reference.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => reference.parse::<u32>().ok(),
        };
        return code
            .and_then(char::from_u32)
            .map(|c| c.to_string())
            .ok_or_else(|| XmlError::UnknownEntity(name.to_string()));
    }
    resolve_predefined_entity(name)
        .map(str::to_string)
        .ok_or_else(|| XmlError::UnknownEntity(name.to_string()))
}

fn unexpected(expected: &str, found: &XmlEvent) -> XmlError {
    let found = match found {
        XmlEvent::Start(start) => format!("start of `{}`", start.name),
        XmlEvent::End(name) => format!("end of `{}`", name),
        XmlEvent::Text(text) => format!("text `{}`", text.trim()),
        XmlEvent::Comment(_) => "a comment".to_string(),
        XmlEvent::ProcessingInstruction(_) => "a processing instruction".to_string(),
        XmlEvent::Eof => "end of document".to_string(),
    };
    XmlError::malformed(format!("expected {}, found {}", expected, found))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(xml: &str) -> Result<Vec<XmlEvent>> {
        let mut reader = XmlEventReader::from_str(xml);
        let mut events = Vec::new();
        loop {
            match reader.next()? {
                XmlEvent::Eof => return Ok(events),
                event => events.push(event),
            }
        }
    }

    #[test]
    fn test_resolves_prefixes() -> Result<()> {
        let events = events(r#"<ns:food xmlns:ns="urn:food" ns:istasty="yes" plain="1"><name/></ns:food>"#)?;
        let XmlEvent::Start(food) = &events[0] else {
            panic!("expected start, got {:?}", events[0]);
        };
        assert_eq!(food.name, QName::new("urn:food", "food", "ns"));
        assert_eq!(food.attribute(&QName::new("urn:food", "istasty", "")), Some("yes"));
        assert_eq!(food.attribute(&QName::local("plain")), Some("1"));
        assert_eq!(food.namespace_decls, vec![Namespace::new("ns", "urn:food")]);
        assert_eq!(events[1], XmlEvent::Start(StartElement {
            name: QName::local("name"),
            attributes: Vec::new(),
            namespace_decls: Vec::new(),
        }));
        assert_eq!(events[2], XmlEvent::End(QName::local("name")));
        Ok(())
    }

    #[test]
    fn test_default_namespace_applies_to_elements_only() -> Result<()> {
        let events = events(r#"<root xmlns="urn:d" a="1"/>"#)?;
        let XmlEvent::Start(root) = &events[0] else {
            panic!("expected start");
        };
        assert_eq!(root.name.namespace, "urn:d");
        assert_eq!(root.attributes[0].name, QName::local("a"));
        Ok(())
    }

    #[test]
    fn test_entities_merge_into_text() -> Result<()> {
        let events = events("<a>fish &amp; chips &#65;&#x42;<![CDATA[<raw>]]></a>")?;
        assert_eq!(events[1], XmlEvent::Text("fish & chips AB<raw>".to_string()));
        Ok(())
    }

    #[test]
    fn test_unknown_entity_is_named() {
        let err = events("<a>&unknown;</a>").unwrap_err();
        assert!(matches!(&err, XmlError::UnknownEntity(name) if name == "unknown"));
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_unbound_prefix_fails() {
        assert!(events("<x:a/>").is_err());
    }

    #[test]
    fn test_skip_element() -> Result<()> {
        let mut reader = XmlEventReader::from_str("<r><skip><deep>t</deep></skip><keep/></r>");
        reader.require_start()?;
        reader.skip_element()?;
        let keep = reader.require_start()?;
        assert_eq!(keep.name.local, "keep");
        Ok(())
    }
}
