//! Output side of the codec.
//!
//! The encoder only talks to [`XmlWriter`]. [`QuickXmlWriter`] streams to a `quick_xml`
//! writer, [`FragmentBuffer`] records operations to be replayed later (deferred child
//! content), and [`NamespaceCollector`] discards output and keeps the namespace declarations.

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::{Result, XmlError};
use crate::name::{Namespace, QName};

/// Sink for serialization events. Names passed in are already resolved: prefixes are final
/// and every namespace they use has been declared through [`XmlWriter::namespace_decl`].
pub trait XmlWriter {
    fn start_tag(&mut self, name: &QName) -> Result<()>;

    /// Declares `prefix` (empty for the default namespace) on the element just started.
    fn namespace_decl(&mut self, prefix: &str, uri: &str) -> Result<()>;

    fn attribute(&mut self, name: &QName, value: &str) -> Result<()>;

    fn text(&mut self, text: &str) -> Result<()>;

    fn cdata(&mut self, text: &str) -> Result<()>;

    fn comment(&mut self, text: &str) -> Result<()>;

    fn end_tag(&mut self, name: &QName) -> Result<()>;

    /// Number of currently open elements.
    fn depth(&self) -> usize;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// [`XmlWriter`] over `quick_xml::Writer`.
///
/// The start tag of the innermost element is held back until content arrives so that
/// attributes can still be added, and so an element without content is written as an empty
/// tag.
pub struct QuickXmlWriter<W: Write> {
    writer: Writer<W>,
    pending: Option<BytesStart<'static>>,
    open: Vec<String>,
}

impl<W: Write> QuickXmlWriter<W> {
    pub fn new(inner: W, indent: Option<usize>) -> Self {
        let writer = match indent {
            Some(width) => Writer::new_with_indent(inner, b' ', width),
            None => Writer::new(inner),
        };
        QuickXmlWriter {
            writer,
            pending: None,
            open: Vec::new(),
        }
    }

    pub fn declaration(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        if let Some(start) = self.pending.take() {
            self.writer.write_event(Event::Start(start))?;
        }
        Ok(())
    }

    /// Checks that every element was closed and returns the underlying sink.
    pub fn finish(mut self) -> Result<W> {
        self.flush_pending()?;
        if let Some(open) = self.open.last() {
            return Err(XmlError::malformed(format!(
                "element `{}` was never closed",
                open
            )));
        }
        Ok(self.writer.into_inner())
    }
}

impl<W: Write> XmlWriter for QuickXmlWriter<W> {
    fn start_tag(&mut self, name: &QName) -> Result<()> {
        self.flush_pending()?;
        let qualified = name.qualified();
        self.pending = Some(BytesStart::new(qualified.clone()));
        self.open.push(qualified);
        Ok(())
    }

    fn namespace_decl(&mut self, prefix: &str, uri: &str) -> Result<()> {
        let key = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", prefix)
        };
        self.attribute(&QName::local(key), uri)
    }

    fn attribute(&mut self, name: &QName, value: &str) -> Result<()> {
        let start = self.pending.as_mut().ok_or_else(|| {
            XmlError::malformed(format!(
                "attribute `{}` written after element content",
                name.qualified()
            ))
        })?;
        start.push_attribute((name.qualified().as_str(), value));
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    fn cdata(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer.write_event(Event::CData(BytesCData::new(text)))?;
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer
            .write_event(Event::Comment(BytesText::from_escaped(text)))?;
        Ok(())
    }

    fn end_tag(&mut self, name: &QName) -> Result<()> {
        let qualified = name.qualified();
        match self.open.pop() {
            Some(open) if open == qualified => {}
            Some(open) => {
                return Err(XmlError::malformed(format!(
                    "closing `{}` while `{}` is open",
                    qualified, open
                )));
            }
            None => {
                return Err(XmlError::malformed(format!(
                    "closing `{}` with no open element",
                    qualified
                )));
            }
        }
        match self.pending.take() {
            Some(start) => self.writer.write_event(Event::Empty(start))?,
            None => self.writer.write_event(Event::End(BytesEnd::new(qualified)))?,
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.open.len()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.get_mut().flush()?;
        Ok(())
    }
}

/// A recorded writer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    StartTag(QName),
    NamespaceDecl(Namespace),
    Attribute(QName, String),
    Text(String),
    CData(String),
    Comment(String),
    EndTag(QName),
}

/// Records writer calls for later replay.
#[derive(Debug, Clone, Default)]
pub struct FragmentBuffer {
    ops: Vec<WriteOp>,
    depth: usize,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Writes the recorded operations to `target` in order.
    pub fn replay(self, target: &mut dyn XmlWriter) -> Result<()> {
        for op in self.ops {
            match op {
                WriteOp::StartTag(name) => target.start_tag(&name)?,
                WriteOp::NamespaceDecl(ns) => target.namespace_decl(&ns.prefix, &ns.uri)?,
                WriteOp::Attribute(name, value) => target.attribute(&name, &value)?,
                WriteOp::Text(text) => target.text(&text)?,
                WriteOp::CData(text) => target.cdata(&text)?,
                WriteOp::Comment(text) => target.comment(&text)?,
                WriteOp::EndTag(name) => target.end_tag(&name)?,
            }
        }
        Ok(())
    }
}

impl XmlWriter for FragmentBuffer {
    fn start_tag(&mut self, name: &QName) -> Result<()> {
        self.depth += 1;
        self.ops.push(WriteOp::StartTag(name.clone()));
        Ok(())
    }

    fn namespace_decl(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.ops
            .push(WriteOp::NamespaceDecl(Namespace::new(prefix, uri)));
        Ok(())
    }

    fn attribute(&mut self, name: &QName, value: &str) -> Result<()> {
        self.ops
            .push(WriteOp::Attribute(name.clone(), value.to_string()));
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.ops.push(WriteOp::Text(text.to_string()));
        Ok(())
    }

    fn cdata(&mut self, text: &str) -> Result<()> {
        self.ops.push(WriteOp::CData(text.to_string()));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.ops.push(WriteOp::Comment(text.to_string()));
        Ok(())
    }

    fn end_tag(&mut self, name: &QName) -> Result<()> {
        self.depth = self.depth.saturating_sub(1);
        self.ops.push(WriteOp::EndTag(name.clone()));
        Ok(())
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

/// Discards output and keeps every prefixed namespace declaration, first binding wins.
#[derive(Debug, Clone, Default)]
pub struct NamespaceCollector {
    namespaces: Vec<Namespace>,
    depth: usize,
}

impl NamespaceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_namespaces(self) -> Vec<Namespace> {
        self.namespaces
    }
}

impl XmlWriter for NamespaceCollector {
    fn start_tag(&mut self, _name: &QName) -> Result<()> {
        self.depth += 1;
        Ok(())
    }

    fn namespace_decl(&mut self, prefix: &str, uri: &str) -> Result<()> {
        let known = self
            .namespaces
            .iter()
            .any(|ns| ns.prefix == prefix || ns.uri == uri);
        if !prefix.is_empty() && !known {
            self.namespaces.push(Namespace::new(prefix, uri));
        }
        Ok(())
    }

    fn attribute(&mut self, _name: &QName, _value: &str) -> Result<()> {
        Ok(())
    }

    fn text(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn cdata(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn comment(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn end_tag(&mut self, _name: &QName) -> Result<()> {
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut QuickXmlWriter<Vec<u8>>) -> Result<()>) -> String {
        let mut writer = QuickXmlWriter::new(Vec::new(), None);
        f(&mut writer).unwrap();
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_empty_element_and_attributes() {
        let xml = written(|w| {
            let food = QName::new("urn:food", "food", "ns");
            w.start_tag(&food)?;
            w.namespace_decl("ns", "urn:food")?;
            w.attribute(&QName::local("kind"), "a<b")?;
            w.end_tag(&food)
        });
        assert_eq!(xml, r#"<ns:food xmlns:ns="urn:food" kind="a&lt;b"/>"#);
    }

    #[test]
    fn test_attribute_after_content_fails() {
        let mut writer = QuickXmlWriter::new(Vec::new(), None);
        let root = QName::local("root");
        writer.start_tag(&root).unwrap();
        writer.text("x").unwrap();
        assert!(writer.attribute(&QName::local("late"), "1").is_err());
    }

    #[test]
    fn test_mismatched_end_tag_fails() {
        let mut writer = QuickXmlWriter::new(Vec::new(), None);
        writer.start_tag(&QName::local("a")).unwrap();
        assert!(writer.end_tag(&QName::local("b")).is_err());
    }

    #[test]
    fn test_fragment_replay() {
        let mut fragment = FragmentBuffer::new();
        let name = QName::local("name");
        fragment.start_tag(&name).unwrap();
        assert_eq!(fragment.depth(), 1);
        fragment.text("burgers & fries").unwrap();
        fragment.end_tag(&name).unwrap();
        assert_eq!(fragment.depth(), 0);

        let xml = written(|w| {
            let root = QName::local("root");
            w.start_tag(&root)?;
            fragment.replay(w)?;
            w.end_tag(&root)
        });
        assert_eq!(xml, "<root><name>burgers &amp; fries</name></root>");
    }

    #[test]
    fn test_collector_keeps_first_prefixed_binding() {
        let mut collector = NamespaceCollector::new();
        collector.namespace_decl("", "urn:default").unwrap();
        collector.namespace_decl("a", "urn:a").unwrap();
        collector.namespace_decl("a", "urn:other").unwrap();
        collector.namespace_decl("b", "urn:a").unwrap();
        assert_eq!(
            collector.into_namespaces(),
            vec![Namespace::new("a", "urn:a")]
        );
    }
}
