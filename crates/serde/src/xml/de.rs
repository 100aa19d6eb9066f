//! XML decoding through a custom `serde::Deserializer`.
//!
//! Decoding is pull based. A composite value first hands out its attributes, then walks its
//! child events, and finally reports fields that never appeared: defaults, empty collections
//! and collected attributes are produced there, while a required field that is still missing
//! fails with [`XmlError::MissingField`].

use std::io::BufRead;
use std::mem;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::value::{MapDeserializer, StrDeserializer, StringDeserializer};
use serde::de::{self, DeserializeSeed, IntoDeserializer, Visitor};

use crate::config::XmlConfig;
use crate::descriptor::{
    CompositeInfo, DescriptorId, DescriptorKind, DescriptorTree, ListInfo, MapInfo, OutputKind,
    PolyInfo, PolymorphicInfo, XmlDescriptor,
};
use crate::error::{InputKind, Result, XmlError};
use crate::name::QName;
use crate::schema::{PrimitiveKind, XmlSchema, simple_name};
use crate::xml::reader::{StartElement, XmlAttribute, XmlEvent, XmlEventReader, is_whitespace};
use crate::xml::DEFAULT_CODEC;
use crate::xml::utils;

/// Deserialize a value from an XML string with the default configuration.
///
/// # Examples
///
/// ```ignore
/// use helios_xml_serde::xml::from_xml_str;
///
/// let food: Food = from_xml_str(xml)?;
/// ```
pub fn from_xml_str<T>(s: &str) -> Result<T>
where
    T: de::DeserializeOwned + XmlSchema,
{
    DEFAULT_CODEC.from_str(s)
}

/// Deserialize a value from XML bytes.
pub fn from_xml_slice<T>(v: &[u8]) -> Result<T>
where
    T: de::DeserializeOwned + XmlSchema,
{
    DEFAULT_CODEC.from_slice(v)
}

/// Deserialize a value from a buffered XML reader.
pub fn from_xml_reader<R, T>(reader: R) -> Result<T>
where
    R: BufRead,
    T: de::DeserializeOwned + XmlSchema,
{
    DEFAULT_CODEC.from_reader(reader)
}

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Document-level decoding state.
pub(crate) struct Decoder<'c, R: BufRead> {
    reader: XmlEventReader<R>,
    tree: &'c DescriptorTree,
    config: &'c XmlConfig,
}

impl<'c, R: BufRead> Decoder<'c, R> {
    pub(crate) fn new(
        reader: XmlEventReader<R>,
        tree: &'c DescriptorTree,
        config: &'c XmlConfig,
    ) -> Self {
        Decoder {
            reader,
            tree,
            config,
        }
    }

    pub(crate) fn decode_root<T>(&mut self) -> Result<T>
    where
        T: de::DeserializeOwned,
    {
        let start = self.reader.require_start()?;
        let root = self.tree.root();
        let desc = self.tree.get(root);
        if !matches!(desc.kind, DescriptorKind::Polymorphic(_))
            && !names_match(&desc.tag_name, &start.name, self.config.strict_names)
        {
            return Err(XmlError::UnknownContent {
                kind: InputKind::Element,
                name: start.name,
                candidates: vec![desc.tag_name.clone()],
            });
        }
        tracing::trace!(root = %start.name, "decoding document");

        let value = T::deserialize(ValueDeserializer {
            de: &mut *self,
            desc: root,
            source: Source::Element(start),
        })?;

        loop {
            match self.reader.next()? {
                XmlEvent::Eof => break,
                event if event.is_ignorable() => {}
                other => {
                    return Err(XmlError::malformed(format!(
                        "content after the root element: {:?}",
                        other
                    )));
                }
            }
        }
        Ok(value)
    }

    /// Takes the next start tag belonging to an elided collection, leaving anything else
    /// in place.
    fn next_sibling(&mut self, item: &XmlDescriptor) -> Result<Option<StartElement>> {
        let strict = self.config.strict_names;
        let matches = match self.reader.peek_significant()? {
            XmlEvent::Start(start) => item_matches(item, &start.name, strict),
            _ => false,
        };
        if matches {
            self.reader.require_start().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Takes the next child of a wrapper element matching `item`. Returns `None` once the
    /// wrapper's end tag has been consumed.
    fn next_wrapped(
        &mut self,
        parent: &QName,
        item: &XmlDescriptor,
    ) -> Result<Option<StartElement>> {
        loop {
            match self.reader.next()? {
                XmlEvent::Start(start) => {
                    if item_matches(item, &start.name, self.config.strict_names) {
                        return Ok(Some(start));
                    }
                    self.config.policy.handle_unknown_content(
                        &self.config.unknown_content,
                        InputKind::Element,
                        parent,
                        &start.name,
                        vec![item.tag_name.clone()],
                    )?;
                    self.reader.skip_to_end()?;
                }
                XmlEvent::End(_) => return Ok(None),
                XmlEvent::Text(text) if !is_whitespace(&text) => {
                    self.config.policy.handle_unknown_content(
                        &self.config.unknown_content,
                        InputKind::Text,
                        parent,
                        &QName::local(text.trim()),
                        Vec::new(),
                    )?;
                }
                XmlEvent::Eof => {
                    return Err(XmlError::malformed(format!(
                        "unexpected end of document inside `{}`",
                        parent
                    )));
                }
                _ => {}
            }
        }
    }
}

fn names_match(expected: &QName, found: &QName, strict: bool) -> bool {
    expected == found || (!strict && expected.local == found.local)
}

fn item_matches(item: &XmlDescriptor, name: &QName, strict: bool) -> bool {
    match &item.kind {
        DescriptorKind::Polymorphic(info) if info.transparent => {
            find_by_tag(info, name, strict).is_some()
        }
        _ => names_match(&item.tag_name, name, strict),
    }
}

fn mismatch(desc: &XmlDescriptor, expected: &str) -> XmlError {
    XmlError::Custom(format!(
        "`{}` of type `{}` cannot be decoded as {}",
        desc.use_name, desc.type_name, expected
    ))
}

fn missing(desc: &XmlDescriptor) -> XmlError {
    XmlError::MissingField {
        type_name: desc.type_name.clone(),
        field: desc.use_name.clone(),
    }
}

fn find_by_tag<'i>(info: &'i PolymorphicInfo, name: &QName, strict: bool) -> Option<&'i PolyInfo> {
    info.by_tag(name).or_else(|| {
        if strict {
            None
        } else {
            info.subtypes.iter().find(|p| p.tag_name.local == name.local)
        }
    })
}

/// Where the value being decoded comes from.
#[derive(Debug)]
enum Source {
    /// An element whose start tag was consumed; the value reads up to its end tag.
    Element(StartElement),
    /// The element of a tagged polymorphic value. The attribute named here is the
    /// discriminator and is not a field.
    Inline(StartElement, QName),
    Attribute(String),
    Text(String),
    Default(String),
    /// Attributes gathered for an "other attributes" map, keyed `{namespace}local`.
    Collected(Vec<(String, String)>),
    Absent,
}

pub(crate) struct ValueDeserializer<'d, 'c, R: BufRead> {
    de: &'d mut Decoder<'c, R>,
    desc: DescriptorId,
    source: Source,
}

impl<'d, 'c, R: BufRead> ValueDeserializer<'d, 'c, R> {
    fn descriptor(&self) -> &'c XmlDescriptor {
        let tree: &'c DescriptorTree = self.de.tree;
        tree.get(self.desc)
    }

    fn take_text(&mut self) -> Result<Option<String>> {
        match mem::replace(&mut self.source, Source::Absent) {
            Source::Element(start) | Source::Inline(start, _) => {
                self.de.reader.read_element_text(&start.name).map(Some)
            }
            Source::Attribute(text) | Source::Text(text) | Source::Default(text) => Ok(Some(text)),
            Source::Collected(_) => Err(mismatch(self.descriptor(), "text")),
            Source::Absent => Ok(None),
        }
    }

    fn require_text(&mut self) -> Result<String> {
        match self.take_text()? {
            Some(text) => Ok(text),
            None => Err(missing(self.descriptor())),
        }
    }

    /// Consumes whatever the source still holds in the document.
    fn discard(self) -> Result<()> {
        match self.source {
            Source::Element(_) | Source::Inline(_, _) => self.de.reader.skip_to_end(),
            _ => Ok(()),
        }
    }

    fn composite_access(self) -> Result<CompositeAccess<'d, 'c, R>> {
        let desc = self.descriptor();
        let info = desc
            .composite()
            .ok_or_else(|| mismatch(desc, "a structure"))?;
        let (element, attributes, skip_attribute) = match self.source {
            Source::Element(start) => (Some(start.name), start.attributes, None),
            Source::Inline(start, discriminator) => {
                (Some(start.name), start.attributes, Some(discriminator))
            }
            Source::Absent => (None, Vec::new(), None),
            _ => return Err(mismatch(desc, "a structure")),
        };
        Ok(CompositeAccess {
            de: self.de,
            desc: self.desc,
            info,
            element,
            attributes: attributes.into_iter(),
            skip_attribute,
            collected: Vec::new(),
            phase: Phase::Attributes,
            seen: vec![false; info.children.len()],
            text: String::new(),
            saw_element: false,
            last_rank: None,
            next_absent: 0,
            pending: None,
        })
    }

    fn list_info(&self) -> Result<&'c ListInfo> {
        match &self.descriptor().kind {
            DescriptorKind::List(info) => Ok(info),
            _ => Err(mismatch(self.descriptor(), "a sequence")),
        }
    }

    fn map_info(&self) -> Result<&'c MapInfo> {
        match &self.descriptor().kind {
            DescriptorKind::Map(info) => Ok(info),
            _ => Err(mismatch(self.descriptor(), "a map")),
        }
    }

    fn polymorphic_access(self) -> Result<PolyAccess<'d, 'c, R>> {
        let desc = self.descriptor();
        let info = match &desc.kind {
            DescriptorKind::Polymorphic(info) => info,
            _ => return Err(mismatch(desc, "a polymorphic value")),
        };
        let config: &'c XmlConfig = self.de.config;
        let start = match self.source {
            Source::Element(start) => start,
            Source::Absent => return Err(missing(desc)),
            _ => return Err(mismatch(desc, "a polymorphic value")),
        };

        if info.transparent {
            let sub = find_by_tag(info, &start.name, config.strict_names).ok_or_else(|| {
                XmlError::UnknownPolymorphicType {
                    name: start.name.to_string(),
                    candidates: info.type_names(),
                }
            })?;
            return Ok(PolyAccess {
                de: self.de,
                variant: sub.type_name.clone(),
                desc: sub.descriptor,
                source: Source::Element(start),
            });
        }

        let discriminator = start
            .attributes
            .iter()
            .find(|a| {
                a.name == info.discriminator
                    || (!config.strict_attribute_names && a.name.local == info.discriminator.local)
            })
            .map(|a| (a.name.clone(), a.value.clone()));
        let Some((attribute, type_name)) = discriminator else {
            return Err(XmlError::MissingField {
                type_name: desc.type_name.clone(),
                field: info.discriminator.local.clone(),
            });
        };
        let type_name = type_name.trim();
        let sub = info
            .by_type_name(type_name)
            .or_else(|| {
                let simple = simple_name(type_name);
                info.subtypes.iter().find(|p| simple_name(&p.type_name) == simple)
            })
            .ok_or_else(|| XmlError::UnknownPolymorphicType {
                name: type_name.to_string(),
                candidates: info.type_names(),
            })?;
        Ok(PolyAccess {
            de: self.de,
            variant: sub.type_name.clone(),
            desc: sub.descriptor,
            source: Source::Inline(start, attribute),
        })
    }
}

macro_rules! deserialize_integer {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V>(mut self, visitor: V) -> Result<V::Value>
        where
            V: Visitor<'de>,
        {
            let text = self.require_text()?;
            let value = text
                .trim()
                .parse::<$ty>()
                .map_err(|_| XmlError::InvalidValue {
                    expected: stringify!($ty),
                    value: text.clone(),
                })?;
            visitor.$visit(value)
        }
    };
}

impl<'de, 'd, 'c, R: BufRead> de::Deserializer<'de> for ValueDeserializer<'d, 'c, R> {
    type Error = XmlError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let desc = self.descriptor();
        if desc.nullable && matches!(self.source, Source::Absent) {
            return visitor.visit_none();
        }
        match &desc.kind {
            DescriptorKind::Primitive(PrimitiveKind::Bool) => self.deserialize_bool(visitor),
            DescriptorKind::Primitive(PrimitiveKind::Int) => self.deserialize_i64(visitor),
            DescriptorKind::Primitive(PrimitiveKind::UInt) => self.deserialize_u64(visitor),
            DescriptorKind::Primitive(PrimitiveKind::Float) => self.deserialize_f64(visitor),
            DescriptorKind::Primitive(PrimitiveKind::Bytes) => self.deserialize_byte_buf(visitor),
            DescriptorKind::Primitive(_) | DescriptorKind::Enum(_) => {
                self.deserialize_string(visitor)
            }
            DescriptorKind::Object => self.deserialize_unit(visitor),
            DescriptorKind::Composite(_) => visitor.visit_map(self.composite_access()?),
            DescriptorKind::List(_) => self.deserialize_seq(visitor),
            DescriptorKind::Map(_) => self.deserialize_map(visitor),
            DescriptorKind::Polymorphic(_) => visitor.visit_enum(self.polymorphic_access()?),
        }
    }

    fn deserialize_bool<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let text = self.require_text()?;
        visitor.visit_bool(utils::parse_bool(&text, self.de.config.strict_boolean)?)
    }

    deserialize_integer!(deserialize_i8, visit_i8, i8);
    deserialize_integer!(deserialize_i16, visit_i16, i16);
    deserialize_integer!(deserialize_i32, visit_i32, i32);
    deserialize_integer!(deserialize_i64, visit_i64, i64);
    deserialize_integer!(deserialize_i128, visit_i128, i128);
    deserialize_integer!(deserialize_u8, visit_u8, u8);
    deserialize_integer!(deserialize_u16, visit_u16, u16);
    deserialize_integer!(deserialize_u32, visit_u32, u32);
    deserialize_integer!(deserialize_u64, visit_u64, u64);
    deserialize_integer!(deserialize_u128, visit_u128, u128);

    fn deserialize_f32<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let text = self.require_text()?;
        visitor.visit_f32(utils::parse_float(&text)? as f32)
    }

    fn deserialize_f64<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let text = self.require_text()?;
        visitor.visit_f64(utils::parse_float(&text)?)
    }

    fn deserialize_char<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let text = self.require_text()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(XmlError::InvalidValue {
                expected: "char",
                value: text,
            }),
        }
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let text = self.require_text()?;
        visitor.visit_string(text)
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let text = self.require_text()?;
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|_| XmlError::InvalidValue {
                expected: "base64",
                value: text.clone(),
            })?;
        visitor.visit_byte_buf(bytes)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.source {
            Source::Absent => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.discard()?;
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let info = self.list_info()?;
        let tree: &'c DescriptorTree = self.de.tree;
        let item = tree.get(info.item);
        match self.source {
            Source::Attribute(text) | Source::Text(text) | Source::Default(text) => {
                let tokens: Vec<String> = utils::split_tokens(&text).map(str::to_string).collect();
                visitor.visit_seq(TokenAccess {
                    de: self.de,
                    item: info.item,
                    tokens: tokens.into_iter(),
                })
            }
            Source::Absent => visitor.visit_seq(TokenAccess {
                de: self.de,
                item: info.item,
                tokens: Vec::new().into_iter(),
            }),
            Source::Element(start) if info.elided => visitor.visit_seq(ItemAccess {
                de: self.de,
                item,
                item_id: info.item,
                first: Some(start),
                wrapper: None,
                done: false,
            }),
            Source::Element(start) | Source::Inline(start, _) => visitor.visit_seq(ItemAccess {
                de: self.de,
                item,
                item_id: info.item,
                first: None,
                wrapper: Some(start.name),
                done: false,
            }),
            Source::Collected(_) => Err(XmlError::Custom(
                "collected attributes cannot be decoded as a sequence".to_string(),
            )),
        }
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let desc = self.descriptor();
        if desc.composite().is_some() {
            return visitor.visit_map(self.composite_access()?);
        }
        let info = self.map_info()?;
        match self.source {
            Source::Collected(pairs) => visitor.visit_map(MapDeserializer::new(pairs.into_iter())),
            Source::Absent => visitor.visit_map(MapDeserializer::new(
                Vec::<(String, String)>::new().into_iter(),
            )),
            Source::Element(start) if info.elided => visitor.visit_map(EntryAccess {
                de: self.de,
                info,
                first: Some(start),
                wrapper: None,
                pending: None,
                done: false,
            }),
            Source::Element(start) | Source::Inline(start, _) => visitor.visit_map(EntryAccess {
                de: self.de,
                info,
                first: None,
                wrapper: Some(start.name),
                pending: None,
                done: false,
            }),
            Source::Attribute(_) | Source::Text(_) | Source::Default(_) => Err(XmlError::Custom(
                format!("`{}` has text where a map was expected", desc.use_name),
            )),
        }
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.descriptor().kind {
            DescriptorKind::Object => self.deserialize_unit(visitor),
            _ => visitor.visit_map(self.composite_access()?),
        }
    }

    fn deserialize_enum<V>(
        mut self,
        _name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let desc = self.descriptor();
        match &desc.kind {
            DescriptorKind::Polymorphic(_) => visitor.visit_enum(self.polymorphic_access()?),
            DescriptorKind::Enum(encoded) => {
                let text = self.require_text()?;
                let text = text.trim();
                let relaxed = !self.de.config.strict_names;
                let variant = encoded
                    .iter()
                    .find(|(_, value)| value == text)
                    .or_else(|| {
                        encoded
                            .iter()
                            .find(|(name, _)| relaxed && name.eq_ignore_ascii_case(text))
                    })
                    .map(|(name, _)| name.clone())
                    .ok_or_else(|| XmlError::InvalidValue {
                        expected: "enumeration",
                        value: text.to_string(),
                    })?;
                let access: StringDeserializer<XmlError> = variant.into_deserializer();
                visitor.visit_enum(access)
            }
            _ => {
                let text = self.require_text()?;
                let text = text.trim().to_string();
                if !variants.contains(&text.as_str()) {
                    return Err(XmlError::InvalidValue {
                        expected: "enumeration",
                        value: text,
                    });
                }
                let access: StringDeserializer<XmlError> = text.into_deserializer();
                visitor.visit_enum(access)
            }
        }
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.discard()?;
        visitor.visit_unit()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Attributes,
    Children,
    Absent,
    Done,
}

/// Field-by-field access to a composite value.
struct CompositeAccess<'d, 'c, R: BufRead> {
    de: &'d mut Decoder<'c, R>,
    desc: DescriptorId,
    info: &'c CompositeInfo,
    /// Element whose end tag terminates the children; `None` when there is no element.
    element: Option<QName>,
    attributes: std::vec::IntoIter<XmlAttribute>,
    skip_attribute: Option<QName>,
    collected: Vec<(String, String)>,
    phase: Phase,
    seen: Vec<bool>,
    text: String,
    saw_element: bool,
    last_rank: Option<usize>,
    next_absent: usize,
    pending: Option<(usize, Source)>,
}

impl<'d, 'c, R: BufRead> CompositeAccess<'d, 'c, R> {
    fn parent(&self) -> &'c XmlDescriptor {
        let tree: &'c DescriptorTree = self.de.tree;
        tree.get(self.desc)
    }

    fn child(&self, idx: usize) -> &'c XmlDescriptor {
        let tree: &'c DescriptorTree = self.de.tree;
        tree.get(self.info.children[idx].descriptor)
    }

    fn parent_name(&self) -> QName {
        self.element
            .clone()
            .unwrap_or_else(|| self.parent().tag_name.clone())
    }

    fn attribute_index(&self, name: &QName) -> Option<usize> {
        if let Some(&idx) = self.info.attribute_names.get(name) {
            return Some(idx);
        }
        if self.de.config.strict_attribute_names {
            return None;
        }
        self.info
            .attribute_names
            .iter()
            .filter(|(candidate, _)| candidate.local == name.local)
            .map(|(_, &idx)| idx)
            .min()
    }

    fn element_index(&self, name: &QName) -> Option<usize> {
        if let Some(&idx) = self.info.element_names.get(name) {
            return Some(idx);
        }
        if let Some(&(idx, _)) = self.info.poly_names.get(name) {
            return Some(idx);
        }
        if self.de.config.strict_names {
            return None;
        }
        self.info
            .element_names
            .iter()
            .map(|(candidate, &idx)| (candidate, idx))
            .chain(
                self.info
                    .poly_names
                    .iter()
                    .map(|(candidate, &(idx, _))| (candidate, idx)),
            )
            .filter(|(candidate, _)| candidate.local == name.local)
            .map(|(_, idx)| idx)
            .min()
    }

    fn candidates(&self, kind: InputKind) -> Vec<QName> {
        let mut names: Vec<((usize, usize), QName)> = match kind {
            InputKind::Attribute => self
                .info
                .attribute_names
                .iter()
                .map(|(name, &idx)| ((idx, 0), name.clone()))
                .collect(),
            _ => self
                .info
                .element_names
                .iter()
                .map(|(name, &idx)| ((idx, 0), name.clone()))
                .chain(
                    self.info
                        .poly_names
                        .iter()
                        .map(|(name, &(idx, sub))| ((idx, sub), name.clone())),
                )
                .collect(),
        };
        names.sort_by_key(|(idx, _)| *idx);
        names.into_iter().map(|(_, name)| name).collect()
    }

    fn unknown(&self, kind: InputKind, name: &QName) -> Result<()> {
        self.de.config.policy.handle_unknown_content(
            &self.de.config.unknown_content,
            kind,
            &self.parent_name(),
            name,
            self.candidates(kind),
        )
    }

    /// Next field to hand out, with its source. `None` once every field was visited.
    fn advance(&mut self) -> Result<Option<(usize, Source)>> {
        loop {
            match self.phase {
                Phase::Attributes => {
                    let Some(attr) = self.attributes.next() else {
                        self.phase = if self.element.is_some() {
                            Phase::Children
                        } else {
                            Phase::Absent
                        };
                        continue;
                    };
                    if self.skip_attribute.as_ref() == Some(&attr.name)
                        || attr.name.namespace == XSI_NAMESPACE
                    {
                        continue;
                    }
                    match self.attribute_index(&attr.name) {
                        Some(idx) => {
                            self.seen[idx] = true;
                            return Ok(Some((idx, Source::Attribute(attr.value))));
                        }
                        None if self.info.other_attributes.is_some() => {
                            let key = if attr.name.namespace.is_empty() {
                                attr.name.local.clone()
                            } else {
                                attr.name.to_string()
                            };
                            self.collected.push((key, attr.value));
                        }
                        None => self.unknown(InputKind::Attribute, &attr.name)?,
                    }
                }
                Phase::Children => match self.de.reader.next()? {
                    XmlEvent::Text(text) => {
                        if self.info.value_child.is_some() {
                            self.text.push_str(&text);
                        } else if !is_whitespace(&text) {
                            self.unknown(InputKind::Text, &QName::local(text.trim()))?;
                        }
                    }
                    XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction(_) => {}
                    XmlEvent::End(_) => {
                        self.phase = Phase::Absent;
                        if let Some(idx) = self.info.value_child {
                            let only_layout = self.saw_element && is_whitespace(&self.text);
                            if !self.seen[idx] && !self.text.is_empty() && !only_layout {
                                self.seen[idx] = true;
                                let text = mem::take(&mut self.text);
                                return Ok(Some((idx, Source::Text(text))));
                            }
                        }
                    }
                    XmlEvent::Start(start) => {
                        self.saw_element = true;
                        let Some(idx) = self.element_index(&start.name) else {
                            self.unknown(InputKind::Element, &start.name)?;
                            self.de.reader.skip_to_end()?;
                            continue;
                        };
                        if self.seen[idx] {
                            self.de
                                .config
                                .policy
                                .on_element_repeated(&self.parent_name(), &start.name)?;
                            self.de.reader.skip_to_end()?;
                            continue;
                        }
                        if self.de.config.verify_element_order {
                            let rank = self.info.ranks[idx];
                            if self.last_rank.is_some_and(|last| rank < last) {
                                return Err(XmlError::malformed(format!(
                                    "element `{}` appears out of order in `{}`",
                                    start.name,
                                    self.parent_name()
                                )));
                            }
                            self.last_rank = Some(rank);
                        }
                        self.seen[idx] = true;
                        return Ok(Some((idx, Source::Element(start))));
                    }
                    XmlEvent::Eof => {
                        return Err(XmlError::malformed(format!(
                            "unexpected end of document inside `{}`",
                            self.parent_name()
                        )));
                    }
                },
                Phase::Absent => {
                    while self.next_absent < self.info.children.len() {
                        let idx = self.next_absent;
                        self.next_absent += 1;
                        if self.seen[idx] {
                            continue;
                        }
                        let child = self.child(idx);
                        if self.info.other_attributes == Some(idx) {
                            let collected = mem::take(&mut self.collected);
                            return Ok(Some((idx, Source::Collected(collected))));
                        }
                        if let Some(default) = &child.default {
                            return Ok(Some((idx, Source::Default(default.clone()))));
                        }
                        if child.nullable || child.optional {
                            continue;
                        }
                        if self.info.value_child == Some(idx) && child.is_primitive_like() {
                            return Ok(Some((idx, Source::Text(String::new()))));
                        }
                        if child.is_collection() {
                            return Ok(Some((idx, Source::Absent)));
                        }
                        return Err(XmlError::MissingField {
                            type_name: self.parent().type_name.clone(),
                            field: self.info.children[idx].name.clone(),
                        });
                    }
                    self.phase = Phase::Done;
                }
                Phase::Done => return Ok(None),
            }
        }
    }
}

impl<'de, 'd, 'c, R: BufRead> de::MapAccess<'de> for CompositeAccess<'d, 'c, R> {
    type Error = XmlError;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        match self.advance()? {
            Some((idx, source)) => {
                self.pending = Some((idx, source));
                let name: &'c str = &self.info.children[idx].name;
                let key: StrDeserializer<'_, XmlError> = name.into_deserializer();
                seed.deserialize(key).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let (idx, source) = self
            .pending
            .take()
            .ok_or_else(|| XmlError::Custom("value requested before its key".to_string()))?;
        seed.deserialize(ValueDeserializer {
            de: &mut *self.de,
            desc: self.info.children[idx].descriptor,
            source,
        })
    }
}

/// Items of a list written as a token string.
struct TokenAccess<'d, 'c, R: BufRead> {
    de: &'d mut Decoder<'c, R>,
    item: DescriptorId,
    tokens: std::vec::IntoIter<String>,
}

impl<'de, 'd, 'c, R: BufRead> de::SeqAccess<'de> for TokenAccess<'d, 'c, R> {
    type Error = XmlError;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        match self.tokens.next() {
            Some(token) => seed
                .deserialize(ValueDeserializer {
                    de: &mut *self.de,
                    desc: self.item,
                    source: Source::Text(token),
                })
                .map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.tokens.len())
    }
}

/// Items of a list written as elements, either as siblings or inside a wrapper.
struct ItemAccess<'d, 'c, R: BufRead> {
    de: &'d mut Decoder<'c, R>,
    item: &'c XmlDescriptor,
    item_id: DescriptorId,
    first: Option<StartElement>,
    wrapper: Option<QName>,
    done: bool,
}

impl<'de, 'd, 'c, R: BufRead> de::SeqAccess<'de> for ItemAccess<'d, 'c, R> {
    type Error = XmlError;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        if self.done {
            return Ok(None);
        }
        let next = match (self.first.take(), &self.wrapper) {
            (Some(first), _) => Some(first),
            (None, Some(wrapper)) => self.de.next_wrapped(wrapper, self.item)?,
            (None, None) => self.de.next_sibling(self.item)?,
        };
        let Some(start) = next else {
            self.done = true;
            return Ok(None);
        };
        seed.deserialize(ValueDeserializer {
            de: &mut *self.de,
            desc: self.item_id,
            source: Source::Element(start),
        })
        .map(Some)
    }
}

/// Entries of a map written as elements.
struct EntryAccess<'d, 'c, R: BufRead> {
    de: &'d mut Decoder<'c, R>,
    info: &'c MapInfo,
    first: Option<StartElement>,
    wrapper: Option<QName>,
    pending: Option<StartElement>,
    done: bool,
}

impl<'d, 'c, R: BufRead> EntryAccess<'d, 'c, R> {
    fn entry_matches(&self, name: &QName) -> bool {
        names_match(&self.info.entry_name, name, self.de.config.strict_names)
    }

    fn next_entry(&mut self) -> Result<Option<StartElement>> {
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }
        let Some(wrapper) = self.wrapper.clone() else {
            let entry_name = &self.info.entry_name;
            let strict = self.de.config.strict_names;
            let matches = match self.de.reader.peek_significant()? {
                XmlEvent::Start(start) => names_match(entry_name, &start.name, strict),
                _ => false,
            };
            return if matches {
                self.de.reader.require_start().map(Some)
            } else {
                Ok(None)
            };
        };
        loop {
            match self.de.reader.next()? {
                XmlEvent::Start(start) if self.entry_matches(&start.name) => {
                    return Ok(Some(start));
                }
                XmlEvent::Start(start) => {
                    self.de.config.policy.handle_unknown_content(
                        &self.de.config.unknown_content,
                        InputKind::Element,
                        &wrapper,
                        &start.name,
                        vec![self.info.entry_name.clone()],
                    )?;
                    self.de.reader.skip_to_end()?;
                }
                XmlEvent::End(_) => return Ok(None),
                XmlEvent::Eof => {
                    return Err(XmlError::malformed(format!(
                        "unexpected end of document inside `{}`",
                        wrapper
                    )));
                }
                _ => {}
            }
        }
    }

    fn attribute_of<'e>(&self, entry: &'e StartElement, name: &QName) -> Option<&'e str> {
        entry.attribute(name).or_else(|| {
            if self.de.config.strict_attribute_names {
                return None;
            }
            entry
                .attributes
                .iter()
                .find(|a| a.name.local == name.local)
                .map(|a| a.value.as_str())
        })
    }
}

impl<'de, 'd, 'c, R: BufRead> de::MapAccess<'de> for EntryAccess<'d, 'c, R> {
    type Error = XmlError;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        if self.done {
            return Ok(None);
        }
        let Some(entry) = self.next_entry()? else {
            self.done = true;
            return Ok(None);
        };
        let key = self
            .attribute_of(&entry, &self.info.key_name)
            .map(str::to_string)
            .ok_or_else(|| XmlError::MissingField {
                type_name: entry.name.to_string(),
                field: self.info.key_name.local.clone(),
            })?;
        self.pending = Some(entry);
        seed.deserialize(ValueDeserializer {
            de: &mut *self.de,
            desc: self.info.key,
            source: Source::Attribute(key),
        })
        .map(Some)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let entry = self
            .pending
            .take()
            .ok_or_else(|| XmlError::Custom("map value requested before its key".to_string()))?;
        let tree: &'c DescriptorTree = self.de.tree;
        let value_desc = tree.get(self.info.value);
        match value_desc.output_kind {
            OutputKind::Attribute => {
                let source = match self.attribute_of(&entry, &value_desc.tag_name) {
                    Some(text) => Source::Attribute(text.to_string()),
                    None => Source::Absent,
                };
                let value = seed.deserialize(ValueDeserializer {
                    de: &mut *self.de,
                    desc: self.info.value,
                    source,
                })?;
                self.de.reader.skip_to_end()?;
                Ok(value)
            }
            OutputKind::Text => seed.deserialize(ValueDeserializer {
                de: &mut *self.de,
                desc: self.info.value,
                source: Source::Element(entry),
            }),
            _ => {
                let has_child = matches!(self.de.reader.peek_significant()?, XmlEvent::Start(_));
                let source = if has_child {
                    Source::Element(self.de.reader.require_start()?)
                } else {
                    Source::Absent
                };
                let value = seed.deserialize(ValueDeserializer {
                    de: &mut *self.de,
                    desc: self.info.value,
                    source,
                })?;
                self.de.reader.require_end(&entry.name)?;
                Ok(value)
            }
        }
    }
}

/// Variant selection for polymorphic values.
struct PolyAccess<'d, 'c, R: BufRead> {
    de: &'d mut Decoder<'c, R>,
    variant: String,
    desc: DescriptorId,
    source: Source,
}

impl<'de, 'd, 'c, R: BufRead> de::EnumAccess<'de> for PolyAccess<'d, 'c, R> {
    type Error = XmlError;
    type Variant = ValueDeserializer<'d, 'c, R>;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, Self::Variant)>
    where
        V: DeserializeSeed<'de>,
    {
        let name: StringDeserializer<XmlError> = self.variant.into_deserializer();
        let value = seed.deserialize(name)?;
        Ok((
            value,
            ValueDeserializer {
                de: self.de,
                desc: self.desc,
                source: self.source,
            },
        ))
    }
}

impl<'de, 'd, 'c, R: BufRead> de::VariantAccess<'de> for ValueDeserializer<'d, 'c, R> {
    type Error = XmlError;

    fn unit_variant(self) -> Result<()> {
        self.discard()
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value>
    where
        T: DeserializeSeed<'de>,
    {
        seed.deserialize(self)
    }

    fn tuple_variant<V>(self, _len: usize, _visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        Err(XmlError::Custom(
            "tuple variants have no XML form".to_string(),
        ))
    }

    fn struct_variant<V>(self, fields: &'static [&'static str], visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_struct(self, "", fields, visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::build_tree;
    use crate::schema::{ElementInfo, TypeDescriptor, TypeRef, XmlAnnotation};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        left: String,
        right: i32,
    }

    fn pair_desc() -> TypeDescriptor {
        TypeDescriptor::class("Pair")
            .field("left", TypeRef::of::<String>())
            .element(
                ElementInfo::new("right", TypeRef::of::<i32>())
                    .annotate(XmlAnnotation::Element(true)),
            )
    }

    fn decode<T: de::DeserializeOwned>(xml: &str, desc: &TypeDescriptor, config: &XmlConfig) -> Result<T> {
        let tree = build_tree(desc, config, None)?;
        let mut decoder = Decoder::new(XmlEventReader::from_str(xml), &tree, config);
        decoder.decode_root()
    }

    #[test]
    fn test_attribute_and_element_fields() -> Result<()> {
        let pair: Pair = decode(
            "<Pair left=\"a &amp; b\">\n  <right>7</right>\n</Pair>",
            &pair_desc(),
            &XmlConfig::default(),
        )?;
        assert_eq!(
            pair,
            Pair {
                left: "a & b".to_string(),
                right: 7
            }
        );
        Ok(())
    }

    #[test]
    fn test_missing_required_field() {
        let result: Result<Pair> = decode("<Pair left=\"a\"/>", &pair_desc(), &XmlConfig::default());
        match result {
            Err(XmlError::MissingField { type_name, field }) => {
                assert_eq!(type_name, "Pair");
                assert_eq!(field, "right");
            }
            other => panic!("expected a missing field, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_element_policy() -> Result<()> {
        let xml = "<Pair left=\"a\"><extra/><right>1</right></Pair>";
        let strict: Result<Pair> = decode(xml, &pair_desc(), &XmlConfig::default());
        assert!(matches!(strict, Err(XmlError::UnknownContent { .. })));

        let lenient = XmlConfig::builder().ignore_unknown_content(true).build();
        let pair: Pair = decode(xml, &pair_desc(), &lenient)?;
        assert_eq!(pair.right, 1);
        Ok(())
    }

    #[test]
    fn test_content_after_root_is_rejected() {
        let result: Result<Pair> = decode(
            "<Pair left=\"a\"><right>1</right></Pair><Pair/>",
            &pair_desc(),
            &XmlConfig::default(),
        );
        assert!(matches!(result, Err(XmlError::MalformedStructure(_))));
    }
}
