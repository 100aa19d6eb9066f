//! XML encoding through a custom `serde::Serializer`.
//!
//! The serializer is driven by a resolved [`DescriptorTree`]: every value knows its tag,
//! namespace and output kind before it is written. Attributes of an element go straight to
//! the output while its element and text content is recorded into [`FragmentBuffer`]s and
//! flushed in canonical order when the element closes.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::ser::{self, Impossible, Serialize};

use crate::config::XmlConfig;
use crate::descriptor::{DescriptorId, DescriptorKind, DescriptorTree, OutputKind, XmlDescriptor};
use crate::error::{Result, XmlError};
use crate::name::{Namespace, QName};
use crate::namespace::NamespaceStack;
use crate::schema::XmlSchema;
use crate::xml::utils;
use crate::xml::writer::{FragmentBuffer, XmlWriter};
use crate::xml::DEFAULT_CODEC;

/// Serialize a value to an XML string with the default configuration.
///
/// # Examples
///
/// ```ignore
/// use helios_xml_serde::xml::to_xml_string;
///
/// let xml = to_xml_string(&food)?;
/// ```
pub fn to_xml_string<T>(value: &T) -> Result<String>
where
    T: Serialize + XmlSchema + ?Sized,
{
    DEFAULT_CODEC.to_string(value)
}

/// Serialize a value to an XML byte vector.
pub fn to_xml_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + XmlSchema + ?Sized,
{
    DEFAULT_CODEC.to_vec(value)
}

/// Serialize a value to an XML writer.
pub fn to_xml_writer<T, W>(value: &T, writer: W) -> Result<()>
where
    T: Serialize + XmlSchema + ?Sized,
    W: std::io::Write,
{
    DEFAULT_CODEC.to_writer(value, writer)
}

#[derive(Debug)]
struct OpenElement {
    name: QName,
    attributes: HashSet<QName>,
}

/// Mutable state shared by every serializer of one document.
pub(crate) struct EncodeState<'c> {
    tree: &'c DescriptorTree,
    config: &'c XmlConfig,
    namespaces: NamespaceStack,
    open: Vec<OpenElement>,
    /// Declarations hoisted onto the root element.
    root_decls: Vec<Namespace>,
}

impl<'c> EncodeState<'c> {
    pub(crate) fn new(
        tree: &'c DescriptorTree,
        config: &'c XmlConfig,
        root_decls: Vec<Namespace>,
    ) -> Self {
        EncodeState {
            tree,
            config,
            namespaces: NamespaceStack::new(),
            open: Vec::new(),
            root_decls,
        }
    }

    fn open_element(
        &mut self,
        target: &mut dyn XmlWriter,
        tag: &QName,
        extra_decls: &[Namespace],
    ) -> Result<QName> {
        let at_root = self.open.is_empty();
        self.namespaces.push_scope();
        let (name, decls) = self
            .namespaces
            .resolve_element(tag, self.config.repair_namespaces)?;
        target.start_tag(&name)?;
        for ns in &decls {
            target.namespace_decl(&ns.prefix, &ns.uri)?;
        }

        let hoisted = if at_root {
            std::mem::take(&mut self.root_decls)
        } else {
            Vec::new()
        };
        for ns in extra_decls.iter().chain(hoisted.iter()) {
            if ns.prefix.is_empty() || self.namespaces.uri_for(&ns.prefix).is_some() {
                continue;
            }
            self.namespaces.declare(ns.prefix.clone(), ns.uri.clone());
            target.namespace_decl(&ns.prefix, &ns.uri)?;
        }

        self.open.push(OpenElement {
            name: name.clone(),
            attributes: HashSet::new(),
        });
        Ok(name)
    }

    fn close_element(&mut self, target: &mut dyn XmlWriter, name: &QName) -> Result<()> {
        target.end_tag(name)?;
        self.open.pop();
        self.namespaces.pop_scope();
        Ok(())
    }

    fn write_attribute(
        &mut self,
        target: &mut dyn XmlWriter,
        name: &QName,
        value: &str,
    ) -> Result<()> {
        let open = self.open.last_mut().ok_or_else(|| {
            XmlError::malformed(format!(
                "attribute `{}` has no element to live on",
                name
            ))
        })?;
        if !open.attributes.insert(name.clone()) {
            return Err(XmlError::DuplicateAttribute {
                element: open.name.clone(),
                name: name.clone(),
            });
        }
        let (actual, decl) = self
            .namespaces
            .resolve_attribute(name, self.config.repair_namespaces)?;
        if let Some(ns) = decl {
            target.namespace_decl(&ns.prefix, &ns.uri)?;
        }
        target.attribute(&actual, value)
    }
}

/// Writes element content; empty text writes nothing.
fn write_content(target: &mut dyn XmlWriter, text: &str, cdata: bool) -> Result<()> {
    match (text.is_empty(), cdata) {
        (true, _) => Ok(()),
        (false, true) => target.cdata(text),
        (false, false) => target.text(text),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// The value opens its own element when its output kind asks for one.
    Normal,
    /// The element is already open (tagged polymorphism); only content is written.
    Inline,
}

/// Serializer for one value described by `desc`.
pub(crate) struct ValueSerializer<'a, 'c> {
    state: &'a mut EncodeState<'c>,
    target: &'a mut dyn XmlWriter,
    desc: DescriptorId,
    mode: Mode,
}

impl<'a, 'c> ValueSerializer<'a, 'c> {
    pub(crate) fn root(state: &'a mut EncodeState<'c>, target: &'a mut dyn XmlWriter) -> Self {
        let desc = state.tree.root();
        ValueSerializer {
            state,
            target,
            desc,
            mode: Mode::Normal,
        }
    }

    fn descriptor(&self) -> &'c XmlDescriptor {
        let tree: &'c DescriptorTree = self.state.tree;
        tree.get(self.desc)
    }

    fn mismatch(&self, found: &str) -> XmlError {
        let desc = self.descriptor();
        XmlError::Custom(format!(
            "cannot encode {} for `{}` described as {:?}",
            found, desc.use_name, desc.type_name
        ))
    }

    fn write_text_value(self, text: &str) -> Result<()> {
        let desc = self.descriptor();
        if self.mode == Mode::Inline {
            return write_content(self.target, text, desc.cdata);
        }
        match desc.output_kind {
            OutputKind::Attribute => self.state.write_attribute(self.target, &desc.tag_name, text),
            OutputKind::Text => write_content(self.target, text, desc.cdata),
            OutputKind::Element => {
                let name = self
                    .state
                    .open_element(self.target, &desc.tag_name, &desc.namespace_decls)?;
                write_content(self.target, text, desc.cdata)?;
                self.state.close_element(self.target, &name)
            }
            OutputKind::Unknown => Err(XmlError::defect(
                desc.type_name.clone(),
                "value has no resolved output kind",
            )),
        }
    }

    fn write_empty(self) -> Result<()> {
        let desc = self.descriptor();
        match (self.mode, desc.output_kind) {
            (Mode::Normal, OutputKind::Element) => {
                let name = self
                    .state
                    .open_element(self.target, &desc.tag_name, &desc.namespace_decls)?;
                self.state.close_element(self.target, &name)
            }
            (Mode::Normal, OutputKind::Attribute) => {
                self.state.write_attribute(self.target, &desc.tag_name, "")
            }
            _ => Ok(()),
        }
    }

    fn open_if_normal(&mut self) -> Result<Option<QName>> {
        let desc = self.descriptor();
        match self.mode {
            Mode::Inline => Ok(None),
            Mode::Normal => self
                .state
                .open_element(self.target, &desc.tag_name, &desc.namespace_decls)
                .map(Some),
        }
    }

    /// Opens the element of a tagged polymorphic value and writes its discriminator.
    fn open_tagged(&mut self, type_name: &str) -> Result<QName> {
        let desc = self.descriptor();
        let discriminator = match &desc.kind {
            DescriptorKind::Polymorphic(info) => info.discriminator.clone(),
            _ => return Err(self.mismatch("a tagged subtype")),
        };
        let name = self
            .state
            .open_element(self.target, &desc.tag_name, &desc.namespace_decls)?;
        self.state
            .write_attribute(self.target, &discriminator, type_name)?;
        Ok(name)
    }

    /// Finds the subtype registered for a serde variant.
    fn subtype(&self, variant: &str) -> Result<(bool, DescriptorId)> {
        match &self.descriptor().kind {
            DescriptorKind::Polymorphic(info) => match info.by_type_name(variant) {
                Some(sub) => Ok((info.transparent, sub.descriptor)),
                None => Err(XmlError::UnknownPolymorphicType {
                    name: variant.to_string(),
                    candidates: info.type_names(),
                }),
            },
            _ => Err(self.mismatch("an enum variant with data")),
        }
    }
}

impl<'a, 'c> ser::Serializer for ValueSerializer<'a, 'c> {
    type Ok = ();
    type Error = XmlError;
    type SerializeSeq = SeqEncoder<'a, 'c>;
    type SerializeTuple = SeqEncoder<'a, 'c>;
    type SerializeTupleStruct = SeqEncoder<'a, 'c>;
    type SerializeTupleVariant = Impossible<(), XmlError>;
    type SerializeMap = MapEncoder<'a, 'c>;
    type SerializeStruct = StructEncoder<'a, 'c>;
    type SerializeStructVariant = StructEncoder<'a, 'c>;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.write_text_value(utils::bool_to_string(v))
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_i128(self, v: i128) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_u128(self, v: u128) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_f32(self, v: f32) -> Result<()> {
        self.write_text_value(&utils::format_float(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        self.write_text_value(&utils::format_float(v))
    }

    fn serialize_char(self, v: char) -> Result<()> {
        self.write_text_value(&v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        self.write_text_value(v)
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        self.write_text_value(&BASE64.encode(v))
    }

    // A missing value is written as nothing at all.
    fn serialize_none(self) -> Result<()> {
        Ok(())
    }

    fn serialize_some<T>(self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        self.write_empty()
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        self.write_empty()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        match &self.descriptor().kind {
            DescriptorKind::Enum(variants) => {
                let text = variants
                    .iter()
                    .find(|(name, _)| name == variant)
                    .map(|(_, encoded)| encoded.as_str())
                    .unwrap_or(variant);
                self.write_text_value(text)
            }
            DescriptorKind::Polymorphic(_) => {
                let (transparent, sub) = self.subtype(variant)?;
                let mut this = self;
                if transparent {
                    ValueSerializer {
                        state: this.state,
                        target: this.target,
                        desc: sub,
                        mode: Mode::Normal,
                    }
                    .write_empty()
                } else {
                    let name = this.open_tagged(variant)?;
                    this.state.close_element(this.target, &name)
                }
            }
            _ => self.write_text_value(variant),
        }
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        let (transparent, sub) = self.subtype(variant)?;
        let mut this = self;
        if transparent {
            return value.serialize(ValueSerializer {
                state: this.state,
                target: this.target,
                desc: sub,
                mode: Mode::Normal,
            });
        }
        let name = this.open_tagged(variant)?;
        value.serialize(ValueSerializer {
            state: &mut *this.state,
            target: &mut *this.target,
            desc: sub,
            mode: Mode::Inline,
        })?;
        this.state.close_element(this.target, &name)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<SeqEncoder<'a, 'c>> {
        let desc = self.descriptor();
        let info = match &desc.kind {
            DescriptorKind::List(info) => info,
            _ => return Err(self.mismatch("a sequence")),
        };
        let item = info.item;
        let mut this = self;
        match (this.mode, desc.output_kind) {
            (Mode::Normal, OutputKind::Attribute) | (Mode::Normal, OutputKind::Text) => {
                Ok(SeqEncoder::Tokens {
                    state: this.state,
                    target: this.target,
                    list: this.desc,
                    item,
                    tokens: Vec::new(),
                })
            }
            _ => {
                let outer = if info.elided && this.mode == Mode::Normal {
                    None
                } else {
                    this.open_if_normal()?
                };
                Ok(SeqEncoder::Items {
                    state: this.state,
                    target: this.target,
                    item,
                    outer,
                })
            }
        }
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqEncoder<'a, 'c>> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqEncoder<'a, 'c>> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(XmlError::Custom(format!(
            "tuple variant `{}` has no XML form",
            variant
        )))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapEncoder<'a, 'c>> {
        let desc = self.descriptor();
        match &desc.kind {
            DescriptorKind::Map(_) if desc.output_kind == OutputKind::Attribute => {
                Ok(MapEncoder::Attributes {
                    state: self.state,
                    target: self.target,
                    key: None,
                })
            }
            DescriptorKind::Map(info) => {
                let elided = info.elided;
                let mut this = self;
                let outer = if elided && this.mode == Mode::Normal {
                    None
                } else {
                    this.open_if_normal()?
                };
                Ok(MapEncoder::Entries {
                    state: this.state,
                    target: this.target,
                    map: this.desc,
                    outer,
                    key: None,
                })
            }
            DescriptorKind::Composite(_) => {
                let mut this = self;
                let element = this.open_if_normal()?;
                Ok(MapEncoder::Fields(
                    StructEncoder::new(this.state, this.target, this.desc, element),
                    None,
                ))
            }
            _ => Err(self.mismatch("a map")),
        }
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<StructEncoder<'a, 'c>> {
        if self.descriptor().composite().is_none() {
            return Err(self.mismatch("a struct"));
        }
        let mut this = self;
        let element = this.open_if_normal()?;
        Ok(StructEncoder::new(this.state, this.target, this.desc, element))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<StructEncoder<'a, 'c>> {
        let (transparent, sub) = self.subtype(variant)?;
        let mut this = self;
        let tree: &'c DescriptorTree = this.state.tree;
        if tree.get(sub).composite().is_none() {
            return Err(this.mismatch("a struct variant"));
        }
        let element = if transparent {
            let desc = tree.get(sub);
            this.state
                .open_element(this.target, &desc.tag_name, &desc.namespace_decls)?
        } else {
            this.open_tagged(variant)?
        };
        Ok(StructEncoder::new(
            this.state,
            this.target,
            sub,
            Some(element),
        ))
    }
}

struct Deferred {
    rank: usize,
    fragment: FragmentBuffer,
}

/// Writes the fields of a composite value.
pub(crate) struct StructEncoder<'a, 'c> {
    state: &'a mut EncodeState<'c>,
    target: &'a mut dyn XmlWriter,
    desc: DescriptorId,
    /// Element to close once every field is written.
    element: Option<QName>,
    deferred: Vec<Deferred>,
}

impl<'a, 'c> StructEncoder<'a, 'c> {
    fn new(
        state: &'a mut EncodeState<'c>,
        target: &'a mut dyn XmlWriter,
        desc: DescriptorId,
        element: Option<QName>,
    ) -> Self {
        StructEncoder {
            state,
            target,
            desc,
            element,
            deferred: Vec::new(),
        }
    }

    fn encode_field<T>(&mut self, key: &str, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        let tree: &'c DescriptorTree = self.state.tree;
        let parent = tree.get(self.desc);
        let info = parent
            .composite()
            .ok_or_else(|| XmlError::defect(parent.type_name.clone(), "not a composite"))?;
        let index = info.child_index(key).ok_or_else(|| {
            XmlError::defect(
                parent.type_name.clone(),
                format!("serialized field `{}` is not described", key),
            )
        })?;
        let child_id = info.children[index].descriptor;
        let child = tree.get(child_id);

        if info.other_attributes == Some(index) {
            return value.serialize(ValueSerializer {
                state: &mut *self.state,
                target: &mut *self.target,
                desc: child_id,
                mode: Mode::Normal,
            });
        }

        if let Some(default) = &child.default {
            let policy = &self.state.config.policy;
            if !policy.should_encode_element_default(child, self.state.config.encode_default)
                && capture_text(value, child)?.as_deref() == Some(default.as_str())
            {
                tracing::trace!(field = key, "eliding default value");
                return Ok(());
            }
        }

        match child.output_kind {
            OutputKind::Attribute => value.serialize(ValueSerializer {
                state: &mut *self.state,
                target: &mut *self.target,
                desc: child_id,
                mode: Mode::Normal,
            }),
            _ => {
                let mut fragment = FragmentBuffer::new();
                value.serialize(ValueSerializer {
                    state: &mut *self.state,
                    target: &mut fragment,
                    desc: child_id,
                    mode: Mode::Normal,
                })?;
                if !fragment.is_empty() {
                    self.deferred.push(Deferred {
                        rank: info.ranks[index],
                        fragment,
                    });
                }
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<()> {
        let mut deferred = self.deferred;
        deferred.sort_by_key(|d| d.rank);
        if !deferred.is_empty() {
            tracing::trace!(count = deferred.len(), "flushing deferred children");
        }
        for item in deferred {
            item.fragment.replay(&mut *self.target)?;
        }
        if let Some(name) = &self.element {
            self.state.close_element(self.target, name)?;
        }
        Ok(())
    }
}

impl ser::SerializeStruct for StructEncoder<'_, '_> {
    type Ok = ();
    type Error = XmlError;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.encode_field(key, value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl ser::SerializeStructVariant for StructEncoder<'_, '_> {
    type Ok = ();
    type Error = XmlError;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.encode_field(key, value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

/// Writes a list, either as repeated items or as a whitespace separated token list.
pub(crate) enum SeqEncoder<'a, 'c> {
    Items {
        state: &'a mut EncodeState<'c>,
        target: &'a mut dyn XmlWriter,
        item: DescriptorId,
        outer: Option<QName>,
    },
    Tokens {
        state: &'a mut EncodeState<'c>,
        target: &'a mut dyn XmlWriter,
        list: DescriptorId,
        item: DescriptorId,
        tokens: Vec<String>,
    },
}

impl SeqEncoder<'_, '_> {
    fn push<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        match self {
            SeqEncoder::Items {
                state,
                target,
                item,
                ..
            } => value.serialize(ValueSerializer {
                state: &mut **state,
                target: &mut **target,
                desc: *item,
                mode: Mode::Normal,
            }),
            SeqEncoder::Tokens {
                state,
                item,
                tokens,
                ..
            } => {
                let item_desc = state.tree.get(*item);
                if let Some(text) = capture_text(value, item_desc)? {
                    tokens.push(text);
                }
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            SeqEncoder::Items {
                state,
                target,
                outer,
                ..
            } => match outer {
                Some(name) => state.close_element(target, &name),
                None => Ok(()),
            },
            SeqEncoder::Tokens {
                state,
                target,
                list,
                tokens,
                ..
            } => {
                if tokens.is_empty() {
                    return Ok(());
                }
                let joined = tokens.join(" ");
                let desc = state.tree.get(list);
                match desc.output_kind {
                    OutputKind::Attribute => {
                        let tag = desc.tag_name.clone();
                        state.write_attribute(target, &tag, &joined)
                    }
                    _ => write_content(target, &joined, desc.cdata),
                }
            }
        }
    }
}

impl ser::SerializeSeq for SeqEncoder<'_, '_> {
    type Ok = ();
    type Error = XmlError;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl ser::SerializeTuple for SeqEncoder<'_, '_> {
    type Ok = ();
    type Error = XmlError;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for SeqEncoder<'_, '_> {
    type Ok = ();
    type Error = XmlError;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

/// Writes maps: entry elements, attributes of the current element, or struct fields
/// produced through `serialize_map` (flattened structs).
pub(crate) enum MapEncoder<'a, 'c> {
    Entries {
        state: &'a mut EncodeState<'c>,
        target: &'a mut dyn XmlWriter,
        map: DescriptorId,
        outer: Option<QName>,
        key: Option<String>,
    },
    Attributes {
        state: &'a mut EncodeState<'c>,
        target: &'a mut dyn XmlWriter,
        key: Option<String>,
    },
    Fields(StructEncoder<'a, 'c>, Option<String>),
}

impl ser::SerializeMap for MapEncoder<'_, '_> {
    type Ok = ();
    type Error = XmlError;

    fn serialize_key<T>(&mut self, key: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        let text = key
            .serialize(TextCapture { enum_desc: None })?
            .ok_or_else(|| XmlError::Custom("map keys must have a text form".to_string()))?;
        match self {
            MapEncoder::Entries { key, .. }
            | MapEncoder::Attributes { key, .. }
            | MapEncoder::Fields(_, key) => *key = Some(text),
        }
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        match self {
            MapEncoder::Entries {
                state,
                target,
                map,
                key,
                ..
            } => {
                let key = key
                    .take()
                    .ok_or_else(|| XmlError::Custom("map value without a key".to_string()))?;
                let tree = state.tree;
                let info = match &tree.get(*map).kind {
                    DescriptorKind::Map(info) => info,
                    _ => return Err(XmlError::Custom("map descriptor expected".to_string())),
                };
                let entry = state.open_element(&mut **target, &info.entry_name, &[])?;
                state.write_attribute(&mut **target, &info.key_name, &key)?;
                value.serialize(ValueSerializer {
                    state: &mut **state,
                    target: &mut **target,
                    desc: info.value,
                    mode: Mode::Normal,
                })?;
                state.close_element(&mut **target, &entry)
            }
            MapEncoder::Attributes { state, target, key } => {
                let key = key
                    .take()
                    .ok_or_else(|| XmlError::Custom("attribute value without a name".to_string()))?;
                let Some(text) = value.serialize(TextCapture { enum_desc: None })? else {
                    return Ok(());
                };
                let (namespace, local) = utils::parse_clark_name(&key);
                let name = QName::new(namespace, local, "");
                state.write_attribute(&mut **target, &name, &text)
            }
            MapEncoder::Fields(fields, key) => {
                let key = key
                    .take()
                    .ok_or_else(|| XmlError::Custom("field value without a name".to_string()))?;
                fields.encode_field(&key, value)
            }
        }
    }

    fn end(self) -> Result<()> {
        match self {
            MapEncoder::Entries {
                state,
                target,
                outer,
                ..
            } => match outer {
                Some(name) => state.close_element(target, &name),
                None => Ok(()),
            },
            MapEncoder::Attributes { .. } => Ok(()),
            MapEncoder::Fields(fields, _) => fields.finish(),
        }
    }
}

/// Renders a primitive value to the text it would be written as. `None` means the value is
/// absent.
fn capture_text<T>(value: &T, desc: &XmlDescriptor) -> Result<Option<String>>
where
    T: ?Sized + Serialize,
{
    value.serialize(TextCapture {
        enum_desc: Some(desc),
    })
}

struct TextCapture<'d> {
    enum_desc: Option<&'d XmlDescriptor>,
}

impl TextCapture<'_> {
    fn not_text(what: &str) -> XmlError {
        XmlError::Custom(format!("{} has no text form", what))
    }
}

impl<'d> ser::Serializer for TextCapture<'d> {
    type Ok = Option<String>;
    type Error = XmlError;
    type SerializeSeq = Impossible<Option<String>, XmlError>;
    type SerializeTuple = Impossible<Option<String>, XmlError>;
    type SerializeTupleStruct = Impossible<Option<String>, XmlError>;
    type SerializeTupleVariant = Impossible<Option<String>, XmlError>;
    type SerializeMap = Impossible<Option<String>, XmlError>;
    type SerializeStruct = Impossible<Option<String>, XmlError>;
    type SerializeStructVariant = Impossible<Option<String>, XmlError>;

    fn serialize_bool(self, v: bool) -> Result<Option<String>> {
        Ok(Some(utils::bool_to_string(v).to_string()))
    }

    fn serialize_i8(self, v: i8) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_i16(self, v: i16) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_i32(self, v: i32) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_i64(self, v: i64) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_i128(self, v: i128) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_u8(self, v: u8) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_u16(self, v: u16) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_u32(self, v: u32) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_u64(self, v: u64) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_u128(self, v: u128) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_f32(self, v: f32) -> Result<Option<String>> {
        Ok(Some(utils::format_float(f64::from(v))))
    }

    fn serialize_f64(self, v: f64) -> Result<Option<String>> {
        Ok(Some(utils::format_float(v)))
    }

    fn serialize_char(self, v: char) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Option<String>> {
        Ok(Some(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Option<String>> {
        Ok(Some(BASE64.encode(v)))
    }

    fn serialize_none(self) -> Result<Option<String>> {
        Ok(None)
    }

    fn serialize_some<T>(self, value: &T) -> Result<Option<String>>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Option<String>> {
        Ok(Some(String::new()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Option<String>> {
        Ok(Some(String::new()))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Option<String>> {
        let encoded = match self.enum_desc.map(|d| &d.kind) {
            Some(DescriptorKind::Enum(variants)) => variants
                .iter()
                .find(|(name, _)| name == variant)
                .map(|(_, encoded)| encoded.clone()),
            _ => None,
        };
        Ok(Some(encoded.unwrap_or_else(|| variant.to_string())))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Option<String>>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Option<String>>
    where
        T: ?Sized + Serialize,
    {
        Err(Self::not_text("an enum variant with data"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(Self::not_text("a sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(Self::not_text("a tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(Self::not_text("a tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Self::not_text("a tuple variant"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Self::not_text("a map"))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Err(Self::not_text("a struct"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Self::not_text("a struct variant"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::build_tree;
    use crate::schema::{TypeDescriptor, TypeRef, XmlAnnotation};
    use crate::xml::writer::QuickXmlWriter;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Pair {
        left: String,
        right: i32,
    }

    fn pair_desc() -> TypeDescriptor {
        TypeDescriptor::class("Pair")
            .field("left", TypeRef::of::<String>())
            .field("right", TypeRef::of::<i32>())
    }

    fn encode<T: Serialize>(value: &T, desc: &TypeDescriptor) -> Result<String> {
        let config = XmlConfig::default();
        let tree = build_tree(desc, &config, None)?;
        let mut writer = QuickXmlWriter::new(Vec::new(), None);
        let mut state = EncodeState::new(&tree, &config, Vec::new());
        value.serialize(ValueSerializer::root(&mut state, &mut writer))?;
        let bytes = writer.finish()?;
        Ok(String::from_utf8(bytes).map_err(|e| XmlError::Custom(e.to_string()))?)
    }

    #[test]
    fn test_primitive_fields_become_attributes() -> Result<()> {
        let xml = encode(
            &Pair {
                left: "a".to_string(),
                right: 2,
            },
            &pair_desc(),
        )?;
        assert_eq!(xml, r#"<Pair left="a" right="2"/>"#);
        Ok(())
    }

    #[test]
    fn test_element_fields_follow_declaration_order() -> Result<()> {
        let desc = TypeDescriptor::class("Pair")
            .element(
                crate::schema::ElementInfo::new("left", TypeRef::of::<String>())
                    .annotate(XmlAnnotation::Element(true)),
            )
            .element(
                crate::schema::ElementInfo::new("right", TypeRef::of::<i32>())
                    .annotate(XmlAnnotation::Element(true))
                    .annotate(XmlAnnotation::Before(vec!["left".to_string()])),
            );
        let xml = encode(
            &Pair {
                left: "a".to_string(),
                right: 2,
            },
            &desc,
        )?;
        assert_eq!(xml, "<Pair><right>2</right><left>a</left></Pair>");
        Ok(())
    }

    #[test]
    fn test_text_capture() {
        let desc = XmlDescriptor {
            type_name: "Flag".to_string(),
            use_name: "flag".to_string(),
            tag_name: QName::local("flag"),
            output_kind: OutputKind::Attribute,
            nullable: false,
            default: None,
            optional: false,
            cdata: false,
            namespace_decls: Vec::new(),
            kind: DescriptorKind::Enum(vec![("On".to_string(), "on".to_string())]),
        };
        assert_eq!(capture_text(&Some(3u8), &desc).unwrap(), Some("3".to_string()));
        assert_eq!(capture_text(&Option::<u8>::None, &desc).unwrap(), None);
        assert!(capture_text(&vec![1, 2], &desc).is_err());
    }
}
