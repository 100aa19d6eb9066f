//! Encoding and decoding of annotated Rust values as XML.
//!
//! This module holds the codec itself: a [`serde::Serializer`] and [`serde::Deserializer`]
//! pair driven by the descriptors of [`crate::descriptor`], plus the thin reader and writer
//! layers over quick-xml they talk to.
//!
//! ## Mapping
//!
//! | Rust value | Default XML form |
//! |------------|------------------|
//! | primitive field | attribute `name="value"` |
//! | struct field | child element `<name>...</name>` |
//! | `Vec<T>` of structs | repeated `<item/>` siblings, no wrapper |
//! | `Option<T>` set to `None` | nothing at all |
//! | tagged polymorphic value | `<field type="Variant">...</field>` |
//! | transparent polymorphic value | `<variantTag>...</variantTag>` |
//!
//! Annotations on the [`TypeDescriptor`](crate::schema::TypeDescriptor) change any of these:
//! see [`XmlAnnotation`](crate::schema::XmlAnnotation).
//!
//! ## Examples
//!
//! ```ignore
//! use helios_xml_serde::xml::{from_xml_str, to_xml_string};
//!
//! let xml = to_xml_string(&food)?;
//! let back: Food = from_xml_str(&xml)?;
//! ```

pub mod de;
pub mod reader;
pub mod ser;
mod utils;
pub mod writer;

use std::io::{BufRead, Write};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::XmlConfig;
use crate::descriptor::{DescriptorCache, DescriptorTree};
use crate::error::{Result, XmlError};
use crate::name::QName;
use crate::schema::{TypeRef, XmlSchema};
use de::Decoder;
use reader::XmlEventReader;
use ser::{EncodeState, ValueSerializer};
use writer::{NamespaceCollector, QuickXmlWriter, XmlWriter};

pub use de::{from_xml_reader, from_xml_slice, from_xml_str};
pub use ser::{to_xml_string, to_xml_vec, to_xml_writer};

/// Codec used by the free functions.
pub(crate) static DEFAULT_CODEC: Lazy<Xml> = Lazy::new(Xml::default);

/// An XML codec: a configuration plus the descriptor cache built under it.
///
/// Codecs are cheap to share across threads; descriptor trees are built once per root type
/// and reused by every call.
#[derive(Debug)]
pub struct Xml {
    config: XmlConfig,
    cache: DescriptorCache,
}

impl Default for Xml {
    fn default() -> Self {
        Xml::new(XmlConfig::default())
    }
}

impl Xml {
    pub fn new(config: XmlConfig) -> Self {
        let cache = DescriptorCache::new(config.cache_capacity);
        Xml { config, cache }
    }

    pub fn config(&self) -> &XmlConfig {
        &self.config
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// The resolved descriptor tree for `T`, built on first use.
    pub fn descriptor<T>(&self) -> Result<Arc<DescriptorTree>>
    where
        T: XmlSchema + ?Sized,
    {
        self.cache
            .get_or_build(&TypeRef::of::<T>().resolve(), &self.config, None)
    }

    pub fn to_string<T>(&self, value: &T) -> Result<String>
    where
        T: Serialize + XmlSchema + ?Sized,
    {
        let buffer = self.encode(value, None, Vec::new())?;
        String::from_utf8(buffer).map_err(|e| XmlError::Custom(e.to_string()))
    }

    /// Encodes `value` under a root tag other than the one its type resolves to.
    pub fn to_string_with_root<T>(&self, value: &T, root: &QName) -> Result<String>
    where
        T: Serialize + XmlSchema + ?Sized,
    {
        let buffer = self.encode(value, Some(root), Vec::new())?;
        String::from_utf8(buffer).map_err(|e| XmlError::Custom(e.to_string()))
    }

    pub fn to_vec<T>(&self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + XmlSchema + ?Sized,
    {
        self.encode(value, None, Vec::new())
    }

    pub fn to_writer<T, W>(&self, value: &T, writer: W) -> Result<()>
    where
        T: Serialize + XmlSchema + ?Sized,
        W: Write,
    {
        self.encode(value, None, writer)?;
        Ok(())
    }

    pub fn from_str<T>(&self, xml: &str) -> Result<T>
    where
        T: DeserializeOwned + XmlSchema,
    {
        self.decode(XmlEventReader::from_str(xml), None)
    }

    /// Decodes a document whose root tag was written with [`Xml::to_string_with_root`].
    pub fn from_str_with_root<T>(&self, xml: &str, root: &QName) -> Result<T>
    where
        T: DeserializeOwned + XmlSchema,
    {
        self.decode(XmlEventReader::from_str(xml), Some(root))
    }

    pub fn from_slice<T>(&self, xml: &[u8]) -> Result<T>
    where
        T: DeserializeOwned + XmlSchema,
    {
        self.decode(XmlEventReader::new(xml), None)
    }

    pub fn from_reader<T, R>(&self, reader: R) -> Result<T>
    where
        T: DeserializeOwned + XmlSchema,
        R: BufRead,
    {
        self.decode(XmlEventReader::new(reader), None)
    }

    fn encode<T, W>(&self, value: &T, root: Option<&QName>, writer: W) -> Result<W>
    where
        T: Serialize + XmlSchema + ?Sized,
        W: Write,
    {
        let tree = self
            .cache
            .get_or_build(&TypeRef::of::<T>().resolve(), &self.config, root)?;

        let root_decls = if self.config.collect_namespaces {
            let mut collector = NamespaceCollector::new();
            let mut state = EncodeState::new(&tree, &self.config, Vec::new());
            value.serialize(ValueSerializer::root(&mut state, &mut collector))?;
            let namespaces = collector.into_namespaces();
            tracing::debug!(count = namespaces.len(), "collected namespaces for the root element");
            namespaces
        } else {
            Vec::new()
        };

        let mut out = QuickXmlWriter::new(writer, self.config.indent);
        if self.config.xml_declaration {
            out.declaration()?;
        }
        let mut state = EncodeState::new(&tree, &self.config, root_decls);
        value.serialize(ValueSerializer::root(&mut state, &mut out))?;
        out.flush()?;
        out.finish()
    }

    fn decode<T, R>(&self, reader: XmlEventReader<R>, root: Option<&QName>) -> Result<T>
    where
        T: DeserializeOwned + XmlSchema,
        R: BufRead,
    {
        let tree = self
            .cache
            .get_or_build(&TypeRef::of::<T>().resolve(), &self.config, root)?;
        let mut decoder = Decoder::new(reader, &tree, &self.config);
        decoder.decode_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeDescriptor;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl XmlSchema for Point {
        fn type_descriptor() -> TypeDescriptor {
            TypeDescriptor::class("Point")
                .field("x", TypeRef::of::<i32>())
                .field("y", TypeRef::of::<i32>())
        }
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Segment {
        start: Point,
        end: Point,
    }

    impl XmlSchema for Segment {
        fn type_descriptor() -> TypeDescriptor {
            TypeDescriptor::class("Segment")
                .field("start", TypeRef::of::<Point>())
                .field("end", TypeRef::of::<Point>())
        }
    }

    mod other {
        use super::*;

        /// Shares its serial name with the outer `Point`.
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        pub struct Point {
            pub lat: f64,
        }

        impl XmlSchema for Point {
            fn type_descriptor() -> TypeDescriptor {
                TypeDescriptor::class("Point").field("lat", TypeRef::of::<f64>())
            }
        }
    }

    #[test]
    fn test_codec_reuses_descriptors() -> Result<()> {
        let codec = Xml::default();
        let first = codec.descriptor::<Point>()?;
        let xml = codec.to_string(&Point { x: 1, y: -2 })?;
        assert_eq!(xml, r#"<Point x="1" y="-2"/>"#);
        assert!(Arc::ptr_eq(&first, &codec.descriptor::<Point>()?));
        assert_eq!(codec.cache().len(), 1);
        Ok(())
    }

    #[test]
    fn test_custom_root_name() -> Result<()> {
        let codec = Xml::default();
        let root = QName::new("urn:geo", "pt", "g");
        let xml = codec.to_string_with_root(&Point { x: 3, y: 4 }, &root)?;
        assert_eq!(xml, r#"<g:pt xmlns:g="urn:geo" x="3" y="4"/>"#);
        let back: Point = codec.from_str_with_root(&xml, &root)?;
        assert_eq!(back, Point { x: 3, y: 4 });
        Ok(())
    }

    #[test]
    fn test_same_serial_name_on_one_codec() -> Result<()> {
        let codec = Xml::default();
        assert_eq!(codec.to_string(&Point { x: 1, y: 2 })?, r#"<Point x="1" y="2"/>"#);
        let xml = codec.to_string(&other::Point { lat: 4.5 })?;
        assert_eq!(xml, r#"<Point lat="4.5"/>"#);
        let back: other::Point = codec.from_str(&xml)?;
        assert_eq!(back, other::Point { lat: 4.5 });
        assert_eq!(codec.cache().len(), 2);
        Ok(())
    }

    #[test]
    fn test_declaration_and_indent() -> Result<()> {
        let codec = Xml::new(
            XmlConfig::builder()
                .xml_declaration(true)
                .indent(2)
                .build(),
        );
        let segment = Segment {
            start: Point { x: 0, y: 0 },
            end: Point { x: 1, y: 1 },
        };
        let xml = codec.to_string(&segment)?;
        assert_eq!(
            xml,
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
                "<Segment>\n",
                "  <start x=\"0\" y=\"0\"/>\n",
                "  <end x=\"1\" y=\"1\"/>\n",
                "</Segment>"
            )
        );
        let back: Segment = codec.from_str(&xml)?;
        assert_eq!(back, segment);
        Ok(())
    }
}
