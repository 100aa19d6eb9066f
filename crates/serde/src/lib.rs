//! # Helios XML Serialization
//!
//! This crate maps annotated Rust types to XML and back through `serde`.
//!
//! ## Features
//!
//! - **Output-kind resolution**: every field becomes an attribute, a child element or the
//!   text content of its parent, decided by a pluggable [`XmlSerializationPolicy`].
//! - **Names and namespaces**: tags carry namespace URIs and preferred prefixes; colliding or
//!   missing prefixes are repaired with generated `n1`, `n2`, ... prefixes.
//! - **Collections without wrappers**: lists and maps are written as repeated siblings unless
//!   a children name asks for a wrapper element.
//! - **Polymorphism**: tagged (`type` attribute) and transparent (subtype tag) encodings.
//! - **Absence as null**: `None` is written as nothing, and a missing element or attribute
//!   decodes to `None`.
//! - **Sibling ordering**: `Before`/`After` annotations constrain the order of child elements.
//!
//! ## Architecture
//!
//! - [`schema`]: hand-written or generated [`TypeDescriptor`]s describing each type.
//! - [`policy`]: the rules turning a descriptor use into a tag, output kind and ordering.
//! - [`descriptor`]: builds and caches resolved [`DescriptorTree`](descriptor::DescriptorTree)s.
//! - [`namespace`]: scoped prefix bindings.
//! - [`xml`]: the `Serializer`/`Deserializer` pair and the quick-xml reader/writer layers.
//!
//! ## Examples
//!
//! ```ignore
//! use helios_xml_serde::schema::{TypeDescriptor, TypeRef, XmlSchema};
//! use helios_xml_serde::{from_xml_str, to_xml_string};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Point { x: i32, y: i32 }
//!
//! impl XmlSchema for Point {
//!     fn type_descriptor() -> TypeDescriptor {
//!         TypeDescriptor::class("Point")
//!             .field("x", TypeRef::of::<i32>())
//!             .field("y", TypeRef::of::<i32>())
//!     }
//! }
//!
//! let xml = to_xml_string(&Point { x: 1, y: 2 })?; // <Point x="1" y="2"/>
//! let point: Point = from_xml_str(&xml)?;
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod name;
pub mod namespace;
pub mod policy;
pub mod schema;
pub mod xml;

// Re-export common types and functions
pub use config::{EncodeDefault, UnknownContentHandler, UnknownContentPolicy, XmlConfig};
pub use error::{InputKind, Result, XmlError};
pub use name::{Namespace, QName};
pub use policy::{DefaultPolicy, XmlSerializationPolicy};
pub use schema::{TypeDescriptor, TypeRef, XmlAnnotation, XmlName, XmlSchema};
pub use xml::Xml;

pub use xml::{from_xml_reader, from_xml_slice, from_xml_str, to_xml_string, to_xml_vec, to_xml_writer};
