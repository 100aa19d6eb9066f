//! Generic type descriptions consumed by the descriptor builder.
//!
//! A [`TypeDescriptor`] describes the shape of a serde type independently of XML: its kind,
//! its ordered fields and the annotations attached to the type and to each field. Types
//! expose their description through [`XmlSchema`]; nested types are referenced through
//! [`TypeRef`], which produces the nested description on demand so recursive types can be
//! described without infinite expansion.
//!
//! ```ignore
//! impl XmlSchema for Food {
//!     fn type_descriptor() -> TypeDescriptor {
//!         TypeDescriptor::class("Food")
//!             .annotate(XmlAnnotation::SerialName(
//!                 XmlName::new("food").namespace("https://schema.restaurant.info").prefix("ns"),
//!             ))
//!             .element(ElementInfo::new("istasty", TypeRef::of::<String>())
//!                 .annotate(XmlAnnotation::Element(false)))
//!             .field("name", TypeRef::of::<Option<String>>())
//!     }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::name::Namespace;

/// Implemented by every type that can pass through the XML codec.
pub trait XmlSchema {
    fn type_descriptor() -> TypeDescriptor;
}

/// Identifies the Rust type a description was produced for. Distinct types that share a
/// serial name get distinct identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeIdentity {
    /// [`std::any::type_name`] of the described type.
    Rust(&'static str),
    /// Address of the function passed to [`TypeRef::from_fn`].
    Function(usize),
}

/// Lazily evaluated reference to the description of a nested type.
#[derive(Clone, Copy)]
pub struct TypeRef {
    describe: fn() -> TypeDescriptor,
    identity: TypeIdentity,
}

impl TypeRef {
    pub fn of<T: XmlSchema + ?Sized>() -> Self {
        TypeRef {
            describe: T::type_descriptor,
            identity: TypeIdentity::Rust(std::any::type_name::<T>()),
        }
    }

    pub fn from_fn(f: fn() -> TypeDescriptor) -> Self {
        TypeRef {
            describe: f,
            identity: TypeIdentity::Function(f as usize),
        }
    }

    pub fn identity(&self) -> TypeIdentity {
        self.identity
    }

    /// Produces the description, tagged with this reference's identity.
    pub fn resolve(&self) -> TypeDescriptor {
        let mut desc = (self.describe)();
        desc.identity = Some(self.identity);
        desc
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeRef").field(&self.identity).finish()
    }
}

/// Primitive value categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Int,
    UInt,
    Float,
    Char,
    String,
    Bytes,
}

/// One member of a polymorphic base: the serde variant name and the subtype it carries.
#[derive(Debug, Clone)]
pub struct Subtype {
    pub variant: String,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Class,
    List(TypeRef),
    Map(TypeRef, TypeRef),
    Object,
    Enum(Vec<String>),
    PolymorphicSealed(Vec<Subtype>),
    /// Subtypes are looked up in the [`SubtypeRegistry`] under the base serial name.
    PolymorphicOpen,
    /// The concrete description is looked up in the [`SubtypeRegistry`] at build time.
    Contextual,
}

impl TypeKind {
    pub fn is_primitive_like(&self) -> bool {
        matches!(self, TypeKind::Primitive(_) | TypeKind::Enum(_))
    }
}

/// Name given through an annotation. `None` namespace or prefix means "not specified".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XmlName {
    pub local: String,
    pub namespace: Option<String>,
    pub prefix: Option<String>,
}

impl XmlName {
    pub fn new(local: impl Into<String>) -> Self {
        XmlName {
            local: local.into(),
            namespace: None,
            prefix: None,
        }
    }

    pub fn namespace(mut self, uri: impl Into<String>) -> Self {
        self.namespace = Some(uri.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// XML-specific metadata attached to a type or to one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum XmlAnnotation {
    SerialName(XmlName),
    /// `true` forces an element, `false` forces an attribute.
    Element(bool),
    /// The field holds the text content of its parent.
    Value,
    /// Textual default used for elision on encode and for absent fields on decode.
    Default(String),
    /// Wraps a list or map in its field tag, naming each item with this name.
    ChildrenName(XmlName),
    /// Transparent polymorphism; entries are `"Variant"` or `"Variant=tag"`.
    PolyChildren(Vec<String>),
    Before(Vec<String>),
    After(Vec<String>),
    /// Map field that collects attributes not matched by any other field.
    OtherAttributes,
    NamespaceDecls(Vec<Namespace>),
    /// Attribute name holding a map entry key.
    KeyName(String),
    /// Text content is written as a CDATA section. Primitive fields without an explicit
    /// output kind become elements.
    CData,
}

/// A field of a class.
#[derive(Debug, Clone)]
pub struct ElementInfo {
    pub name: String,
    pub type_ref: TypeRef,
    pub annotations: Vec<XmlAnnotation>,
    /// The serde side supplies a value when the field is absent.
    pub optional: bool,
}

impl ElementInfo {
    pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
        ElementInfo {
            name: name.into(),
            type_ref,
            annotations: Vec::new(),
            optional: false,
        }
    }

    pub fn annotate(mut self, annotation: XmlAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Shape of a type, independent of any XML decisions.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub serial_name: String,
    pub kind: TypeKind,
    pub nullable: bool,
    pub annotations: Vec<XmlAnnotation>,
    pub elements: Vec<ElementInfo>,
    /// Set when the description was produced through a [`TypeRef`]; descriptions built by
    /// hand are told apart by serial name only.
    pub identity: Option<TypeIdentity>,
}

impl TypeDescriptor {
    pub fn new(serial_name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDescriptor {
            serial_name: serial_name.into(),
            kind,
            nullable: false,
            annotations: Vec::new(),
            elements: Vec::new(),
            identity: None,
        }
    }

    pub fn primitive(serial_name: impl Into<String>, kind: PrimitiveKind) -> Self {
        Self::new(serial_name, TypeKind::Primitive(kind))
    }

    pub fn class(serial_name: impl Into<String>) -> Self {
        Self::new(serial_name, TypeKind::Class)
    }

    pub fn object(serial_name: impl Into<String>) -> Self {
        Self::new(serial_name, TypeKind::Object)
    }

    pub fn enumeration<I, S>(serial_name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            serial_name,
            TypeKind::Enum(variants.into_iter().map(Into::into).collect()),
        )
    }

    pub fn list(item: TypeRef) -> Self {
        let item_name = item.resolve().serial_name;
        Self::new(format!("List<{}>", item_name), TypeKind::List(item))
    }

    pub fn map(key: TypeRef, value: TypeRef) -> Self {
        let name = format!(
            "Map<{}, {}>",
            key.resolve().serial_name,
            value.resolve().serial_name
        );
        Self::new(name, TypeKind::Map(key, value))
    }

    pub fn sealed(serial_name: impl Into<String>) -> Self {
        Self::new(serial_name, TypeKind::PolymorphicSealed(Vec::new()))
    }

    pub fn open(serial_name: impl Into<String>) -> Self {
        Self::new(serial_name, TypeKind::PolymorphicOpen)
    }

    pub fn contextual(serial_name: impl Into<String>) -> Self {
        Self::new(serial_name, TypeKind::Contextual)
    }

    /// Adds a subtype to a sealed polymorphic description.
    pub fn subtype(mut self, variant: impl Into<String>, type_ref: TypeRef) -> Self {
        if let TypeKind::PolymorphicSealed(subtypes) = &mut self.kind {
            subtypes.push(Subtype {
                variant: variant.into(),
                type_ref,
            });
        }
        self
    }

    pub fn annotate(mut self, annotation: XmlAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn field(self, name: impl Into<String>, type_ref: TypeRef) -> Self {
        self.element(ElementInfo::new(name, type_ref))
    }

    pub fn element(mut self, element: ElementInfo) -> Self {
        self.elements.push(element);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Unqualified type name: type arguments dropped, then the part after the last `.` or
    /// `::`.
    pub fn simple_name(&self) -> &str {
        simple_name(&self.serial_name)
    }
}

pub(crate) fn simple_name(serial_name: &str) -> &str {
    let base = serial_name.split('<').next().unwrap_or(serial_name).trim_end();
    let after_path = base.rsplit("::").next().unwrap_or(base);
    after_path.rsplit('.').next().unwrap_or(after_path)
}

/// Subtypes of open polymorphic bases and the concrete types behind contextual descriptions.
#[derive(Debug, Clone, Default)]
pub struct SubtypeRegistry {
    polymorphic: HashMap<String, Vec<Subtype>>,
    contextual: HashMap<String, TypeRef>,
}

impl SubtypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_subtype(
        &mut self,
        base: impl Into<String>,
        variant: impl Into<String>,
        type_ref: TypeRef,
    ) -> &mut Self {
        self.polymorphic
            .entry(base.into())
            .or_default()
            .push(Subtype {
                variant: variant.into(),
                type_ref,
            });
        self
    }

    pub fn register_contextual(
        &mut self,
        serial_name: impl Into<String>,
        type_ref: TypeRef,
    ) -> &mut Self {
        self.contextual.insert(serial_name.into(), type_ref);
        self
    }

    pub fn subtypes(&self, base: &str) -> &[Subtype] {
        self.polymorphic
            .get(base)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contextual(&self, serial_name: &str) -> Option<TypeRef> {
        self.contextual.get(serial_name).copied()
    }
}

macro_rules! primitive_schema {
    ($kind:ident => $($ty:ty),+) => {
        $(
            impl XmlSchema for $ty {
                fn type_descriptor() -> TypeDescriptor {
                    TypeDescriptor::primitive(stringify!($ty), PrimitiveKind::$kind)
                }
            }
        )+
    };
}

primitive_schema!(Bool => bool);
primitive_schema!(Int => i8, i16, i32, i64, i128, isize);
primitive_schema!(UInt => u8, u16, u32, u64, u128, usize);
primitive_schema!(Float => f32, f64);
primitive_schema!(Char => char);
primitive_schema!(String => String, str);

impl XmlSchema for () {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::object("Unit")
    }
}

impl<T: XmlSchema + ?Sized> XmlSchema for &T {
    fn type_descriptor() -> TypeDescriptor {
        T::type_descriptor()
    }
}

impl<T: XmlSchema + ?Sized> XmlSchema for Box<T> {
    fn type_descriptor() -> TypeDescriptor {
        T::type_descriptor()
    }
}

impl<T: XmlSchema> XmlSchema for Option<T> {
    fn type_descriptor() -> TypeDescriptor {
        T::type_descriptor().nullable()
    }
}

impl<T: XmlSchema> XmlSchema for Vec<T> {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::list(TypeRef::of::<T>())
    }
}

impl<T: XmlSchema> XmlSchema for [T] {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::list(TypeRef::of::<T>())
    }
}

impl<K: XmlSchema, V: XmlSchema> XmlSchema for BTreeMap<K, V> {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::map(TypeRef::of::<K>(), TypeRef::of::<V>())
    }
}

impl<K: XmlSchema, V: XmlSchema, S> XmlSchema for HashMap<K, V, S> {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::map(TypeRef::of::<K>(), TypeRef::of::<V>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node;

    impl XmlSchema for Node {
        fn type_descriptor() -> TypeDescriptor {
            TypeDescriptor::class("tree::Node")
                .field("label", TypeRef::of::<String>())
                .field("children", TypeRef::of::<Vec<Node>>())
        }
    }

    #[test]
    fn test_recursive_description_terminates() {
        let node = Node::type_descriptor();
        assert_eq!(node.elements.len(), 2);
        let children = node.elements[1].type_ref.resolve();
        assert_eq!(children.serial_name, "List<tree::Node>");
        match children.kind {
            TypeKind::List(item) => assert_eq!(item.resolve().serial_name, "tree::Node"),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_option_marks_nullable() {
        let desc = <Option<i32>>::type_descriptor();
        assert!(desc.nullable);
        assert!(matches!(desc.kind, TypeKind::Primitive(PrimitiveKind::Int)));
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("tree::Node"), "Node");
        assert_eq!(simple_name("io.github.Food"), "Food");
        assert_eq!(simple_name("Plain"), "Plain");
        assert_eq!(simple_name("List<tree::Node>"), "List");
        assert_eq!(simple_name("Map<String, u32>"), "Map");
        assert_eq!(simple_name("geo::Pair<f64>"), "Pair");
    }

    mod first {
        pub struct Point;
    }
    mod second {
        pub struct Point;
    }

    impl XmlSchema for first::Point {
        fn type_descriptor() -> TypeDescriptor {
            TypeDescriptor::class("Point").field("x", TypeRef::of::<i32>())
        }
    }

    impl XmlSchema for second::Point {
        fn type_descriptor() -> TypeDescriptor {
            TypeDescriptor::class("Point").field("lat", TypeRef::of::<f64>())
        }
    }

    #[test]
    fn test_same_serial_name_keeps_distinct_identity() {
        let a = TypeRef::of::<first::Point>().resolve();
        let b = TypeRef::of::<second::Point>().resolve();
        assert_eq!(a.serial_name, b.serial_name);
        assert_ne!(a.identity, b.identity);
        assert_eq!(a.identity, Some(TypeRef::of::<first::Point>().identity()));
        assert!(first::Point::type_descriptor().identity.is_none());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = SubtypeRegistry::new();
        registry.register_subtype("Shape", "Circle", TypeRef::of::<String>());
        assert_eq!(registry.subtypes("Shape").len(), 1);
        assert!(registry.subtypes("Other").is_empty());
        assert!(registry.contextual("Shape").is_none());
    }
}
