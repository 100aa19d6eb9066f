//! Resolved XML descriptors.
//!
//! The builder turns a [`TypeDescriptor`](crate::schema::TypeDescriptor) into a
//! [`DescriptorTree`]: an arena of immutable [`XmlDescriptor`]s that reference each other by
//! [`DescriptorId`]. Recursive types share a node instead of expanding forever. Trees are
//! shared through the [`DescriptorCache`].

pub mod builder;
pub mod cache;
pub mod order;

use std::collections::HashMap;

pub use builder::build_tree;
pub use cache::DescriptorCache;
pub use order::OrderMatrix;

use crate::name::{Namespace, QName};
use crate::schema::PrimitiveKind;

/// How a value appears in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Element,
    Attribute,
    Text,
    /// Only used while a descriptor is being resolved.
    Unknown,
}

/// Index of a descriptor inside its [`DescriptorTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub(crate) usize);

/// A field of a composite descriptor.
#[derive(Debug, Clone)]
pub struct ChildDescriptor {
    /// Field name as seen by serde.
    pub name: String,
    pub descriptor: DescriptorId,
}

#[derive(Debug, Clone)]
pub struct CompositeInfo {
    pub children: Vec<ChildDescriptor>,
    pub value_child: Option<usize>,
    pub other_attributes: Option<usize>,
    pub order: OrderMatrix,
    /// Position of each child in the canonical write order.
    pub ranks: Vec<usize>,
    pub attribute_names: HashMap<QName, usize>,
    pub element_names: HashMap<QName, usize>,
    /// Tags of transparent polymorphic children: `(child index, subtype index)`.
    pub poly_names: HashMap<QName, (usize, usize)>,
}

impl CompositeInfo {
    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ListInfo {
    pub item: DescriptorId,
    /// Items are written directly inside the parent, repeating the item tag.
    pub elided: bool,
}

#[derive(Debug, Clone)]
pub struct MapInfo {
    pub key: DescriptorId,
    pub value: DescriptorId,
    pub key_name: QName,
    pub entry_name: QName,
    pub elided: bool,
}

/// One subtype of a polymorphic descriptor.
#[derive(Debug, Clone)]
pub struct PolyInfo {
    /// Serde variant name, also written as the discriminator.
    pub type_name: String,
    pub tag_name: QName,
    /// The tag came from a `PolyChildren` entry rather than the subtype's own name.
    pub explicit: bool,
    pub descriptor: DescriptorId,
}

#[derive(Debug, Clone)]
pub struct PolymorphicInfo {
    pub transparent: bool,
    pub discriminator: QName,
    pub subtypes: Vec<PolyInfo>,
}

impl PolymorphicInfo {
    pub fn by_type_name(&self, name: &str) -> Option<&PolyInfo> {
        self.subtypes.iter().find(|p| p.type_name == name)
    }

    pub fn by_tag(&self, tag: &QName) -> Option<&PolyInfo> {
        self.subtypes.iter().find(|p| p.tag_name == *tag)
    }

    pub fn type_names(&self) -> Vec<String> {
        self.subtypes.iter().map(|p| p.type_name.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub enum DescriptorKind {
    Primitive(PrimitiveKind),
    /// Variant names paired with their encoded text.
    Enum(Vec<(String, String)>),
    Object,
    Composite(CompositeInfo),
    List(ListInfo),
    Map(MapInfo),
    Polymorphic(PolymorphicInfo),
}

/// Fully resolved description of one use of a type.
#[derive(Debug, Clone)]
pub struct XmlDescriptor {
    pub type_name: String,
    pub use_name: String,
    pub tag_name: QName,
    pub output_kind: OutputKind,
    pub nullable: bool,
    pub default: Option<String>,
    pub optional: bool,
    /// Text content is written as CDATA.
    pub cdata: bool,
    pub namespace_decls: Vec<Namespace>,
    pub kind: DescriptorKind,
}

impl XmlDescriptor {
    pub fn is_primitive_like(&self) -> bool {
        matches!(
            self.kind,
            DescriptorKind::Primitive(_) | DescriptorKind::Enum(_)
        )
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, DescriptorKind::List(_) | DescriptorKind::Map(_))
    }

    pub fn composite(&self) -> Option<&CompositeInfo> {
        match &self.kind {
            DescriptorKind::Composite(info) => Some(info),
            _ => None,
        }
    }
}

/// Arena of descriptors for one root type.
#[derive(Debug, Clone)]
pub struct DescriptorTree {
    pub(crate) nodes: Vec<XmlDescriptor>,
    pub(crate) root: DescriptorId,
}

impl DescriptorTree {
    pub fn root(&self) -> DescriptorId {
        self.root
    }

    pub fn get(&self, id: DescriptorId) -> &XmlDescriptor {
        &self.nodes[id.0]
    }

    pub fn root_descriptor(&self) -> &XmlDescriptor {
        self.get(self.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child `index` of a composite descriptor.
    pub fn child(&self, parent: DescriptorId, index: usize) -> Option<&XmlDescriptor> {
        self.get(parent)
            .composite()
            .and_then(|info| info.children.get(index))
            .map(|c| self.get(c.descriptor))
    }
}
