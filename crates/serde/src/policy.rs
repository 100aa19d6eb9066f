//! Output-kind and name resolution policy.
//!
//! Every decision the descriptor builder makes about a field (attribute, element or text;
//! tag name; list wrapping; polymorphism style; ordering) goes through an
//! [`XmlSerializationPolicy`]. [`DefaultPolicy`] implements the standard rules; custom policies
//! usually override one or two methods and inherit the rest.

use crate::config::{EncodeDefault, UnknownContentPolicy};
use crate::descriptor::order::{ChildRef, OrderConstraint};
use crate::descriptor::{OutputKind, XmlDescriptor};
use crate::error::{InputKind, Result, XmlError};
use crate::name::{Namespace, QName};
use crate::schema::{TypeDescriptor, TypeKind, XmlAnnotation, XmlName, simple_name};

/// Position a type is used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseRole {
    Root,
    Field,
    ListItem,
    MapKey,
    MapValue,
    PolyChild,
}

/// Everything the policy knows about one use of a type.
#[derive(Debug, Clone, Copy)]
pub struct UseSite<'a> {
    pub role: UseRole,
    /// Declared field name, or the type name for roots and polymorphic children.
    pub use_name: &'a str,
    pub use_annotations: &'a [XmlAnnotation],
    pub type_desc: &'a TypeDescriptor,
    pub parent_type: &'a str,
    pub parent_namespace: &'a Namespace,
    /// Name handed down by an enclosing elided list or map.
    pub inherited_name: Option<&'a QName>,
}

impl UseSite<'_> {
    pub fn use_annotation<T>(&self, f: impl Fn(&XmlAnnotation) -> Option<T>) -> Option<T> {
        self.use_annotations.iter().find_map(f)
    }

    pub fn type_annotation<T>(&self, f: impl Fn(&XmlAnnotation) -> Option<T>) -> Option<T> {
        self.type_desc.annotations.iter().find_map(f)
    }

    pub fn is_value_child(&self) -> bool {
        self.use_annotations
            .iter()
            .any(|a| matches!(a, XmlAnnotation::Value))
    }

    pub fn is_other_attributes(&self) -> bool {
        self.use_annotations
            .iter()
            .any(|a| matches!(a, XmlAnnotation::OtherAttributes))
    }
}

fn serial_name(annotation: &XmlAnnotation) -> Option<&XmlName> {
    match annotation {
        XmlAnnotation::SerialName(name) => Some(name),
        _ => None,
    }
}

fn element_flag(annotation: &XmlAnnotation) -> Option<bool> {
    match annotation {
        XmlAnnotation::Element(flag) => Some(*flag),
        _ => None,
    }
}

/// Converts an annotated name to a qualified name.
///
/// An unspecified namespace means the parent's namespace (and prefix) for elements and no
/// namespace for attributes.
pub fn annotated_qname(name: &XmlName, parent: &Namespace, kind: OutputKind) -> QName {
    match &name.namespace {
        Some(uri) => {
            let prefix = match &name.prefix {
                Some(prefix) => prefix.clone(),
                None if *uri == parent.uri => parent.prefix.clone(),
                None => String::new(),
            };
            QName::new(uri.clone(), name.local.clone(), prefix)
        }
        None if kind == OutputKind::Attribute => QName::local(name.local.clone()),
        None => QName::in_namespace(parent, name.local.clone()),
    }
}

/// Decisions about XML shape, consulted while descriptors are built and values are coded.
pub trait XmlSerializationPolicy: Send + Sync {
    /// Output kind for a type with no annotation forcing one.
    fn default_output_kind(&self, kind: &TypeKind) -> OutputKind {
        match kind {
            TypeKind::Primitive(_) | TypeKind::Enum(_) => OutputKind::Attribute,
            _ => OutputKind::Element,
        }
    }

    fn effective_output_kind(&self, site: &UseSite<'_>) -> Result<OutputKind> {
        let kind = &site.type_desc.kind;
        match site.role {
            UseRole::Root | UseRole::ListItem | UseRole::PolyChild => {
                return Ok(OutputKind::Element);
            }
            UseRole::MapKey => return Ok(OutputKind::Attribute),
            UseRole::Field | UseRole::MapValue => {}
        }

        if site.is_value_child() {
            if kind.is_primitive_like() || is_primitive_list(kind) {
                return Ok(OutputKind::Text);
            }
            self.invalid_output_kind(
                site,
                &format!("`{}` cannot hold text content", site.use_name),
            )?;
            return Ok(OutputKind::Element);
        }
        if site.is_other_attributes() {
            return Ok(OutputKind::Attribute);
        }

        let forced = site
            .use_annotation(element_flag)
            .or_else(|| site.type_annotation(element_flag));
        match kind {
            TypeKind::Primitive(_) | TypeKind::Enum(_) => Ok(match forced {
                Some(true) => OutputKind::Element,
                Some(false) => OutputKind::Attribute,
                None if self.is_cdata(site) => OutputKind::Element,
                None => self.default_output_kind(kind),
            }),
            TypeKind::List(_) if forced == Some(false) => {
                if is_primitive_list(kind) {
                    Ok(OutputKind::Attribute)
                } else {
                    self.invalid_output_kind(
                        site,
                        &format!("list `{}` of non-primitive items as attribute", site.use_name),
                    )?;
                    Ok(OutputKind::Element)
                }
            }
            _ => {
                if forced == Some(false) {
                    self.invalid_output_kind(
                        site,
                        &format!("structured value `{}` as attribute", site.use_name),
                    )?;
                }
                Ok(OutputKind::Element)
            }
        }
    }

    fn effective_name(&self, site: &UseSite<'_>, kind: OutputKind) -> QName {
        if let Some(name) = site.use_annotation(|a| serial_name(a).cloned()) {
            return annotated_qname(&name, site.parent_namespace, kind);
        }
        if kind == OutputKind::Attribute {
            return QName::local(site.use_name);
        }
        let type_named = matches!(
            site.type_desc.kind,
            TypeKind::Class | TypeKind::Object | TypeKind::Enum(_) | TypeKind::PolymorphicSealed(_)
        );
        if type_named {
            if let Some(name) = site.type_annotation(|a| serial_name(a).cloned()) {
                return annotated_qname(&name, site.parent_namespace, kind);
            }
        }
        if let Some(inherited) = site.inherited_name {
            return inherited.clone();
        }
        match site.role {
            UseRole::Root | UseRole::PolyChild => {
                QName::in_namespace(site.parent_namespace, simple_name(site.use_name))
            }
            _ => QName::in_namespace(site.parent_namespace, site.use_name),
        }
    }

    /// Whether text content of this use is written as CDATA.
    fn is_cdata(&self, site: &UseSite<'_>) -> bool {
        let cdata = |a: &XmlAnnotation| matches!(a, XmlAnnotation::CData).then_some(());
        site.use_annotation(cdata)
            .or_else(|| site.type_annotation(cdata))
            .is_some()
    }

    /// Lists and maps without a children name are written without a wrapper element.
    fn is_list_elided(&self, site: &UseSite<'_>) -> bool {
        site.role != UseRole::Root && self.children_name(site).is_none()
    }

    fn children_name(&self, site: &UseSite<'_>) -> Option<XmlName> {
        site.use_annotation(|a| match a {
            XmlAnnotation::ChildrenName(name) => Some(name.clone()),
            _ => None,
        })
    }

    fn is_transparent_polymorphic(&self, site: &UseSite<'_>, auto_polymorphic: bool) -> bool {
        auto_polymorphic
            || site
                .use_annotations
                .iter()
                .any(|a| matches!(a, XmlAnnotation::PolyChildren(_)))
    }

    /// Explicit `Variant=tag` pairs from a `PolyChildren` annotation.
    fn poly_children(&self, site: &UseSite<'_>) -> Vec<(String, Option<String>)> {
        site.use_annotation(|a| match a {
            XmlAnnotation::PolyChildren(entries) => Some(entries.clone()),
            _ => None,
        })
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            Some((variant, tag)) => (variant.trim().to_string(), Some(tag.trim().to_string())),
            None => (entry.trim().to_string(), None),
        })
        .collect()
    }

    fn polymorphic_discriminator_name(&self, _site: &UseSite<'_>) -> QName {
        QName::local("type")
    }

    fn map_key_name(&self, site: &UseSite<'_>) -> QName {
        let local = site
            .use_annotation(|a| match a {
                XmlAnnotation::KeyName(name) => Some(name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "key".to_string());
        QName::local(local)
    }

    fn map_value_name(&self, _site: &UseSite<'_>) -> QName {
        QName::local("value")
    }

    /// Entry tag inside a wrapped map; elided maps repeat the field name instead.
    fn map_entry_name(&self, site: &UseSite<'_>) -> QName {
        QName::in_namespace(site.parent_namespace, "entry")
    }

    /// Text used for an enum variant.
    fn enum_encoding(&self, _type_desc: &TypeDescriptor, variant: &str) -> String {
        variant.to_string()
    }

    fn element_namespace_decls(&self, site: &UseSite<'_>) -> Vec<Namespace> {
        site.type_annotation(|a| match a {
            XmlAnnotation::NamespaceDecls(decls) => Some(decls.clone()),
            _ => None,
        })
        .unwrap_or_default()
    }

    /// Ordering constraints among the fields of a class, from `Before`/`After` annotations.
    fn order_constraints(&self, type_desc: &TypeDescriptor) -> Result<Vec<OrderConstraint>> {
        let lookup = |name: &str| -> Result<ChildRef> {
            if name == "*" {
                return Ok(ChildRef::Others);
            }
            type_desc
                .elements
                .iter()
                .position(|e| e.name == name)
                .map(ChildRef::Child)
                .ok_or_else(|| {
                    XmlError::defect(
                        &type_desc.serial_name,
                        format!("ordering refers to unknown field `{}`", name),
                    )
                })
        };

        let mut constraints = Vec::new();
        for (idx, element) in type_desc.elements.iter().enumerate() {
            for annotation in &element.annotations {
                match annotation {
                    XmlAnnotation::Before(names) => {
                        for name in names {
                            constraints.push(OrderConstraint {
                                before: ChildRef::Child(idx),
                                after: lookup(name)?,
                            });
                        }
                    }
                    XmlAnnotation::After(names) => {
                        for name in names {
                            constraints.push(OrderConstraint {
                                before: lookup(name)?,
                                after: ChildRef::Child(idx),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(constraints)
    }

    fn should_encode_element_default(&self, desc: &XmlDescriptor, mode: EncodeDefault) -> bool {
        match mode {
            EncodeDefault::Always => true,
            EncodeDefault::Never => false,
            EncodeDefault::NonNull => desc.nullable,
        }
    }

    /// Called when a non-list child element appears a second time.
    fn on_element_repeated(&self, parent: &QName, child: &QName) -> Result<()> {
        Err(XmlError::malformed(format!(
            "element `{}` repeated inside `{}`",
            child, parent
        )))
    }

    /// Called for content the decoder could not map to any field. The default applies the
    /// configured [`UnknownContentPolicy`].
    fn handle_unknown_content(
        &self,
        configured: &UnknownContentPolicy,
        kind: InputKind,
        parent: &QName,
        name: &QName,
        candidates: Vec<QName>,
    ) -> Result<()> {
        configured.apply(kind, parent, name, candidates)
    }

    /// Impossible annotations are configuration defects instead of warnings.
    fn is_pedantic(&self) -> bool {
        false
    }

    /// Called when annotations ask for an impossible output kind.
    fn invalid_output_kind(&self, site: &UseSite<'_>, message: &str) -> Result<()> {
        if self.is_pedantic() {
            return Err(XmlError::defect(site.parent_type, message));
        }
        tracing::warn!(
            parent = site.parent_type,
            field = site.use_name,
            "{}; using an element instead",
            message
        );
        Ok(())
    }
}

fn is_primitive_list(kind: &TypeKind) -> bool {
    match kind {
        TypeKind::List(item) => item.resolve().kind.is_primitive_like(),
        _ => false,
    }
}

/// Standard resolution rules.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    /// Fail on impossible annotations instead of falling back to an element.
    pub pedantic: bool,
}

impl DefaultPolicy {
    pub fn pedantic() -> Self {
        DefaultPolicy { pedantic: true }
    }
}

impl XmlSerializationPolicy for DefaultPolicy {
    fn is_pedantic(&self) -> bool {
        self.pedantic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TypeRef, XmlSchema};

    fn site<'a>(
        role: UseRole,
        name: &'a str,
        annotations: &'a [XmlAnnotation],
        type_desc: &'a TypeDescriptor,
        parent: &'a Namespace,
    ) -> UseSite<'a> {
        UseSite {
            role,
            use_name: name,
            use_annotations: annotations,
            type_desc,
            parent_type: "Parent",
            parent_namespace: parent,
            inherited_name: None,
        }
    }

    #[test]
    fn test_primitive_defaults_to_attribute() -> Result<()> {
        let policy = DefaultPolicy::default();
        let ty = String::type_descriptor();
        let parent = Namespace::none();
        let s = site(UseRole::Field, "name", &[], &ty, &parent);
        assert_eq!(policy.effective_output_kind(&s)?, OutputKind::Attribute);

        let forced = [XmlAnnotation::Element(true)];
        let s = site(UseRole::Field, "name", &forced, &ty, &parent);
        assert_eq!(policy.effective_output_kind(&s)?, OutputKind::Element);

        let value = [XmlAnnotation::Value];
        let s = site(UseRole::Field, "name", &value, &ty, &parent);
        assert_eq!(policy.effective_output_kind(&s)?, OutputKind::Text);

        let cdata = [XmlAnnotation::CData];
        let s = site(UseRole::Field, "name", &cdata, &ty, &parent);
        assert!(policy.is_cdata(&s));
        assert_eq!(policy.effective_output_kind(&s)?, OutputKind::Element);

        let cdata_attribute = [XmlAnnotation::CData, XmlAnnotation::Element(false)];
        let s = site(UseRole::Field, "name", &cdata_attribute, &ty, &parent);
        assert_eq!(policy.effective_output_kind(&s)?, OutputKind::Attribute);
        Ok(())
    }

    #[test]
    fn test_composite_as_attribute_is_lenient_or_pedantic() {
        let ty = TypeDescriptor::class("Address").field("city", TypeRef::of::<String>());
        let parent = Namespace::none();
        let forced = [XmlAnnotation::Element(false)];
        let s = site(UseRole::Field, "home", &forced, &ty, &parent);

        let lenient = DefaultPolicy::default().effective_output_kind(&s);
        assert_eq!(lenient.ok(), Some(OutputKind::Element));

        let strict = DefaultPolicy::pedantic().effective_output_kind(&s);
        assert!(matches!(strict, Err(XmlError::ConfigurationDefect { .. })));
    }

    #[test]
    fn test_element_names_inherit_parent_namespace() {
        let policy = DefaultPolicy::default();
        let ty = String::type_descriptor();
        let parent = Namespace::new("ns", "urn:food");

        let s = site(UseRole::Field, "name", &[], &ty, &parent);
        let element = policy.effective_name(&s, OutputKind::Element);
        assert_eq!(element, QName::new("urn:food", "name", "ns"));
        assert_eq!(element.prefix, "ns");

        let attribute = policy.effective_name(&s, OutputKind::Attribute);
        assert_eq!(attribute, QName::local("name"));

        let annotated = [XmlAnnotation::SerialName(
            XmlName::new("name").namespace("").prefix(""),
        )];
        let s = site(UseRole::Field, "name", &annotated, &ty, &parent);
        assert_eq!(
            policy.effective_name(&s, OutputKind::Element),
            QName::local("name")
        );
    }

    #[test]
    fn test_class_annotation_overrides_field_name() {
        let policy = DefaultPolicy::default();
        let ty = TypeDescriptor::class("Address")
            .annotate(XmlAnnotation::SerialName(XmlName::new("addr")));
        let parent = Namespace::none();
        let s = site(UseRole::Field, "home", &[], &ty, &parent);
        assert_eq!(
            policy.effective_name(&s, OutputKind::Element),
            QName::local("addr")
        );
    }

    #[test]
    fn test_poly_children_parsing() {
        let policy = DefaultPolicy::default();
        let ty = TypeDescriptor::sealed("Shape");
        let parent = Namespace::none();
        let annotations = [XmlAnnotation::PolyChildren(vec![
            "Circle=round".to_string(),
            "Square".to_string(),
        ])];
        let s = site(UseRole::Field, "shape", &annotations, &ty, &parent);
        assert!(policy.is_transparent_polymorphic(&s, false));
        assert_eq!(
            policy.poly_children(&s),
            vec![
                ("Circle".to_string(), Some("round".to_string())),
                ("Square".to_string(), None)
            ]
        );
    }

    #[test]
    fn test_order_constraints_reject_unknown_field() {
        let ty = TypeDescriptor::class("Ordered").element(
            crate::schema::ElementInfo::new("a", TypeRef::of::<String>())
                .annotate(XmlAnnotation::Before(vec!["missing".to_string()])),
        );
        let result = DefaultPolicy::default().order_constraints(&ty);
        assert!(matches!(result, Err(XmlError::ConfigurationDefect { .. })));
    }
}
