//! Builds [`DescriptorTree`]s from type descriptions.
//!
//! Building runs in two passes. The first walks the type description depth first, asks the
//! policy for every decision and memoizes each (type, use site) pair so recursive types
//! resolve to a shared node. Later passes run once every node exists: they copy each
//! subtype's tag into its polymorphic parent, then fill the name lookup tables of every
//! composite and reject name collisions.

use std::collections::HashMap;

use crate::config::XmlConfig;
use crate::descriptor::order::resolve_constraints;
use crate::descriptor::{
    ChildDescriptor, CompositeInfo, DescriptorId, DescriptorKind, DescriptorTree, ListInfo,
    MapInfo, OrderMatrix, OutputKind, PolyInfo, PolymorphicInfo, XmlDescriptor,
};
use crate::error::{Result, XmlError};
use crate::name::{Namespace, QName};
use crate::policy::{UseRole, UseSite, XmlSerializationPolicy, annotated_qname};
use crate::schema::{Subtype, TypeDescriptor, TypeIdentity, TypeKind, XmlAnnotation, XmlName};

/// Builds the descriptor tree for `root`. `root_name` overrides the resolved root tag.
pub fn build_tree(
    root: &TypeDescriptor,
    config: &XmlConfig,
    root_name: Option<&QName>,
) -> Result<DescriptorTree> {
    let mut builder = Builder {
        config,
        policy: config.policy.as_ref(),
        nodes: Vec::new(),
        memo: HashMap::new(),
    };

    let annotations = root_name
        .map(|name| {
            vec![XmlAnnotation::SerialName(
                XmlName::new(name.local.clone())
                    .namespace(name.namespace.clone())
                    .prefix(name.prefix.clone()),
            )]
        })
        .unwrap_or_default();
    let root_id = builder.resolve(UseSpec {
        role: UseRole::Root,
        use_name: root.serial_name.clone(),
        annotations,
        type_desc: root.clone(),
        parent_type: root.serial_name.clone(),
        parent_ns: Namespace::none(),
        inherited: None,
        optional: false,
    })?;

    let mut nodes = Vec::with_capacity(builder.nodes.len());
    for (idx, node) in builder.nodes.into_iter().enumerate() {
        match node {
            Some(node) if node.output_kind != OutputKind::Unknown => nodes.push(node),
            Some(node) => {
                return Err(XmlError::defect(
                    node.type_name,
                    "output kind left unresolved",
                ));
            }
            None => {
                return Err(XmlError::defect(
                    &root.serial_name,
                    format!("descriptor {} was never completed", idx),
                ));
            }
        }
    }

    let mut tree = DescriptorTree {
        nodes,
        root: root_id,
    };
    resolve_subtype_tags(&mut tree);
    check_discriminators(&tree)?;
    fill_name_tables(&mut tree)?;
    tracing::debug!(
        type_name = %root.serial_name,
        nodes = tree.len(),
        "built XML descriptor tree"
    );
    Ok(tree)
}

/// One use of a type, owned so recursion does not borrow the builder.
struct UseSpec {
    role: UseRole,
    use_name: String,
    annotations: Vec<XmlAnnotation>,
    type_desc: TypeDescriptor,
    parent_type: String,
    parent_ns: Namespace,
    inherited: Option<QName>,
    optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BuildKey {
    type_name: String,
    identity: Option<TypeIdentity>,
    nullable: bool,
    role: UseRole,
    use_name: String,
    annotations: Vec<XmlAnnotation>,
    parent_ns: Namespace,
    inherited: Option<(String, String, String)>,
    optional: bool,
}

impl BuildKey {
    fn new(spec: &UseSpec, type_desc: &TypeDescriptor) -> Self {
        BuildKey {
            type_name: type_desc.serial_name.clone(),
            identity: type_desc.identity,
            nullable: type_desc.nullable,
            role: spec.role,
            use_name: spec.use_name.clone(),
            annotations: spec.annotations.clone(),
            parent_ns: spec.parent_ns.clone(),
            inherited: spec
                .inherited
                .as_ref()
                .map(|q| (q.namespace.clone(), q.local.clone(), q.prefix.clone())),
            optional: spec.optional,
        }
    }
}

struct Builder<'c> {
    config: &'c XmlConfig,
    policy: &'c dyn XmlSerializationPolicy,
    nodes: Vec<Option<XmlDescriptor>>,
    memo: HashMap<BuildKey, DescriptorId>,
}

impl Builder<'_> {
    fn resolve_contextual(&self, type_desc: TypeDescriptor) -> Result<TypeDescriptor> {
        if !matches!(type_desc.kind, TypeKind::Contextual) {
            return Ok(type_desc);
        }
        let target = self
            .config
            .registry
            .contextual(&type_desc.serial_name)
            .ok_or_else(|| {
                XmlError::defect(
                    &type_desc.serial_name,
                    "no contextual type registered",
                )
            })?
            .resolve();
        if matches!(target.kind, TypeKind::Contextual) {
            return Err(XmlError::defect(
                &type_desc.serial_name,
                "contextual type resolves to another contextual type",
            ));
        }
        let mut resolved = target;
        resolved.nullable |= type_desc.nullable;
        resolved.annotations.extend(type_desc.annotations);
        Ok(resolved)
    }

    fn resolve(&mut self, spec: UseSpec) -> Result<DescriptorId> {
        let type_desc = self.resolve_contextual(spec.type_desc.clone())?;
        let key = BuildKey::new(&spec, &type_desc);
        if let Some(&id) = self.memo.get(&key) {
            return Ok(id);
        }

        let site = UseSite {
            role: spec.role,
            use_name: &spec.use_name,
            use_annotations: &spec.annotations,
            type_desc: &type_desc,
            parent_type: &spec.parent_type,
            parent_namespace: &spec.parent_ns,
            inherited_name: spec.inherited.as_ref(),
        };
        let output_kind = self.policy.effective_output_kind(&site)?;
        let tag_name = self.policy.effective_name(&site, output_kind);
        if output_kind != OutputKind::Text && !tag_name.is_valid_local() {
            return Err(XmlError::defect(
                &spec.parent_type,
                format!("`{}` is not a valid XML name for `{}`", tag_name.local, spec.use_name),
            ));
        }
        let namespace_decls = self.policy.element_namespace_decls(&site);
        let cdata = self.policy.is_cdata(&site);
        let default = spec.annotations.iter().find_map(|a| match a {
            XmlAnnotation::Default(value) => Some(value.clone()),
            _ => None,
        });

        let id = DescriptorId(self.nodes.len());
        self.nodes.push(None);
        self.memo.insert(key, id);

        let kind = match &type_desc.kind {
            TypeKind::Primitive(p) => DescriptorKind::Primitive(*p),
            TypeKind::Enum(variants) => DescriptorKind::Enum(
                variants
                    .iter()
                    .map(|v| (v.clone(), self.policy.enum_encoding(&type_desc, v)))
                    .collect(),
            ),
            TypeKind::Object => DescriptorKind::Object,
            TypeKind::Class => {
                DescriptorKind::Composite(self.build_composite(&type_desc, &tag_name)?)
            }
            TypeKind::List(item) => {
                let elided = output_kind == OutputKind::Element && self.policy.is_list_elided(&site);
                let children_name = self.policy.children_name(&site);
                let item_desc = item.resolve();
                let (use_name, inherited) = if elided {
                    (spec.use_name.clone(), Some(tag_name.clone()))
                } else {
                    let inherited = children_name
                        .map(|n| annotated_qname(&n, &tag_name.namespace(), OutputKind::Element));
                    (item_desc.simple_name().to_string(), inherited)
                };
                let item = self.resolve(UseSpec {
                    role: UseRole::ListItem,
                    use_name,
                    annotations: forwarded_item_annotations(&spec.annotations),
                    type_desc: item_desc,
                    parent_type: type_desc.serial_name.clone(),
                    parent_ns: tag_name.namespace(),
                    inherited,
                    optional: false,
                })?;
                DescriptorKind::List(ListInfo { item, elided })
            }
            TypeKind::Map(key_ref, value_ref) => {
                let elided = self.policy.is_list_elided(&site);
                let key_name = self.policy.map_key_name(&site);
                let value_name = self.policy.map_value_name(&site);
                let entry_name = if elided {
                    tag_name.clone()
                } else {
                    self.policy
                        .children_name(&site)
                        .map(|n| annotated_qname(&n, &tag_name.namespace(), OutputKind::Element))
                        .unwrap_or_else(|| self.policy.map_entry_name(&site))
                };
                let key_desc = key_ref.resolve();
                if !key_desc.kind.is_primitive_like() {
                    return Err(XmlError::defect(
                        &type_desc.serial_name,
                        "map keys must be primitive values",
                    ));
                }
                let key = self.resolve(UseSpec {
                    role: UseRole::MapKey,
                    use_name: key_name.local.clone(),
                    annotations: Vec::new(),
                    type_desc: key_desc,
                    parent_type: type_desc.serial_name.clone(),
                    parent_ns: entry_name.namespace(),
                    inherited: None,
                    optional: false,
                })?;
                let value = self.resolve(UseSpec {
                    role: UseRole::MapValue,
                    use_name: value_name.local.clone(),
                    annotations: Vec::new(),
                    type_desc: value_ref.resolve(),
                    parent_type: type_desc.serial_name.clone(),
                    parent_ns: entry_name.namespace(),
                    inherited: None,
                    optional: false,
                })?;
                DescriptorKind::Map(MapInfo {
                    key,
                    value,
                    key_name,
                    entry_name,
                    elided,
                })
            }
            TypeKind::PolymorphicSealed(_) | TypeKind::PolymorphicOpen => {
                let subtypes: Vec<Subtype> = match &type_desc.kind {
                    TypeKind::PolymorphicSealed(subtypes) => subtypes.clone(),
                    _ => self.config.registry.subtypes(&type_desc.serial_name).to_vec(),
                };
                let transparent = self
                    .policy
                    .is_transparent_polymorphic(&site, self.config.auto_polymorphic);
                let discriminator = self.policy.polymorphic_discriminator_name(&site);
                let explicit = self.policy.poly_children(&site);
                for (variant, _) in &explicit {
                    if !subtypes.iter().any(|s| s.variant == *variant) {
                        return Err(XmlError::defect(
                            &type_desc.serial_name,
                            format!("`{}` is not a subtype", variant),
                        ));
                    }
                }
                if subtypes.is_empty() {
                    tracing::debug!(
                        type_name = %type_desc.serial_name,
                        "polymorphic type without registered subtypes"
                    );
                }

                let mut infos = Vec::with_capacity(subtypes.len());
                for subtype in subtypes {
                    let sub_desc = subtype.type_ref.resolve();
                    let explicit_tag = explicit
                        .iter()
                        .find(|(variant, _)| *variant == subtype.variant)
                        .and_then(|(_, tag)| tag.clone());
                    let (parent_ns, inherited) = if transparent {
                        (spec.parent_ns.clone(), None)
                    } else {
                        (tag_name.namespace(), Some(tag_name.clone()))
                    };
                    let annotations = explicit_tag
                        .as_ref()
                        .map(|tag| vec![XmlAnnotation::SerialName(XmlName::new(tag.clone()))])
                        .unwrap_or_default();
                    let descriptor = self.resolve(UseSpec {
                        role: UseRole::PolyChild,
                        use_name: sub_desc.serial_name.clone(),
                        annotations,
                        type_desc: sub_desc,
                        parent_type: type_desc.serial_name.clone(),
                        parent_ns,
                        inherited,
                        optional: false,
                    })?;
                    infos.push(PolyInfo {
                        type_name: subtype.variant,
                        // Filled from the finished subtype node by `resolve_subtype_tags`.
                        tag_name: tag_name.clone(),
                        explicit: explicit_tag.is_some(),
                        descriptor,
                    });
                }
                DescriptorKind::Polymorphic(PolymorphicInfo {
                    transparent,
                    discriminator,
                    subtypes: infos,
                })
            }
            TypeKind::Contextual => {
                return Err(XmlError::defect(
                    &type_desc.serial_name,
                    "unresolved contextual type",
                ));
            }
        };

        if default.is_some() && !matches!(kind, DescriptorKind::Primitive(_) | DescriptorKind::Enum(_)) {
            return Err(XmlError::defect(
                &spec.parent_type,
                format!("default on non-primitive field `{}`", spec.use_name),
            ));
        }

        self.nodes[id.0] = Some(XmlDescriptor {
            type_name: type_desc.serial_name.clone(),
            use_name: spec.use_name,
            tag_name,
            output_kind,
            nullable: type_desc.nullable,
            default,
            optional: spec.optional,
            cdata,
            namespace_decls,
            kind,
        });
        Ok(id)
    }

    fn output_kind_of(&self, id: DescriptorId) -> OutputKind {
        self.nodes[id.0]
            .as_ref()
            .map(|d| d.output_kind)
            .unwrap_or(OutputKind::Element)
    }

    fn build_composite(
        &mut self,
        type_desc: &TypeDescriptor,
        tag_name: &QName,
    ) -> Result<CompositeInfo> {
        let mut children = Vec::with_capacity(type_desc.elements.len());
        let mut value_child = None;
        let mut other_attributes = None;

        for (idx, element) in type_desc.elements.iter().enumerate() {
            let is_other = element
                .annotations
                .iter()
                .any(|a| matches!(a, XmlAnnotation::OtherAttributes));
            let descriptor = self.resolve(UseSpec {
                role: UseRole::Field,
                use_name: element.name.clone(),
                annotations: element.annotations.clone(),
                type_desc: element.type_ref.resolve(),
                parent_type: type_desc.serial_name.clone(),
                parent_ns: tag_name.namespace(),
                inherited: None,
                optional: element.optional,
            })?;

            if self.output_kind_of(descriptor) == OutputKind::Text {
                if value_child.replace(idx).is_some() {
                    return Err(XmlError::defect(
                        &type_desc.serial_name,
                        "more than one field holds text content",
                    ));
                }
            }
            if is_other {
                let is_map = self.nodes[descriptor.0]
                    .as_ref()
                    .map(|d| matches!(d.kind, DescriptorKind::Map(_)))
                    .unwrap_or(false);
                if !is_map || other_attributes.replace(idx).is_some() {
                    return Err(XmlError::defect(
                        &type_desc.serial_name,
                        format!("`{}` cannot collect other attributes", element.name),
                    ));
                }
            }
            children.push(ChildDescriptor {
                name: element.name.clone(),
                descriptor,
            });
        }

        let partition: Vec<u8> = children
            .iter()
            .map(|c| match self.output_kind_of(c.descriptor) {
                OutputKind::Attribute => 0,
                _ => 1,
            })
            .collect();
        let constraints = self.policy.order_constraints(type_desc)?;
        let order: OrderMatrix = resolve_constraints(children.len(), &constraints, &partition)
            .map_err(|cycle| {
                XmlError::defect(
                    &type_desc.serial_name,
                    format!(
                        "ordering cycle between `{}` and `{}`",
                        type_desc.elements[cycle.first].name,
                        type_desc.elements[cycle.second].name
                    ),
                )
            })?;
        let mut ranks = vec![0; children.len()];
        for (rank, child) in order.canonical_order(&partition).into_iter().enumerate() {
            ranks[child] = rank;
        }

        Ok(CompositeInfo {
            children,
            value_child,
            other_attributes,
            order,
            ranks,
            attribute_names: HashMap::new(),
            element_names: HashMap::new(),
            poly_names: HashMap::new(),
        })
    }
}

/// Annotations of a list field that also describe its items.
fn forwarded_item_annotations(annotations: &[XmlAnnotation]) -> Vec<XmlAnnotation> {
    annotations
        .iter()
        .filter(|a| matches!(a, XmlAnnotation::PolyChildren(_) | XmlAnnotation::CData))
        .cloned()
        .collect()
}

/// Copies each subtype's tag into its [`PolyInfo`]. Recursive hierarchies reach a subtype
/// while it is still being built, so this waits until every node is complete.
fn resolve_subtype_tags(tree: &mut DescriptorTree) {
    for idx in 0..tree.nodes.len() {
        let tags: Vec<QName> = match &tree.nodes[idx].kind {
            DescriptorKind::Polymorphic(poly) => poly
                .subtypes
                .iter()
                .map(|sub| tree.get(sub.descriptor).tag_name.clone())
                .collect(),
            _ => continue,
        };
        if let DescriptorKind::Polymorphic(poly) = &mut tree.nodes[idx].kind {
            for (sub, tag) in poly.subtypes.iter_mut().zip(tags) {
                sub.tag_name = tag;
            }
        }
    }
}

/// Tagged subtypes share their element with the discriminator attribute.
fn check_discriminators(tree: &DescriptorTree) -> Result<()> {
    for node in &tree.nodes {
        let DescriptorKind::Polymorphic(poly) = &node.kind else {
            continue;
        };
        if poly.transparent {
            continue;
        }
        for sub in &poly.subtypes {
            let sub_desc = tree.get(sub.descriptor);
            let Some(info) = sub_desc.composite() else {
                continue;
            };
            let clash = info.children.iter().enumerate().find(|(idx, child)| {
                let child_desc = tree.get(child.descriptor);
                info.other_attributes != Some(*idx)
                    && child_desc.output_kind == OutputKind::Attribute
                    && child_desc.tag_name == poly.discriminator
            });
            if let Some((_, child)) = clash {
                return Err(XmlError::defect(
                    &sub_desc.type_name,
                    format!(
                        "attribute `{}` clashes with the `{}` discriminator of `{}`",
                        child.name, poly.discriminator, node.type_name
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn fill_name_tables(tree: &mut DescriptorTree) -> Result<()> {
    for idx in 0..tree.nodes.len() {
        let Some(info) = tree.nodes[idx].composite() else {
            continue;
        };
        let type_name = tree.nodes[idx].type_name.clone();
        let mut attribute_names = HashMap::new();
        let mut element_names = HashMap::new();
        let mut poly_names = HashMap::new();

        let duplicate = |name: &QName| {
            XmlError::defect(&type_name, format!("two fields resolve to `{}`", name))
        };

        for (child_idx, child) in info.children.iter().enumerate() {
            if info.other_attributes == Some(child_idx) {
                continue;
            }
            let desc = tree.get(child.descriptor);
            match desc.output_kind {
                OutputKind::Attribute => {
                    if attribute_names
                        .insert(desc.tag_name.clone(), child_idx)
                        .is_some()
                    {
                        return Err(duplicate(&desc.tag_name));
                    }
                }
                OutputKind::Text | OutputKind::Unknown => {}
                OutputKind::Element => {
                    let mut element_tags = Vec::new();
                    let mut poly_tags = Vec::new();
                    match &desc.kind {
                        DescriptorKind::List(list) if list.elided => {
                            let item = tree.get(list.item);
                            match &item.kind {
                                DescriptorKind::Polymorphic(poly) if poly.transparent => {
                                    poly_tags.extend(poly.subtypes.iter().map(|p| p.tag_name.clone()));
                                }
                                _ => element_tags.push(item.tag_name.clone()),
                            }
                        }
                        DescriptorKind::Map(map) if map.elided => {
                            element_tags.push(map.entry_name.clone());
                        }
                        DescriptorKind::Polymorphic(poly) if poly.transparent => {
                            poly_tags.extend(poly.subtypes.iter().map(|p| p.tag_name.clone()));
                        }
                        _ => element_tags.push(desc.tag_name.clone()),
                    }
                    for tag in element_tags {
                        if poly_names.contains_key(&tag)
                            || element_names.insert(tag.clone(), child_idx).is_some()
                        {
                            return Err(duplicate(&tag));
                        }
                    }
                    for (sub_idx, tag) in poly_tags.into_iter().enumerate() {
                        if element_names.contains_key(&tag)
                            || poly_names.insert(tag.clone(), (child_idx, sub_idx)).is_some()
                        {
                            return Err(duplicate(&tag));
                        }
                    }
                }
            }
        }

        if let DescriptorKind::Composite(info) = &mut tree.nodes[idx].kind {
            info.attribute_names = attribute_names;
            info.element_names = element_names;
            info.poly_names = poly_names;
        }
    }
    Ok(())
}
