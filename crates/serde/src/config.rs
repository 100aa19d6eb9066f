//! Codec configuration.

use std::fmt;
use std::sync::Arc;

use crate::error::{InputKind, Result, XmlError};
use crate::name::QName;
use crate::policy::{DefaultPolicy, XmlSerializationPolicy};
use crate::schema::SubtypeRegistry;

/// When a field whose value equals its declared default is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodeDefault {
    /// Always write the value.
    Always,
    /// Never write a value equal to the declared default.
    #[default]
    Never,
    /// Elide default-equal values only on fields that are not nullable.
    NonNull,
}

/// Receives content the decoder could not map to a field.
pub trait UnknownContentHandler: Send + Sync {
    /// Returning `Ok(())` skips the content; an error aborts decoding.
    fn handle(
        &self,
        kind: InputKind,
        parent: &QName,
        name: &QName,
        candidates: &[QName],
    ) -> Result<()>;
}

/// What the decoder does with elements, attributes or text that match no field.
///
/// Namespace-relaxed matching (see [`XmlConfig::strict_names`]) is attempted before this
/// policy applies.
#[derive(Clone, Default)]
pub enum UnknownContentPolicy {
    #[default]
    Fail,
    Ignore,
    Handler(Arc<dyn UnknownContentHandler>),
}

impl fmt::Debug for UnknownContentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownContentPolicy::Fail => f.write_str("Fail"),
            UnknownContentPolicy::Ignore => f.write_str("Ignore"),
            UnknownContentPolicy::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

impl UnknownContentPolicy {
    /// Skips, rejects or hands off content that matched no field.
    pub fn apply(
        &self,
        kind: InputKind,
        parent: &QName,
        name: &QName,
        candidates: Vec<QName>,
    ) -> Result<()> {
        match self {
            UnknownContentPolicy::Fail => Err(XmlError::UnknownContent {
                kind,
                name: name.clone(),
                candidates,
            }),
            UnknownContentPolicy::Ignore => {
                tracing::debug!(%kind, %name, %parent, "skipping unknown content");
                Ok(())
            }
            UnknownContentPolicy::Handler(handler) => {
                handler.handle(kind, parent, name, &candidates)
            }
        }
    }
}

/// Settings shared by the encoder, the decoder and the descriptor builder.
#[derive(Clone)]
pub struct XmlConfig {
    /// Reallocate prefixes that collide on one element instead of failing.
    pub repair_namespaces: bool,
    pub encode_default: EncodeDefault,
    /// Disable namespace-relaxed matching of element names.
    pub strict_names: bool,
    /// Disable namespace-relaxed matching of attribute names.
    pub strict_attribute_names: bool,
    /// Accept only `true` and `false` for booleans.
    pub strict_boolean: bool,
    /// Treat every polymorphic field as transparent.
    pub auto_polymorphic: bool,
    /// Indentation width; `None` writes everything on one line.
    pub indent: Option<usize>,
    pub xml_declaration: bool,
    /// Hoist every prefixed namespace used in the document to the root element.
    pub collect_namespaces: bool,
    pub verify_element_order: bool,
    pub unknown_content: UnknownContentPolicy,
    pub cache_capacity: usize,
    pub registry: SubtypeRegistry,
    pub policy: Arc<dyn XmlSerializationPolicy>,
}

impl fmt::Debug for XmlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlConfig")
            .field("repair_namespaces", &self.repair_namespaces)
            .field("encode_default", &self.encode_default)
            .field("strict_names", &self.strict_names)
            .field("strict_attribute_names", &self.strict_attribute_names)
            .field("strict_boolean", &self.strict_boolean)
            .field("auto_polymorphic", &self.auto_polymorphic)
            .field("indent", &self.indent)
            .field("xml_declaration", &self.xml_declaration)
            .field("collect_namespaces", &self.collect_namespaces)
            .field("verify_element_order", &self.verify_element_order)
            .field("unknown_content", &self.unknown_content)
            .field("cache_capacity", &self.cache_capacity)
            .finish_non_exhaustive()
    }
}

impl Default for XmlConfig {
    fn default() -> Self {
        XmlConfig {
            repair_namespaces: true,
            encode_default: EncodeDefault::default(),
            strict_names: false,
            strict_attribute_names: false,
            strict_boolean: false,
            auto_polymorphic: false,
            indent: None,
            xml_declaration: false,
            collect_namespaces: false,
            verify_element_order: false,
            unknown_content: UnknownContentPolicy::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            registry: SubtypeRegistry::default(),
            policy: Arc::new(DefaultPolicy::default()),
        }
    }
}

pub const DEFAULT_CACHE_CAPACITY: usize = 128;

impl XmlConfig {
    pub fn builder() -> XmlConfigBuilder {
        XmlConfigBuilder::default()
    }
}

/// Builder for [`XmlConfig`].
#[derive(Debug, Clone, Default)]
pub struct XmlConfigBuilder {
    config: XmlConfig,
}

impl XmlConfigBuilder {
    pub fn repair_namespaces(mut self, repair: bool) -> Self {
        self.config.repair_namespaces = repair;
        self
    }

    pub fn encode_default(mut self, mode: EncodeDefault) -> Self {
        self.config.encode_default = mode;
        self
    }

    pub fn strict_names(mut self, strict: bool) -> Self {
        self.config.strict_names = strict;
        self
    }

    pub fn strict_attribute_names(mut self, strict: bool) -> Self {
        self.config.strict_attribute_names = strict;
        self
    }

    pub fn strict_boolean(mut self, strict: bool) -> Self {
        self.config.strict_boolean = strict;
        self
    }

    pub fn auto_polymorphic(mut self, auto: bool) -> Self {
        self.config.auto_polymorphic = auto;
        self
    }

    pub fn indent(mut self, width: usize) -> Self {
        self.config.indent = Some(width);
        self
    }

    pub fn xml_declaration(mut self, write: bool) -> Self {
        self.config.xml_declaration = write;
        self
    }

    pub fn collect_namespaces(mut self, collect: bool) -> Self {
        self.config.collect_namespaces = collect;
        self
    }

    pub fn verify_element_order(mut self, verify: bool) -> Self {
        self.config.verify_element_order = verify;
        self
    }

    pub fn unknown_content(mut self, policy: UnknownContentPolicy) -> Self {
        self.config.unknown_content = policy;
        self
    }

    /// Shorthand for [`UnknownContentPolicy::Ignore`] or [`UnknownContentPolicy::Fail`].
    pub fn ignore_unknown_content(self, ignore: bool) -> Self {
        self.unknown_content(if ignore {
            UnknownContentPolicy::Ignore
        } else {
            UnknownContentPolicy::Fail
        })
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn registry(mut self, registry: SubtypeRegistry) -> Self {
        self.config.registry = registry;
        self
    }

    pub fn policy(mut self, policy: impl XmlSerializationPolicy + 'static) -> Self {
        self.config.policy = Arc::new(policy);
        self
    }

    pub fn build(self) -> XmlConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = XmlConfig::builder()
            .indent(2)
            .encode_default(EncodeDefault::Always)
            .ignore_unknown_content(true)
            .build();
        assert_eq!(config.indent, Some(2));
        assert_eq!(config.encode_default, EncodeDefault::Always);
        assert!(matches!(config.unknown_content, UnknownContentPolicy::Ignore));
        assert!(config.repair_namespaces);
    }

    #[test]
    fn test_fail_policy_reports_candidates() {
        let err = UnknownContentPolicy::Fail
            .apply(
                InputKind::Element,
                &QName::local("parent"),
                &QName::local("bogus"),
                vec![QName::local("name")],
            )
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bogus"));
        assert!(message.contains("name"));
    }
}
