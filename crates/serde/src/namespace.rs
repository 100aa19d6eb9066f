//! Scoped prefix ↔ namespace bindings used while writing and reading documents.

use crate::error::{Result, XmlError};
use crate::name::{Namespace, QName, XML_NAMESPACE};

#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: Vec<Namespace>,
}

/// Stack of namespace scopes, one per open element.
#[derive(Debug, Clone)]
pub struct NamespaceStack {
    scopes: Vec<Scope>,
    next_auto: usize,
}

impl Default for NamespaceStack {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceStack {
    pub fn new() -> Self {
        NamespaceStack {
            scopes: vec![Scope::default()],
            next_auto: 1,
        }
    }

    /// Number of open element scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn current_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Binds `prefix` in the current scope; the empty prefix sets the default namespace.
    pub fn declare(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        let uri = uri.into();
        let scope = self.current_mut();
        scope.bindings.retain(|b| b.prefix != prefix);
        scope.bindings.push(Namespace::new(prefix, uri));
    }

    /// Bindings declared by the innermost scope.
    pub fn current_bindings(&self) -> &[Namespace] {
        self.scopes
            .last()
            .map(|s| s.bindings.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_declared_here(&self, prefix: &str) -> bool {
        self.current_bindings().iter().any(|b| b.prefix == prefix)
    }

    pub fn uri_for(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        let bound = self
            .scopes
            .iter()
            .rev()
            .flat_map(|s| s.bindings.iter().rev())
            .find(|b| b.prefix == prefix)
            .map(|b| b.uri.as_str());
        match bound {
            Some(uri) => Some(uri),
            None if prefix.is_empty() => Some(""),
            None => None,
        }
    }

    pub fn default_namespace(&self) -> &str {
        self.uri_for("").unwrap_or("")
    }

    /// A prefix currently resolving to `uri`, innermost first. The empty prefix is only
    /// returned for the default namespace.
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        if uri == XML_NAMESPACE {
            return Some("xml");
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.bindings.iter().rev())
            .filter(|b| b.uri == uri)
            .map(|b| b.prefix.as_str())
            .find(|prefix| self.uri_for(prefix) == Some(uri))
    }

    fn prefixed_for(&self, uri: &str) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.bindings.iter().rev())
            .filter(|b| b.uri == uri && !b.prefix.is_empty())
            .map(|b| b.prefix.clone())
            .find(|prefix| self.uri_for(prefix) == Some(uri))
    }

    /// Next unused generated prefix (`n1`, `n2`, ...). The counter only moves forward, so the
    /// search ends after at most one step per bound prefix.
    pub fn next_auto_prefix(&mut self) -> String {
        loop {
            let candidate = format!("n{}", self.next_auto);
            self.next_auto += 1;
            if self.uri_for(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// A prefix is only reused for a new binding when it is unbound everywhere, so bindings
    /// made after a child was recorded can never shadow a prefix the child relies on.
    fn prefix_is_free(&self, prefix: &str) -> bool {
        self.uri_for(prefix).is_none()
    }

    /// Settles the name of an element whose scope was just pushed. Returns the name to write
    /// and the declarations it needs.
    pub fn resolve_element(
        &mut self,
        requested: &QName,
        repair: bool,
    ) -> Result<(QName, Vec<Namespace>)> {
        let mut decls = Vec::new();
        let name = if requested.namespace.is_empty() {
            if !self.default_namespace().is_empty() {
                self.declare("", "");
                decls.push(Namespace::none());
            }
            QName::local(requested.local.clone())
        } else if requested.prefix.is_empty() {
            if self.default_namespace() != requested.namespace {
                if self.is_declared_here("") {
                    return self.repair_element(requested, repair, decls);
                }
                self.declare("", requested.namespace.clone());
                decls.push(Namespace::new("", requested.namespace.clone()));
            }
            requested.clone()
        } else {
            let bound = self.uri_for(&requested.prefix) == Some(requested.namespace.as_str());
            if bound {
                requested.clone()
            } else if self.is_declared_here(&requested.prefix) {
                return self.repair_element(requested, repair, decls);
            } else {
                self.declare(requested.prefix.clone(), requested.namespace.clone());
                decls.push(requested.namespace());
                requested.clone()
            }
        };
        Ok((name, decls))
    }

    fn repair_element(
        &mut self,
        requested: &QName,
        repair: bool,
        mut decls: Vec<Namespace>,
    ) -> Result<(QName, Vec<Namespace>)> {
        if !repair {
            return Err(XmlError::malformed(format!(
                "prefix `{}` of `{}` is already bound on this element",
                requested.prefix, requested.local
            )));
        }
        let prefix = match self.prefixed_for(&requested.namespace) {
            Some(prefix) => prefix,
            None => {
                let prefix = self.next_auto_prefix();
                self.declare(prefix.clone(), requested.namespace.clone());
                decls.push(Namespace::new(prefix.clone(), requested.namespace.clone()));
                prefix
            }
        };
        let name = requested.with_prefix(prefix);
        Ok((name, decls))
    }

    /// Settles an attribute name on the current element. Attributes in a namespace always
    /// carry a prefix; a missing or conflicting one is generated.
    pub fn resolve_attribute(
        &mut self,
        requested: &QName,
        repair: bool,
    ) -> Result<(QName, Option<Namespace>)> {
        if requested.namespace.is_empty() {
            return Ok((QName::local(requested.local.clone()), None));
        }
        if !requested.prefix.is_empty()
            && self.uri_for(&requested.prefix) == Some(requested.namespace.as_str())
        {
            return Ok((requested.clone(), None));
        }
        if let Some(prefix) = self.prefixed_for(&requested.namespace) {
            return Ok((requested.with_prefix(prefix), None));
        }

        let prefix = if !requested.prefix.is_empty() && self.prefix_is_free(&requested.prefix) {
            requested.prefix.clone()
        } else if !requested.prefix.is_empty() && !repair {
            return Err(XmlError::malformed(format!(
                "prefix `{}` of attribute `{}` is already bound to `{}`",
                requested.prefix,
                requested.local,
                self.uri_for(&requested.prefix).unwrap_or_default()
            )));
        } else {
            self.next_auto_prefix()
        };
        self.declare(prefix.clone(), requested.namespace.clone());
        Ok((
            requested.with_prefix(prefix.clone()),
            Some(Namespace::new(prefix, requested.namespace.clone())),
        ))
    }
}
