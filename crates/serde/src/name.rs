//! Qualified names and namespace bindings.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Namespace URI reserved for `xmlns` declarations.
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Namespace URI bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// The empty namespace URI (no namespace).
pub const NO_NAMESPACE: &str = "";

/// A qualified XML name.
///
/// Equality and hashing consider only the namespace URI and the local part; the prefix is a
/// serialization hint.
#[derive(Debug, Clone, Default)]
pub struct QName {
    pub namespace: String,
    pub local: String,
    pub prefix: String,
}

impl QName {
    /// A name without namespace.
    pub fn local(local: impl Into<String>) -> Self {
        QName {
            namespace: String::new(),
            local: local.into(),
            prefix: String::new(),
        }
    }

    pub fn new(
        namespace: impl Into<String>,
        local: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        QName {
            namespace: namespace.into(),
            local: local.into(),
            prefix: prefix.into(),
        }
    }

    /// Same URI and prefix as `ns`, with the given local part.
    pub fn in_namespace(ns: &Namespace, local: impl Into<String>) -> Self {
        QName {
            namespace: ns.uri.clone(),
            local: local.into(),
            prefix: ns.prefix.clone(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.prefix.clone(), self.namespace.clone())
    }

    pub fn has_namespace(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// The `prefix:local` form written to the document.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }

    pub fn with_prefix(&self, prefix: impl Into<String>) -> QName {
        QName {
            namespace: self.namespace.clone(),
            local: self.local.clone(),
            prefix: prefix.into(),
        }
    }

    pub fn without_namespace(&self) -> QName {
        QName::local(self.local.clone())
    }

    /// Whether the local part is a usable XML name without a colon.
    pub fn is_valid_local(&self) -> bool {
        let mut chars = self.local.chars();
        match chars.next() {
            Some(first) if first.is_alphabetic() || first == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.local == other.local
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// A prefix bound to a namespace URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Namespace {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }

    /// The empty default namespace.
    pub fn none() -> Self {
        Namespace::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_prefix() {
        let a = QName::new("urn:a", "food", "ns");
        let b = QName::new("urn:a", "food", "other");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&QName::local("food")));
    }

    #[test]
    fn test_qualified_form() {
        assert_eq!(QName::new("urn:a", "food", "ns").qualified(), "ns:food");
        assert_eq!(QName::local("name").qualified(), "name");
        assert_eq!(QName::new("urn:a", "food", "").to_string(), "{urn:a}food");
    }

    #[test]
    fn test_valid_local_names() {
        assert!(QName::local("food").is_valid_local());
        assert!(QName::local("_x-1.b").is_valid_local());
        assert!(!QName::local("List<Item>").is_valid_local());
        assert!(!QName::local("1st").is_valid_local());
        assert!(!QName::local("a:b").is_valid_local());
        assert!(!QName::local("").is_valid_local());
    }
}
