use crate::name::QName;

/// Errors raised while building descriptors, encoding values to XML or decoding XML into values.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// The type description or the policy produced an inconsistent descriptor. These surface
    /// while descriptors are built and are cached alongside successful builds.
    #[error("configuration defect in `{type_name}`: {message}")]
    ConfigurationDefect { type_name: String, message: String },

    /// Two values resolved to the same attribute name on one element.
    #[error("duplicate attribute `{name}` on element `{element}`")]
    DuplicateAttribute { element: QName, name: QName },

    /// An element, attribute or text node that does not correspond to any field.
    #[error("unknown {kind} `{name}`; expected one of: {}", format_candidates(candidates))]
    UnknownContent {
        kind: InputKind,
        name: QName,
        candidates: Vec<QName>,
    },

    /// A required field was absent from the input.
    #[error("missing field `{field}` in `{type_name}`")]
    MissingField { type_name: String, field: String },

    /// A polymorphic value named a subtype that is not registered for its base.
    #[error("unknown polymorphic type `{name}`; registered candidates: {}", candidates.join(", "))]
    UnknownPolymorphicType { name: String, candidates: Vec<String> },

    /// The document structure did not match what the descriptor requires.
    #[error("malformed XML structure: {0}")]
    MalformedStructure(String),

    /// An entity reference that is neither predefined nor a character reference.
    #[error("unrecognized entity `{0}`")]
    UnknownEntity(String),

    /// A primitive value whose text could not be parsed.
    #[error("invalid {expected} value `{value}`")]
    InvalidValue { expected: &'static str, value: String },

    /// Error reported by the underlying XML reader or writer.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// IO error while reading or writing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom error message
    #[error("{0}")]
    Custom(String),
}

/// Where in the input an unknown name was encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Element,
    Attribute,
    Text,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::Element => f.write_str("element"),
            InputKind::Attribute => f.write_str("attribute"),
            InputKind::Text => f.write_str("text content"),
        }
    }
}

fn format_candidates(candidates: &[QName]) -> String {
    if candidates.is_empty() {
        return "<none>".to_string();
    }
    candidates
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl XmlError {
    pub(crate) fn defect(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        XmlError::ConfigurationDefect {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        XmlError::MalformedStructure(message.into())
    }
}

impl From<quick_xml::events::attributes::AttrError> for XmlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        XmlError::Xml(quick_xml::Error::InvalidAttr(err))
    }
}

impl From<std::str::Utf8Error> for XmlError {
    fn from(err: std::str::Utf8Error) -> Self {
        XmlError::MalformedStructure(format!("invalid UTF-8: {}", err))
    }
}

impl From<String> for XmlError {
    fn from(msg: String) -> Self {
        XmlError::Custom(msg)
    }
}

impl From<&str> for XmlError {
    fn from(msg: &str) -> Self {
        XmlError::Custom(msg.to_string())
    }
}

impl serde::ser::Error for XmlError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        XmlError::Custom(msg.to_string())
    }
}

impl serde::de::Error for XmlError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        XmlError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        XmlError::MissingField {
            type_name: String::new(),
            field: field.to_string(),
        }
    }
}

/// Result type alias for XML codec operations
pub type Result<T> = std::result::Result<T, XmlError>;
