//! Resource identifiers, attribute values, and resource specs.
//!
//! A [`ResourceSpec`] is the immutable, build-time form of one declaration:
//! variables are already substituted and every cross-resource reference is an
//! explicit [`ResourceRef`] that also appears in the spec's dependency list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifier of a resource: its kind plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    kind: String,
    name: String,
}

/// A reference from one resource's attribute to another resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// The referenced resource.
    pub target: ResourceId,
    /// Attribute path inside the target's state. Empty means the external ID.
    pub attribute: Vec<String>,
}

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// A reference rendered into the string.
    Ref(ResourceRef),
}

/// An attribute value after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// A plain value with no references.
    Literal(Value),
    /// A whole value taken from another resource.
    Reference(ResourceRef),
    /// A string with one or more embedded references.
    Template(Vec<Segment>),
    /// A list that contains references.
    List(Vec<AttrValue>),
    /// A map that contains references.
    Map(BTreeMap<String, AttrValue>),
}

/// Desired state of one resource, as built from the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    id: ResourceId,
    attributes: BTreeMap<String, AttrValue>,
    dependencies: Vec<ResourceId>,
    index: usize,
}

impl ResourceId {
    /// Creates an identifier from a kind and a name.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parses an identifier of the form `kind.name`.
    ///
    /// # Errors
    ///
    /// Returns an error if either part is missing.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Self::new(kind, name))
            }
            _ => Err(format!("Invalid resource identifier: {s}. Expected format: KIND.NAME")),
        }
    }

    /// Returns the resource kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}", self.target)?;
        for part in &self.attribute {
            write!(f, ".{part}")?;
        }
        write!(f, "}}")
    }
}

impl AttrValue {
    /// Collects every reference contained in this value.
    #[must_use]
    pub fn references(&self) -> Vec<&ResourceRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a ResourceRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(r) => out.push(r),
            Self::Template(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        out.push(r);
                    }
                }
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
        }
    }

    /// Resolves this value to plain JSON.
    ///
    /// `lookup` returns the value of a reference, or `None` when it is not
    /// known yet.
    ///
    /// # Errors
    ///
    /// Returns the first reference that `lookup` could not resolve.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value, ResourceRef>
    where
        F: Fn(&ResourceRef) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Reference(r) => lookup(r).ok_or_else(|| r.clone()),
            Self::Template(segments) => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => rendered.push_str(text),
                        Segment::Ref(r) => {
                            let value = lookup(r).ok_or_else(|| r.clone())?;
                            rendered.push_str(&render_scalar(&value));
                        }
                    }
                }
                Ok(Value::String(rendered))
            }
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.resolve(lookup)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

/// Renders a JSON value for string interpolation.
#[must_use]
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ResourceSpec {
    /// Creates a spec. Dependencies are sorted and deduplicated.
    #[must_use]
    pub fn new(
        id: ResourceId,
        attributes: BTreeMap<String, AttrValue>,
        mut dependencies: Vec<ResourceId>,
        index: usize,
    ) -> Self {
        dependencies.sort();
        dependencies.dedup();
        Self {
            id,
            attributes,
            dependencies,
            index,
        }
    }

    /// Returns the resource identifier.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Returns the attribute map.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    /// Returns the identifiers this resource depends on.
    #[must_use]
    pub fn dependencies(&self) -> &[ResourceId] {
        &self.dependencies
    }

    /// Returns the position of the declaration in the input document.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}
