//! Graph construction from document declarations.
//!
//! The builder is a pure transform: it substitutes variables, turns every
//! `${KIND.NAME...}` reference into an explicit dependency edge, and rejects
//! inputs with duplicate identifiers, dangling references, or cycles.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::config::ResourceDecl;
use crate::error::{ConfigError, Result};

use super::dag::Graph;
use super::reference::{parse_pieces, Piece};
use super::types::{render_scalar, AttrValue, ResourceId, ResourceSpec, Segment};

/// Builds a [`Graph`] from declarations and a variable map.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    /// Variables available to `${var.NAME}` placeholders.
    variables: BTreeMap<String, Value>,
}

impl GraphBuilder {
    /// Creates a builder with the given variables.
    #[must_use]
    pub const fn new(variables: BTreeMap<String, Value>) -> Self {
        Self { variables }
    }

    /// Builds the dependency graph.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateResource`], [`ConfigError::UndefinedVariable`],
    /// [`ConfigError::ParseError`], [`ConfigError::UnresolvedReference`] or
    /// [`ConfigError::Cycle`]. No graph is produced on error.
    pub fn build(&self, declarations: &[ResourceDecl]) -> Result<Graph> {
        let mut seen = HashSet::new();
        for decl in declarations {
            let id = decl.id();
            if !seen.insert(id.clone()) {
                return Err(ConfigError::DuplicateResource { id: id.to_string() }.into());
            }
        }

        let mut specs = Vec::with_capacity(declarations.len());
        for (index, decl) in declarations.iter().enumerate() {
            specs.push(self.build_spec(decl, index, &seen)?);
        }

        let graph = Graph::from_specs(specs);

        if let Some(cycle) = graph.find_cycle() {
            let path = cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ConfigError::Cycle { path }.into());
        }

        debug!("Built dependency graph with {} resources", graph.len());
        Ok(graph)
    }

    /// Builds the spec for a single declaration.
    fn build_spec(
        &self,
        decl: &ResourceDecl,
        index: usize,
        known: &HashSet<ResourceId>,
    ) -> Result<ResourceSpec> {
        let id = decl.id();

        let mut attributes = BTreeMap::new();
        for (key, raw) in &decl.attributes {
            attributes.insert(key.clone(), self.convert(raw, &id)?);
        }

        let mut dependencies = Vec::new();
        for value in attributes.values() {
            for reference in value.references() {
                dependencies.push(reference.target.clone());
            }
        }

        for raw in &decl.depends_on {
            let target = ResourceId::parse(raw).map_err(|e| ConfigError::ParseError {
                message: e,
                location: Some(format!("{id}.depends_on")),
            })?;
            dependencies.push(target);
        }

        for target in &dependencies {
            if !known.contains(target) {
                return Err(ConfigError::UnresolvedReference {
                    from: id.to_string(),
                    target: target.to_string(),
                }
                .into());
            }
        }

        Ok(ResourceSpec::new(id, attributes, dependencies, index))
    }

    /// Converts a raw document value into an attribute value.
    fn convert(&self, raw: &Value, owner: &ResourceId) -> Result<AttrValue> {
        match raw {
            Value::String(s) => self.convert_string(s, owner),
            Value::Array(items) => {
                let converted = items
                    .iter()
                    .map(|item| self.convert(item, owner))
                    .collect::<Result<Vec<_>>>()?;
                Ok(collapse_list(converted))
            }
            Value::Object(entries) => {
                let mut converted = BTreeMap::new();
                for (key, value) in entries {
                    converted.insert(key.clone(), self.convert(value, owner)?);
                }
                Ok(collapse_map(converted))
            }
            other => Ok(AttrValue::Literal(other.clone())),
        }
    }

    /// Converts a string, substituting variables and extracting references.
    fn convert_string(&self, s: &str, owner: &ResourceId) -> Result<AttrValue> {
        let pieces = parse_pieces(s).map_err(|message| ConfigError::ParseError {
            message,
            location: Some(owner.to_string()),
        })?;

        match pieces.as_slice() {
            [] => return Ok(AttrValue::Literal(Value::String(String::new()))),
            [Piece::Var(name)] => return Ok(AttrValue::Literal(self.variable(name, owner)?.clone())),
            [Piece::Ref(reference)] => return Ok(AttrValue::Reference(reference.clone())),
            _ => {}
        }

        let mut segments: Vec<Segment> = Vec::new();
        for piece in pieces {
            match piece {
                Piece::Text(text) => push_text(&mut segments, &text),
                Piece::Var(name) => {
                    let rendered = render_scalar(self.variable(&name, owner)?);
                    push_text(&mut segments, &rendered);
                }
                Piece::Ref(reference) => segments.push(Segment::Ref(reference)),
            }
        }

        match segments.as_slice() {
            [] => Ok(AttrValue::Literal(Value::String(String::new()))),
            [Segment::Text(text)] => Ok(AttrValue::Literal(Value::String(text.clone()))),
            _ => Ok(AttrValue::Template(segments)),
        }
    }

    /// Looks up a variable.
    fn variable(&self, name: &str, owner: &ResourceId) -> Result<&Value> {
        self.variables.get(name).ok_or_else(|| {
            ConfigError::UndefinedVariable {
                name: name.to_string(),
                resource: owner.to_string(),
            }
            .into()
        })
    }
}

/// Appends text, merging with a trailing text segment.
fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if let Some(Segment::Text(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

/// Folds a list without references back into a literal.
fn collapse_list(items: Vec<AttrValue>) -> AttrValue {
    if items.iter().all(|i| matches!(i, AttrValue::Literal(_))) {
        AttrValue::Literal(Value::Array(
            items
                .into_iter()
                .filter_map(|i| match i {
                    AttrValue::Literal(v) => Some(v),
                    _ => None,
                })
                .collect(),
        ))
    } else {
        AttrValue::List(items)
    }
}

/// Folds a map without references back into a literal.
fn collapse_map(entries: BTreeMap<String, AttrValue>) -> AttrValue {
    if entries.values().all(|v| matches!(v, AttrValue::Literal(_))) {
        AttrValue::Literal(Value::Object(
            entries
                .into_iter()
                .filter_map(|(k, v)| match v {
                    AttrValue::Literal(v) => Some((k, v)),
                    _ => None,
                })
                .collect(),
        ))
    } else {
        AttrValue::Map(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RiggingError;
    use serde_json::json;

    fn decl(kind: &str, name: &str, attributes: Value, depends_on: &[&str]) -> ResourceDecl {
        ResourceDecl {
            kind: kind.to_string(),
            name: name.to_string(),
            attributes: serde_json::from_value(attributes).unwrap(),
            depends_on: depends_on.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn builder() -> GraphBuilder {
        GraphBuilder::new(BTreeMap::from([
            (String::from("bucket_name"), json!("audit-trail-logs")),
            (String::from("retention"), json!(90)),
        ]))
    }

    #[test]
    fn test_references_become_edges() {
        let graph = builder()
            .build(&[
                decl("bucket", "logs", json!({ "bucket": "${var.bucket_name}" }), &[]),
                decl(
                    "policy",
                    "logs",
                    json!({ "bucket": "${bucket.logs}", "resource": "${bucket.logs.urn}/*" }),
                    &[],
                ),
            ])
            .unwrap();

        let policy = graph.get(&ResourceId::new("policy", "logs")).unwrap();
        assert_eq!(policy.dependencies(), &[ResourceId::new("bucket", "logs")]);

        let bucket = graph.get(&ResourceId::new("bucket", "logs")).unwrap();
        assert_eq!(
            bucket.attributes().get("bucket"),
            Some(&AttrValue::Literal(json!("audit-trail-logs")))
        );
    }

    #[test]
    fn test_whole_variable_keeps_type() {
        let graph = builder()
            .build(&[decl(
                "log-group",
                "trail",
                json!({ "retention_days": "${var.retention}", "label": "keep-${var.retention}" }),
                &[],
            )])
            .unwrap();

        let spec = graph.get(&ResourceId::new("log-group", "trail")).unwrap();
        assert_eq!(
            spec.attributes().get("retention_days"),
            Some(&AttrValue::Literal(json!(90)))
        );
        assert_eq!(
            spec.attributes().get("label"),
            Some(&AttrValue::Literal(json!("keep-90")))
        );
    }

    #[test]
    fn test_unresolved_reference() {
        let err = builder()
            .build(&[decl("policy", "p", json!({ "bucket": "${bucket.missing}" }), &[])])
            .unwrap_err();
        assert!(matches!(
            err,
            RiggingError::Config(ConfigError::UnresolvedReference { ref target, .. })
                if target == "bucket.missing"
        ));
    }

    #[test]
    fn test_unresolved_depends_on() {
        let err = builder()
            .build(&[decl("trail", "t", json!({}), &["role.missing"])])
            .unwrap_err();
        assert!(matches!(
            err,
            RiggingError::Config(ConfigError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let err = builder()
            .build(&[
                decl("role", "a", json!({ "peer": "${role.b}" }), &[]),
                decl("role", "b", json!({}), &["role.a"]),
            ])
            .unwrap_err();
        match err {
            RiggingError::Config(ConfigError::Cycle { path }) => {
                assert_eq!(path, "role.a -> role.b -> role.a");
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = builder()
            .build(&[decl("role", "a", json!({ "arn": "${role.a.urn}" }), &[])])
            .unwrap_err();
        assert!(matches!(err, RiggingError::Config(ConfigError::Cycle { .. })));
    }

    #[test]
    fn test_duplicate_and_undefined_variable() {
        let err = builder()
            .build(&[decl("topic", "t", json!({}), &[]), decl("topic", "t", json!({}), &[])])
            .unwrap_err();
        assert!(matches!(
            err,
            RiggingError::Config(ConfigError::DuplicateResource { .. })
        ));

        let err = builder()
            .build(&[decl("topic", "t", json!({ "name": "${var.nope}" }), &[])])
            .unwrap_err();
        assert!(matches!(
            err,
            RiggingError::Config(ConfigError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn test_nested_reference_in_list() {
        let graph = builder()
            .build(&[
                decl("key", "k", json!({}), &[]),
                decl(
                    "trail",
                    "t",
                    json!({ "statements": [{ "key": "${key.k.urn}" }, { "effect": "allow" }] }),
                    &[],
                ),
            ])
            .unwrap();

        let trail = graph.get(&ResourceId::new("trail", "t")).unwrap();
        assert!(matches!(
            trail.attributes().get("statements"),
            Some(AttrValue::List(_))
        ));
        assert_eq!(trail.dependencies(), &[ResourceId::new("key", "k")]);
    }
}
