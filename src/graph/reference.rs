//! Interpolation syntax inside string attribute values.
//!
//! `${var.NAME}` names a document variable, `${KIND.NAME}` and
//! `${KIND.NAME.ATTR...}` name another resource. `$${` is a literal `${`.

use super::types::{ResourceId, ResourceRef};

/// A lexical piece of a string attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    /// Literal text.
    Text(String),
    /// A variable placeholder.
    Var(String),
    /// A resource reference.
    Ref(ResourceRef),
}

/// Prefix of variable expressions. Reserved, so no resource kind may use it.
pub(crate) const VAR_PREFIX: &str = "var";

/// Splits a string into text, variable, and reference pieces.
///
/// Adjacent text is merged, so a string without placeholders yields at most
/// one [`Piece::Text`].
///
/// # Errors
///
/// Returns a message describing an unterminated or malformed expression.
pub fn parse_pieces(input: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("$${") {
            text.push_str("${");
            rest = &tail[3..];
        } else if let Some(body) = tail.strip_prefix("${") {
            let end = body
                .find('}')
                .ok_or_else(|| format!("Unterminated expression in '{input}'"))?;
            let expression = body[..end].trim();

            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut text)));
            }
            pieces.push(parse_expression(expression, input)?);
            rest = &body[end + 1..];
        } else {
            text.push('$');
            rest = &tail[1..];
        }
    }

    text.push_str(rest);
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }

    Ok(pieces)
}

/// Parses the contents of a single `${...}` expression.
fn parse_expression(expression: &str, input: &str) -> Result<Piece, String> {
    if expression.is_empty() {
        return Err(format!("Empty expression in '{input}'"));
    }

    let parts: Vec<&str> = expression.split('.').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(format!("Malformed expression '${{{expression}}}' in '{input}'"));
    }

    if parts[0] == VAR_PREFIX {
        return match parts.as_slice() {
            [_, name] => Ok(Piece::Var((*name).to_string())),
            _ => Err(format!(
                "Variable expression '${{{expression}}}' must have the form var.NAME"
            )),
        };
    }

    match parts.as_slice() {
        [kind, name, attribute @ ..] => Ok(Piece::Ref(ResourceRef {
            target: ResourceId::new(*kind, *name),
            attribute: attribute.iter().map(|s| (*s).to_string()).collect(),
        })),
        _ => Err(format!(
            "Reference '${{{expression}}}' must have the form KIND.NAME or KIND.NAME.ATTR"
        )),
    }
}
