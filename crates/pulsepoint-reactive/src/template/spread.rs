//! `pp-spread` directive parsing.

use serde::Serialize;

use super::split_top_level;
use crate::config::{MUSTACHE_CLOSE, MUSTACHE_OPEN};

/// One `key: value` pair of an object literal in a spread directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpreadProperty {
	/// Property name with surrounding quotes removed.
	pub key: String,
	/// Value expression source.
	pub value: String,
}

/// Structured form of a `pp-spread` attribute.
///
/// `spreads` lists expressions whose properties are spread onto the
/// element; `objects` lists inline object literals in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpreadDirective {
	/// Spread expressions, `...` removed.
	pub spreads: Vec<String>,
	/// Inline object literals.
	pub objects: Vec<Vec<SpreadProperty>>,
}

impl SpreadDirective {
	/// Parses `{{ ...attrs, { id: 'x', disabled } }}` and similar input.
	pub fn parse(content: &str) -> Self {
		let mut directive = SpreadDirective::default();
		let mut body = content.trim();
		if let Some(inner) = body
			.strip_prefix(MUSTACHE_OPEN)
			.and_then(|rest| rest.strip_suffix(MUSTACHE_CLOSE))
		{
			body = inner.trim();
		}
		if body.is_empty() {
			return directive;
		}
		for part in split_top_level(body, ',') {
			directive.push_part(part.trim());
		}
		directive
	}

	fn push_part(&mut self, part: &str) {
		if part.is_empty() {
			return;
		}
		let expr = part.strip_prefix("...").map(str::trim).unwrap_or(part);
		match object_body(expr) {
			Some(body) => {
				let properties = self.parse_object(body);
				self.objects.push(properties);
			}
			None => self.spreads.push(expr.to_string()),
		}
	}

	fn parse_object(&mut self, body: &str) -> Vec<SpreadProperty> {
		let mut properties = Vec::new();
		for raw in split_top_level(body, ',') {
			let raw = raw.trim();
			if raw.is_empty() {
				continue;
			}
			if let Some(inner) = raw.strip_prefix("...") {
				self.push_part(inner.trim());
				continue;
			}
			let property = match find_property_separator(raw) {
				Some(index) => SpreadProperty {
					key: unquote(raw[..index].trim()).to_string(),
					value: raw[index + 1..].trim().to_string(),
				},
				None => SpreadProperty {
					key: raw.to_string(),
					value: raw.to_string(),
				},
			};
			properties.push(property);
		}
		properties
	}
}

fn object_body(expr: &str) -> Option<&str> {
	if !expr.starts_with('{') || !expr.ends_with('}') {
		return None;
	}
	// `{a} + {b}` is not one literal: the first brace must close at the end.
	let mut depth = 0usize;
	let mut quote: Option<char> = None;
	for (index, c) in expr.char_indices() {
		match (quote, c) {
			(Some(q), _) if c == q => quote = None,
			(Some(_), _) => {}
			(None, '"' | '\'' | '`') => quote = Some(c),
			(None, '{') => depth += 1,
			(None, '}') => {
				depth -= 1;
				if depth == 0 {
					return (index == expr.len() - 1).then(|| &expr[1..index]);
				}
			}
			_ => {}
		}
	}
	None
}

/// First `:` outside quotes and nesting.
fn find_property_separator(raw: &str) -> Option<usize> {
	let first = split_top_level(raw, ':').first().copied()?;
	(first.len() < raw.len()).then_some(first.len())
}

fn unquote(key: &str) -> &str {
	for q in ['"', '\''] {
		if let Some(inner) = key.strip_prefix(q).and_then(|k| k.strip_suffix(q)) {
			return inner;
		}
	}
	key
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn prop(key: &str, value: &str) -> SpreadProperty {
		SpreadProperty {
			key: key.to_string(),
			value: value.to_string(),
		}
	}

	#[rstest]
	fn test_spreads_and_object() {
		let directive = SpreadDirective::parse("{{ ...attrs, ...{ id: 'main', disabled } }}");
		assert_eq!(directive.spreads, vec!["attrs".to_string()]);
		assert_eq!(
			directive.objects,
			vec![vec![prop("id", "'main'"), prop("disabled", "disabled")]]
		);
	}

	#[rstest]
	fn test_nested_values_keep_commas() {
		let directive = SpreadDirective::parse("{ 'data-x': fmt(a, b), style: { color: c } }");
		assert_eq!(
			directive.objects,
			vec![vec![prop("data-x", "fmt(a, b)"), prop("style", "{ color: c }")]]
		);
		assert!(directive.spreads.is_empty());
	}

	#[rstest]
	fn test_spread_inside_object_is_hoisted() {
		let directive = SpreadDirective::parse("{ ...base, title: t }");
		assert_eq!(directive.spreads, vec!["base".to_string()]);
		assert_eq!(directive.objects, vec![vec![prop("title", "t")]]);
	}

	#[rstest]
	fn test_ternary_value_splits_on_first_colon() {
		let directive = SpreadDirective::parse("{ class: on ? 'a' : 'b' }");
		assert_eq!(directive.objects, vec![vec![prop("class", "on ? 'a' : 'b'")]]);
	}

	#[rstest]
	#[case("")]
	#[case("{{ }}")]
	fn test_empty(#[case] source: &str) {
		assert_eq!(SpreadDirective::parse(source), SpreadDirective::default());
	}
}
