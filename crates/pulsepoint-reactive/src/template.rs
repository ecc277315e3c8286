//! Template text handling: `{{ }}` segments, spread directives, entities.

mod mustache;
mod spread;

pub use mustache::{MustacheParser, ParsedMustache, SegmentKind, decode_entities};
pub use spread::{SpreadDirective, SpreadProperty};

/// Splits `source` on `separator` where it appears outside quotes and
/// outside any `()`, `[]` or `{}` nesting.
pub(crate) fn split_top_level(source: &str, separator: char) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut depth = 0usize;
	let mut quote: Option<char> = None;
	let mut escaped = false;
	let mut start = 0;

	for (index, c) in source.char_indices() {
		if let Some(q) = quote {
			if escaped {
				escaped = false;
			} else if c == '\\' {
				escaped = true;
			} else if c == q {
				quote = None;
			}
			continue;
		}
		match c {
			'"' | '\'' | '`' => quote = Some(c),
			'(' | '[' | '{' => depth += 1,
			')' | ']' | '}' => depth = depth.saturating_sub(1),
			_ if c == separator && depth == 0 => {
				parts.push(&source[start..index]);
				start = index + c.len_utf8();
			}
			_ => {}
		}
	}
	parts.push(&source[start..]);
	parts
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("a, b, c", vec!["a", " b", " c"])]
	#[case("f(a, b), c", vec!["f(a, b)", " c"])]
	#[case("'x,y', {a: 1, b: 2}", vec!["'x,y'", " {a: 1, b: 2}"])]
	#[case("", vec![""])]
	fn test_split_top_level(#[case] source: &str, #[case] expected: Vec<&str>) {
		assert_eq!(split_top_level(source, ','), expected);
	}
}
