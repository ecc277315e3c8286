//! `{{ expression }}` segment parser with a per-source cache.

use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::SpreadDirective;
use crate::cache::{CacheStats, LruCache};
use crate::config::{MAX_CACHE_SIZE, MUSTACHE_CLOSE, MUSTACHE_OPEN};
use crate::warn_log;

/// Kind of a parsed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
	/// Literal text.
	Static,
	/// A `{{ }}` block.
	Expression,
}

/// One segment of parsed template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMustache {
	/// Segment kind.
	pub kind: SegmentKind,
	/// Source text of the segment, delimiters included for expressions.
	pub content: String,
	/// Trimmed inner expression, `None` for static segments.
	pub expression: Option<String>,
}

impl ParsedMustache {
	fn literal(content: impl Into<String>) -> Self {
		Self {
			kind: SegmentKind::Static,
			content: content.into(),
			expression: None,
		}
	}

	/// Whether the segment is a `{{ }}` block.
	pub fn is_expression(&self) -> bool {
		self.kind == SegmentKind::Expression
	}
}

struct Scan {
	// Byte offset just past the closing delimiter.
	end: usize,
	mismatched_quotes: bool,
}

/// Finds the closing `}}` for an expression whose body starts at `body`.
fn scan_expression(source: &str, body: usize) -> Option<Scan> {
	let bytes = source.as_bytes();
	let mut depth = 0usize;
	let mut quote: Option<u8> = None;
	let mut escaped = false;
	let mut i = body;

	while i < bytes.len() {
		let b = bytes[i];
		if let Some(q) = quote {
			if escaped {
				escaped = false;
			} else if b == b'\\' {
				escaped = true;
			} else if b == q {
				quote = None;
			}
			i += 1;
			continue;
		}
		match b {
			b'"' | b'\'' | b'`' => quote = Some(b),
			b'{' => depth += 1,
			b'}' if depth > 0 => depth -= 1,
			b'}' if bytes.get(i + 1) == Some(&b'}') => {
				return Some(Scan {
					end: i + MUSTACHE_CLOSE.len(),
					mismatched_quotes: false,
				});
			}
			_ => {}
		}
		i += 1;
	}

	// An unterminated quote swallowed the delimiter: fall back to the first
	// closing delimiter and report the quotes.
	source[body..].find(MUSTACHE_CLOSE).map(|offset| Scan {
		end: body + offset + MUSTACHE_CLOSE.len(),
		mismatched_quotes: true,
	})
}

/// Parses template text into static and expression segments.
///
/// Results are cached per full source string.
///
/// # Example
///
/// ```
/// use pulsepoint_reactive::template::MustacheParser;
///
/// let mut parser = MustacheParser::new();
/// let segments = parser.parse("Hello {{ user.name }}!");
/// assert_eq!(segments.len(), 3);
/// assert_eq!(segments[1].expression.as_deref(), Some("user.name"));
/// ```
#[derive(Debug)]
pub struct MustacheParser {
	cache: LruCache<String, Rc<[ParsedMustache]>>,
}

impl Default for MustacheParser {
	fn default() -> Self {
		Self::new()
	}
}

impl MustacheParser {
	/// Parser with the default cache capacity.
	pub fn new() -> Self {
		Self::with_capacity(MAX_CACHE_SIZE)
	}

	/// Parser with a custom cache capacity.
	pub fn with_capacity(max_size: usize) -> Self {
		Self {
			cache: LruCache::new(max_size),
		}
	}

	/// Splits `content` into ordered segments.
	///
	/// Text without any expression yields exactly one static segment equal
	/// to the input. Unclosed or empty blocks are kept as static text.
	pub fn parse(&mut self, content: &str) -> Rc<[ParsedMustache]> {
		if let Some(cached) = self.cache.get(content) {
			return Rc::clone(cached);
		}
		let segments: Rc<[ParsedMustache]> = parse_uncached(content).into();
		self.cache.set(content.to_string(), Rc::clone(&segments));
		segments
	}

	/// Inner expression when `content` is exactly one `{{ }}` block.
	pub fn is_single_expression(&mut self, content: &str) -> Option<String> {
		let segments = self.parse(content.trim());
		match &segments[..] {
			[only] if only.is_expression() => only.expression.clone(),
			_ => None,
		}
	}

	/// All expressions in order of appearance.
	pub fn extract_expressions(&mut self, content: &str) -> Vec<String> {
		self.parse(content)
			.iter()
			.filter_map(|segment| segment.expression.clone())
			.collect()
	}

	/// Parses a `pp-spread` attribute value. Not cached.
	pub fn parse_spread_directive(&self, content: &str) -> SpreadDirective {
		SpreadDirective::parse(content)
	}

	/// Cache counters.
	pub fn cache_stats(&self) -> CacheStats {
		self.cache.stats()
	}

	/// Drops every cached parse.
	pub fn clear_cache(&mut self) {
		self.cache.clear();
	}
}

fn push_static(segments: &mut Vec<ParsedMustache>, text: &str) {
	if text.is_empty() {
		return;
	}
	match segments.last_mut() {
		Some(last) if !last.is_expression() => last.content.push_str(text),
		_ => segments.push(ParsedMustache::literal(text)),
	}
}

fn parse_uncached(content: &str) -> Vec<ParsedMustache> {
	let mut segments = Vec::new();
	let mut cursor = 0;

	while let Some(offset) = content[cursor..].find(MUSTACHE_OPEN) {
		let open = cursor + offset;
		let body = open + MUSTACHE_OPEN.len();
		let Some(scan) = scan_expression(content, body) else {
			break;
		};
		push_static(&mut segments, &content[cursor..open]);

		let block = &content[open..scan.end];
		let inner = content[body..scan.end - MUSTACHE_CLOSE.len()].trim();
		if scan.mismatched_quotes {
			warn_log!("mismatched quotes in template expression {:?}", block);
		}
		if inner.is_empty() {
			push_static(&mut segments, block);
		} else {
			segments.push(ParsedMustache {
				kind: SegmentKind::Expression,
				content: block.to_string(),
				expression: Some(inner.to_string()),
			});
		}
		cursor = scan.end;
	}
	push_static(&mut segments, &content[cursor..]);

	if segments.is_empty() {
		segments.push(ParsedMustache::literal(content));
	}
	segments
}

static ENTITY: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("valid entity pattern"));

/// Decodes named and numeric HTML character references.
///
/// Unknown named references are left untouched.
pub fn decode_entities(html: &str) -> String {
	ENTITY
		.replace_all(html, |caps: &Captures<'_>| {
			let name = &caps[1];
			let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
				u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
			} else if let Some(dec) = name.strip_prefix('#') {
				dec.parse::<u32>().ok().and_then(char::from_u32)
			} else {
				match name {
					"amp" => Some('&'),
					"lt" => Some('<'),
					"gt" => Some('>'),
					"quot" => Some('"'),
					"apos" => Some('\''),
					"nbsp" => Some('\u{a0}'),
					"copy" => Some('©'),
					_ => None,
				}
			};
			decoded.map_or_else(|| caps[0].to_string(), String::from)
		})
		.into_owned()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};

	#[fixture]
	fn parser() -> MustacheParser {
		MustacheParser::with_capacity(16)
	}

	fn kinds(segments: &[ParsedMustache]) -> Vec<SegmentKind> {
		segments.iter().map(|s| s.kind).collect()
	}

	#[rstest]
	fn test_static_only_is_one_segment(mut parser: MustacheParser) {
		let segments = parser.parse("plain { text } here");
		assert_eq!(segments.len(), 1);
		assert_eq!(segments[0].content, "plain { text } here");
		assert_eq!(segments[0].expression, None);
	}

	#[rstest]
	fn test_mixed_segments(mut parser: MustacheParser) {
		let segments = parser.parse("Count: {{ count }} of {{total}}");
		assert_eq!(
			kinds(&segments),
			vec![
				SegmentKind::Static,
				SegmentKind::Expression,
				SegmentKind::Static,
				SegmentKind::Expression
			]
		);
		assert_eq!(segments[1].content, "{{ count }}");
		assert_eq!(segments[3].expression.as_deref(), Some("total"));
	}

	#[rstest]
	#[case("{{ {a: 1}.a }}", "{a: 1}.a")]
	#[case("{{ cond ? '}}' : \"{{\" }}", "cond ? '}}' : \"{{\"")]
	#[case("{{ `${x}` }}", "`${x}`")]
	fn test_nested_braces_and_quotes(
		mut parser: MustacheParser,
		#[case] source: &str,
		#[case] expected: &str,
	) {
		assert_eq!(parser.is_single_expression(source).as_deref(), Some(expected));
	}

	#[rstest]
	fn test_mismatched_quote_still_parses(mut parser: MustacheParser) {
		let segments = parser.parse("{{ name === 'x }} tail");
		assert_eq!(kinds(&segments), vec![SegmentKind::Expression, SegmentKind::Static]);
		assert_eq!(segments[0].expression.as_deref(), Some("name === 'x"));
	}

	#[rstest]
	#[case("{{ \"it's\" }}", false)]
	#[case("{{ `don't` + 'a\\'b' }}", false)]
	#[case("{{ name === 'x }}", true)]
	fn test_quote_scan_reports_only_unterminated_quotes(
		#[case] source: &str,
		#[case] mismatched: bool,
	) {
		let scan = scan_expression(source, MUSTACHE_OPEN.len()).unwrap();
		assert_eq!(scan.end, source.len());
		assert_eq!(scan.mismatched_quotes, mismatched);
	}

	#[rstest]
	#[case("{{ x + 1 }}", Some("x + 1"))]
	#[case("  {{ x }}  ", Some("x"))]
	#[case("a {{ x }}", None)]
	#[case("{{ a }}{{ b }}", None)]
	#[case("{{ }}", None)]
	#[case("{{ unclosed", None)]
	fn test_is_single_expression(
		mut parser: MustacheParser,
		#[case] source: &str,
		#[case] expected: Option<&str>,
	) {
		assert_eq!(parser.is_single_expression(source).as_deref(), expected);
	}

	#[rstest]
	fn test_cache_keyed_by_full_source(mut parser: MustacheParser) {
		parser.parse("{{ a }}");
		let longer = parser.parse("{{ a }} and more");
		assert_eq!(longer.len(), 2);
		parser.parse("{{ a }}");
		assert_eq!(parser.cache_stats().hits, 1);
	}

	#[rstest]
	fn test_extract_expressions(mut parser: MustacheParser) {
		assert_eq!(
			parser.extract_expressions("{{ a }}-{{ b.c }}-{{ }}"),
			vec!["a".to_string(), "b.c".to_string()]
		);
	}

	#[rstest]
	#[case("a &amp; b", "a & b")]
	#[case("&lt;p&gt;", "<p>")]
	#[case("&#65;&#x42;", "AB")]
	#[case("&unknown; &quot;", "&unknown; \"")]
	fn test_decode_entities(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(decode_entities(input), expected);
	}
}
