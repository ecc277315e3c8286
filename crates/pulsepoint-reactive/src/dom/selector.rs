//! Selector subset: type, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`,
//! descendant and child combinators, comma lists.

use super::{Document, DomError, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
	tag: Option<String>,
	id: Option<String>,
	classes: Vec<String>,
	attrs: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
	Descendant,
	Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
	// Rightmost compound last; combinator links a compound to the one before it.
	parts: Vec<(Combinator, Compound)>,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
	alternatives: Vec<Complex>,
}

fn is_name_char(c: char) -> bool {
	c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':'
}

struct Parser<'a> {
	chars: Vec<char>,
	pos: usize,
	source: &'a str,
}

impl<'a> Parser<'a> {
	fn new(source: &'a str) -> Self {
		Self {
			chars: source.chars().collect(),
			pos: 0,
			source,
		}
	}

	fn error(&self) -> DomError {
		DomError::InvalidSelector(self.source.to_string())
	}

	fn peek(&self) -> Option<char> {
		self.chars.get(self.pos).copied()
	}

	fn skip_ws(&mut self) -> bool {
		let start = self.pos;
		while self.peek().is_some_and(char::is_whitespace) {
			self.pos += 1;
		}
		self.pos > start
	}

	fn name(&mut self) -> Result<String, DomError> {
		let start = self.pos;
		while self.peek().is_some_and(is_name_char) {
			self.pos += 1;
		}
		if start == self.pos {
			return Err(self.error());
		}
		Ok(self.chars[start..self.pos].iter().collect())
	}

	fn attr_value(&mut self) -> Result<String, DomError> {
		match self.peek() {
			Some(quote @ ('"' | '\'')) => {
				self.pos += 1;
				let start = self.pos;
				while self.peek().is_some_and(|c| c != quote) {
					self.pos += 1;
				}
				if self.peek() != Some(quote) {
					return Err(self.error());
				}
				let value = self.chars[start..self.pos].iter().collect();
				self.pos += 1;
				Ok(value)
			}
			_ => self.name(),
		}
	}

	fn compound(&mut self) -> Result<Compound, DomError> {
		let mut compound = Compound::default();
		let mut any = false;
		match self.peek() {
			Some('*') => {
				self.pos += 1;
				any = true;
			}
			Some(c) if is_name_char(c) => {
				compound.tag = Some(self.name()?.to_ascii_lowercase());
				any = true;
			}
			_ => {}
		}
		loop {
			match self.peek() {
				Some('#') => {
					self.pos += 1;
					compound.id = Some(self.name()?);
				}
				Some('.') => {
					self.pos += 1;
					compound.classes.push(self.name()?);
				}
				Some('[') => {
					self.pos += 1;
					self.skip_ws();
					let name = self.name()?;
					self.skip_ws();
					let value = if self.peek() == Some('=') {
						self.pos += 1;
						self.skip_ws();
						Some(self.attr_value()?)
					} else {
						None
					};
					self.skip_ws();
					if self.peek() != Some(']') {
						return Err(self.error());
					}
					self.pos += 1;
					compound.attrs.push((name, value));
				}
				_ => break,
			}
			any = true;
		}
		if any { Ok(compound) } else { Err(self.error()) }
	}

	fn complex(&mut self) -> Result<Complex, DomError> {
		let mut parts = Vec::new();
		let mut combinator = Combinator::Descendant;
		self.skip_ws();
		loop {
			parts.push((combinator, self.compound()?));
			let had_ws = self.skip_ws();
			match self.peek() {
				None | Some(',') => break,
				Some('>') => {
					self.pos += 1;
					self.skip_ws();
					combinator = Combinator::Child;
				}
				Some(_) if had_ws => combinator = Combinator::Descendant,
				Some(_) => return Err(self.error()),
			}
		}
		Ok(Complex { parts })
	}
}

impl Selector {
	/// Parses a comma-separated selector list.
	pub fn parse(source: &str) -> Result<Self, DomError> {
		let mut parser = Parser::new(source);
		let mut alternatives = vec![parser.complex()?];
		while parser.peek() == Some(',') {
			parser.pos += 1;
			alternatives.push(parser.complex()?);
		}
		if parser.peek().is_some() {
			return Err(parser.error());
		}
		Ok(Self { alternatives })
	}

	/// Whether `node` matches any alternative.
	pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
		self.alternatives
			.iter()
			.any(|complex| matches_from(doc, node, &complex.parts))
	}
}

fn matches_compound(doc: &Document, node: NodeId, compound: &Compound) -> bool {
	let Some(tag) = doc.tag_name(node) else {
		return false;
	};
	if compound.tag.as_deref().is_some_and(|t| t != tag) {
		return false;
	}
	if let Some(id) = &compound.id {
		if doc.get_attribute(node, "id").as_deref() != Some(id.as_str()) {
			return false;
		}
	}
	if !compound.classes.is_empty() {
		let class_attr = doc.get_attribute(node, "class").unwrap_or_default();
		let classes: Vec<&str> = class_attr.split_whitespace().collect();
		if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
			return false;
		}
	}
	compound.attrs.iter().all(|(name, expected)| {
		match (doc.get_attribute(node, name), expected) {
			(Some(_), None) => true,
			(Some(actual), Some(expected)) => &actual == expected,
			(None, _) => false,
		}
	})
}

fn matches_from(doc: &Document, node: NodeId, parts: &[(Combinator, Compound)]) -> bool {
	let Some(((combinator, last), rest)) = parts.split_last() else {
		return true;
	};
	if !matches_compound(doc, node, last) {
		return false;
	}
	if rest.is_empty() {
		return true;
	}
	match combinator {
		Combinator::Child => doc
			.parent(node)
			.is_some_and(|parent| matches_from(doc, parent, rest)),
		Combinator::Descendant => {
			let mut current = doc.parent(node);
			while let Some(ancestor) = current {
				if matches_from(doc, ancestor, rest) {
					return true;
				}
				current = doc.parent(ancestor);
			}
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("div")]
	#[case("*")]
	#[case("#app")]
	#[case("div.card.active")]
	#[case("[pp-component]")]
	#[case("[pp-component=\"Counter\"]")]
	#[case("script[type='text/pp']")]
	#[case("ul > li, p span")]
	fn test_parse_supported(#[case] source: &str) {
		assert!(Selector::parse(source).is_ok(), "{}", source);
	}

	#[rstest]
	#[case("")]
	#[case("div[")]
	#[case("[a=\"x]")]
	#[case("div ~ p")]
	#[case("a,")]
	fn test_parse_rejects(#[case] source: &str) {
		assert!(matches!(
			Selector::parse(source),
			Err(DomError::InvalidSelector(_))
		));
	}
}
