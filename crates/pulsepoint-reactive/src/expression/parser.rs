//! Tokenizer and recursive-descent parser for binding expressions.

use std::collections::BTreeSet;

use super::EvalError;
use super::ast::{BinaryOp, Expr, LogicalOp, TemplatePiece, UnaryOp};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Chunk {
	Text(String),
	Code(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Number(f64),
	Str(String),
	Template(Vec<Chunk>),
	Ident(String),
	Punct(&'static str),
}

const PUNCTUATORS: &[&str] = &[
	"===", "!==", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "(", ")", "[", "]",
	"{", "}", ".", ",", ":", "?", "+", "-", "*", "/", "%", "<", ">", "!", "=",
];

struct Lexer<'a> {
	source: &'a str,
	chars: Vec<char>,
	pos: usize,
}

impl<'a> Lexer<'a> {
	fn new(source: &'a str) -> Self {
		Self {
			source,
			chars: source.chars().collect(),
			pos: 0,
		}
	}

	fn error(&self, message: impl Into<String>) -> EvalError {
		EvalError::Syntax {
			expression: self.source.to_string(),
			message: message.into(),
		}
	}

	fn peek_at(&self, offset: usize) -> Option<char> {
		self.chars.get(self.pos + offset).copied()
	}

	fn tokenize(mut self) -> Result<Vec<Token>, EvalError> {
		let mut tokens = Vec::new();
		while let Some(c) = self.peek_at(0) {
			if c.is_whitespace() {
				self.pos += 1;
			} else if c.is_ascii_digit()
				|| (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()))
			{
				tokens.push(self.number()?);
			} else if c == '"' || c == '\'' {
				tokens.push(Token::Str(self.string(c)?));
			} else if c == '`' {
				tokens.push(self.template()?);
			} else if c.is_alphabetic() || c == '_' || c == '$' {
				let start = self.pos;
				while self
					.peek_at(0)
					.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
				{
					self.pos += 1;
				}
				tokens.push(Token::Ident(self.chars[start..self.pos].iter().collect()));
			} else {
				let punct = PUNCTUATORS
					.iter()
					.find(|p| {
						p.chars()
							.enumerate()
							.all(|(i, pc)| self.peek_at(i) == Some(pc))
					})
					.ok_or_else(|| self.error(format!("unexpected character `{}`", c)))?;
				// `a?.5:b` is a conditional, not optional chaining.
				if *punct == "?." && self.peek_at(2).is_some_and(|n| n.is_ascii_digit()) {
					tokens.push(Token::Punct("?"));
					self.pos += 1;
				} else {
					tokens.push(Token::Punct(*punct));
					self.pos += punct.chars().count();
				}
			}
		}
		Ok(tokens)
	}

	fn number(&mut self) -> Result<Token, EvalError> {
		let start = self.pos;
		if self.peek_at(0) == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
			self.pos += 2;
			let digits_start = self.pos;
			while self.peek_at(0).is_some_and(|c| c.is_ascii_hexdigit()) {
				self.pos += 1;
			}
			let digits: String = self.chars[digits_start..self.pos].iter().collect();
			return u64::from_str_radix(&digits, 16)
				.map(|n| Token::Number(n as f64))
				.map_err(|_| self.error("malformed hex literal"));
		}
		while self.peek_at(0).is_some_and(|c| c.is_ascii_digit() || c == '.') {
			self.pos += 1;
		}
		if matches!(self.peek_at(0), Some('e' | 'E')) {
			self.pos += 1;
			if matches!(self.peek_at(0), Some('+' | '-')) {
				self.pos += 1;
			}
			while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
				self.pos += 1;
			}
		}
		let text: String = self.chars[start..self.pos].iter().collect();
		text.parse()
			.map(Token::Number)
			.map_err(|_| self.error(format!("malformed number `{}`", text)))
	}

	fn escape(&mut self) -> Result<char, EvalError> {
		let c = self
			.peek_at(0)
			.ok_or_else(|| self.error("unterminated escape"))?;
		self.pos += 1;
		Ok(match c {
			'n' => '\n',
			't' => '\t',
			'r' => '\r',
			'0' => '\0',
			'u' => {
				let hex: String = (0..4).filter_map(|i| self.peek_at(i)).collect();
				self.pos += hex.len();
				u32::from_str_radix(&hex, 16)
					.ok()
					.and_then(char::from_u32)
					.ok_or_else(|| self.error("malformed unicode escape"))?
			}
			other => other,
		})
	}

	fn string(&mut self, quote: char) -> Result<String, EvalError> {
		self.pos += 1;
		let mut out = String::new();
		loop {
			match self.peek_at(0) {
				None => return Err(self.error("unterminated string literal")),
				Some(c) if c == quote => {
					self.pos += 1;
					return Ok(out);
				}
				Some('\\') => {
					self.pos += 1;
					out.push(self.escape()?);
				}
				Some(c) => {
					out.push(c);
					self.pos += 1;
				}
			}
		}
	}

	fn template(&mut self) -> Result<Token, EvalError> {
		self.pos += 1;
		let mut chunks = Vec::new();
		let mut text = String::new();
		loop {
			match self.peek_at(0) {
				None => return Err(self.error("unterminated template literal")),
				Some('`') => {
					self.pos += 1;
					if !text.is_empty() {
						chunks.push(Chunk::Text(text));
					}
					return Ok(Token::Template(chunks));
				}
				Some('\\') => {
					self.pos += 1;
					text.push(self.escape()?);
				}
				Some('$') if self.peek_at(1) == Some('{') => {
					self.pos += 2;
					if !text.is_empty() {
						chunks.push(Chunk::Text(std::mem::take(&mut text)));
					}
					chunks.push(Chunk::Code(self.interpolation()?));
				}
				Some(c) => {
					text.push(c);
					self.pos += 1;
				}
			}
		}
	}

	fn interpolation(&mut self) -> Result<String, EvalError> {
		let start = self.pos;
		let mut depth = 0usize;
		let mut quote: Option<char> = None;
		while let Some(c) = self.peek_at(0) {
			match (quote, c) {
				(Some(q), _) if c == q => quote = None,
				(Some(_), '\\') => self.pos += 1,
				(Some(_), _) => {}
				(None, '"' | '\'' | '`') => quote = Some(c),
				(None, '{') => depth += 1,
				(None, '}') if depth == 0 => {
					let code = self.chars[start..self.pos].iter().collect();
					self.pos += 1;
					return Ok(code);
				}
				(None, '}') => depth -= 1,
				_ => {}
			}
			self.pos += 1;
		}
		Err(self.error("unterminated template interpolation"))
	}
}

struct Parser<'a> {
	source: &'a str,
	tokens: Vec<Token>,
	pos: usize,
}

fn binary_precedence(punct: &str) -> Option<u8> {
	Some(match punct {
		"??" | "||" => 1,
		"&&" => 2,
		"==" | "!=" | "===" | "!==" => 3,
		"<" | "<=" | ">" | ">=" => 4,
		"+" | "-" => 5,
		"*" | "/" | "%" => 6,
		_ => return None,
	})
}

impl<'a> Parser<'a> {
	fn error(&self, message: impl Into<String>) -> EvalError {
		EvalError::Syntax {
			expression: self.source.to_string(),
			message: message.into(),
		}
	}

	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn peek_punct(&self) -> Option<&'static str> {
		match self.peek() {
			Some(Token::Punct(p)) => Some(*p),
			_ => None,
		}
	}

	fn eat(&mut self, punct: &str) -> bool {
		if self.peek_punct() == Some(punct) {
			self.pos += 1;
			true
		} else {
			false
		}
	}

	fn expect(&mut self, punct: &str) -> Result<(), EvalError> {
		if self.eat(punct) {
			Ok(())
		} else {
			Err(self.error(format!("expected `{}`", punct)))
		}
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.pos).cloned();
		self.pos += 1;
		token
	}

	fn expression(&mut self) -> Result<Expr, EvalError> {
		let test = self.binary(1)?;
		if !self.eat("?") {
			return Ok(test);
		}
		let consequent = self.expression()?;
		self.expect(":")?;
		let alternate = self.expression()?;
		Ok(Expr::Conditional {
			test: Box::new(test),
			consequent: Box::new(consequent),
			alternate: Box::new(alternate),
		})
	}

	fn binary(&mut self, min: u8) -> Result<Expr, EvalError> {
		let mut left = self.unary()?;
		while let Some(punct) = self.peek_punct() {
			let Some(precedence) = binary_precedence(punct).filter(|p| *p >= min) else {
				break;
			};
			self.pos += 1;
			let right = Box::new(self.binary(precedence + 1)?);
			let lhs = Box::new(left);
			left = match punct {
				"&&" => Expr::Logical { op: LogicalOp::And, left: lhs, right },
				"||" => Expr::Logical { op: LogicalOp::Or, left: lhs, right },
				"??" => Expr::Logical { op: LogicalOp::Nullish, left: lhs, right },
				_ => Expr::Binary {
					op: match punct {
						"+" => BinaryOp::Add,
						"-" => BinaryOp::Sub,
						"*" => BinaryOp::Mul,
						"/" => BinaryOp::Div,
						"%" => BinaryOp::Rem,
						"<" => BinaryOp::Lt,
						"<=" => BinaryOp::Le,
						">" => BinaryOp::Gt,
						">=" => BinaryOp::Ge,
						"==" => BinaryOp::LooseEq,
						"!=" => BinaryOp::LooseNe,
						"===" => BinaryOp::StrictEq,
						_ => BinaryOp::StrictNe,
					},
					left: lhs,
					right,
				},
			};
		}
		Ok(left)
	}

	fn unary(&mut self) -> Result<Expr, EvalError> {
		let op = match self.peek() {
			Some(Token::Punct("!")) => UnaryOp::Not,
			Some(Token::Punct("-")) => UnaryOp::Neg,
			Some(Token::Punct("+")) => UnaryOp::Plus,
			Some(Token::Ident(name)) if name == "typeof" => UnaryOp::TypeOf,
			_ => return self.postfix(),
		};
		self.pos += 1;
		Ok(Expr::Unary {
			op,
			operand: Box::new(self.unary()?),
		})
	}

	fn property_name(&mut self) -> Result<String, EvalError> {
		match self.next() {
			Some(Token::Ident(name)) => Ok(name),
			_ => Err(self.error("expected property name")),
		}
	}

	fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
		let mut args = Vec::new();
		while !self.eat(")") {
			args.push(self.expression()?);
			if !self.eat(",") {
				self.expect(")")?;
				break;
			}
		}
		Ok(args)
	}

	fn postfix(&mut self) -> Result<Expr, EvalError> {
		let mut expr = self.primary()?;
		loop {
			if self.eat(".") {
				let property = self.property_name()?;
				expr = Expr::Member {
					object: Box::new(expr),
					property,
					optional: false,
				};
			} else if self.eat("?.") {
				if self.eat("(") {
					let args = self.arguments()?;
					expr = Expr::Call { callee: Box::new(expr), args, optional: true };
				} else if self.eat("[") {
					let index = self.expression()?;
					self.expect("]")?;
					expr = Expr::Index {
						object: Box::new(expr),
						index: Box::new(index),
						optional: true,
					};
				} else {
					let property = self.property_name()?;
					expr = Expr::Member {
						object: Box::new(expr),
						property,
						optional: true,
					};
				}
			} else if self.eat("[") {
				let index = self.expression()?;
				self.expect("]")?;
				expr = Expr::Index {
					object: Box::new(expr),
					index: Box::new(index),
					optional: false,
				};
			} else if self.eat("(") {
				let args = self.arguments()?;
				expr = Expr::Call { callee: Box::new(expr), args, optional: false };
			} else {
				return Ok(expr);
			}
		}
	}

	fn primary(&mut self) -> Result<Expr, EvalError> {
		match self.next() {
			Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
			Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
			Some(Token::Template(chunks)) => {
				let pieces = chunks
					.into_iter()
					.map(|chunk| match chunk {
						Chunk::Text(text) => Ok(TemplatePiece::Text(text)),
						Chunk::Code(code) => parse_tree(&code).map(TemplatePiece::Code),
					})
					.collect::<Result<Vec<_>, _>>()?;
				Ok(Expr::Template(pieces))
			}
			Some(Token::Ident(name)) => match name.as_str() {
				"true" => Ok(Expr::Literal(Value::Bool(true))),
				"false" => Ok(Expr::Literal(Value::Bool(false))),
				"null" => Ok(Expr::Literal(Value::Null)),
				"undefined" => Ok(Expr::Literal(Value::Undefined)),
				"new" | "function" | "class" | "delete" | "void" | "await" | "yield" => {
					Err(EvalError::Unsupported(format!("`{}` expressions", name)))
				}
				_ => Ok(Expr::Ident { name, slot: 0 }),
			},
			Some(Token::Punct("(")) => {
				let inner = self.expression()?;
				self.expect(")")?;
				Ok(inner)
			}
			Some(Token::Punct("[")) => {
				let mut items = Vec::new();
				while !self.eat("]") {
					if self.peek_punct() == Some("...") {
						return Err(EvalError::Unsupported("spread elements".to_string()));
					}
					items.push(self.expression()?);
					if !self.eat(",") {
						self.expect("]")?;
						break;
					}
				}
				Ok(Expr::Array(items))
			}
			Some(Token::Punct("{")) => {
				let mut props = Vec::new();
				while !self.eat("}") {
					let key = match self.next() {
						Some(Token::Ident(name)) => name,
						Some(Token::Str(s)) => s,
						Some(Token::Number(n)) => crate::value::format_number(n),
						Some(Token::Punct("...")) => {
							return Err(EvalError::Unsupported("object spread".to_string()));
						}
						_ => return Err(self.error("expected object key")),
					};
					let value = if self.eat(":") {
						self.expression()?
					} else {
						Expr::Ident { name: key.clone(), slot: 0 }
					};
					props.push((key, value));
					if !self.eat(",") {
						self.expect("}")?;
						break;
					}
				}
				Ok(Expr::Object(props))
			}
			Some(token) => Err(self.error(format!("unexpected token {:?}", token))),
			None => Err(self.error("unexpected end of expression")),
		}
	}
}

/// Parses without binding identifier slots.
fn parse_tree(source: &str) -> Result<Expr, EvalError> {
	let tokens = Lexer::new(source).tokenize()?;
	if tokens.iter().any(|t| *t == Token::Punct("=>")) {
		return Err(EvalError::Unsupported("arrow functions".to_string()));
	}
	if tokens.is_empty() {
		return Err(EvalError::Syntax {
			expression: source.to_string(),
			message: "empty expression".to_string(),
		});
	}
	let mut parser = Parser {
		source,
		tokens,
		pos: 0,
	};
	let expr = parser.expression()?;
	match parser.peek() {
		None => Ok(expr),
		Some(Token::Punct("=")) => Err(EvalError::Unsupported("assignment".to_string())),
		Some(token) => Err(parser.error(format!("unexpected token {:?}", token))),
	}
}

/// Parses an expression and binds its free identifiers to sorted slots.
///
/// Returns the tree and the parameter names in slot order.
pub(crate) fn parse(source: &str) -> Result<(Expr, Vec<String>), EvalError> {
	let mut expr = parse_tree(source)?;
	let mut names = BTreeSet::new();
	expr.free_identifiers(&mut names);
	let params: Vec<String> = names.into_iter().collect();
	expr.bind_slots(&params);
	Ok((expr, params))
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("a + b * c", vec!["a", "b", "c"])]
	#[case("user.name ?? fallback", vec!["fallback", "user"])]
	#[case("`${first} ${last}`", vec!["first", "last"])]
	#[case("{ id, label: title }", vec!["id", "title"])]
	#[case("items.filter", vec!["items"])]
	#[case("1 + 2", vec![])]
	fn test_parameters_sorted(#[case] source: &str, #[case] expected: Vec<&str>) {
		let (_, params) = parse(source).unwrap();
		assert_eq!(params, expected);
	}

	#[rstest]
	#[case("a => a")]
	#[case("x = 1")]
	#[case("new Date()")]
	#[case("[...items]")]
	fn test_unsupported(#[case] source: &str) {
		assert!(matches!(parse(source), Err(EvalError::Unsupported(_))));
	}

	#[rstest]
	#[case("a +")]
	#[case("(a")]
	#[case("'open")]
	#[case("a b")]
	#[case("")]
	#[case("#")]
	fn test_syntax_errors(#[case] source: &str) {
		assert!(matches!(parse(source), Err(EvalError::Syntax { .. })));
	}

	#[rstest]
	fn test_precedence_shape() {
		let (expr, _) = parse("a || b && c").unwrap();
		assert!(matches!(
			expr,
			Expr::Logical { op: LogicalOp::Or, ref right, .. }
				if matches!(**right, Expr::Logical { op: LogicalOp::And, .. })
		));
	}

	#[rstest]
	fn test_slots_bound() {
		let (expr, params) = parse("b - a").unwrap();
		assert_eq!(params, vec!["a", "b"]);
		match expr {
			Expr::Binary { left, right, .. } => {
				assert!(matches!(*left, Expr::Ident { slot: 1, .. }));
				assert!(matches!(*right, Expr::Ident { slot: 0, .. }));
			}
			other => panic!("unexpected {:?}", other),
		}
	}
}
