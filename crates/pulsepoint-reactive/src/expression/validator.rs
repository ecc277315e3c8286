//! Static checks run before a binding is activated.

use serde::Serialize;

use super::ast::{BinaryOp, Expr};
use super::parser;
use crate::value::{Value, format_number};
use crate::warn_log;

/// Outcome of [`ExpressionValidator::validate`].
///
/// Errors block activation of the binding; warnings are advisory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
	/// `true` when `errors` is empty.
	pub valid: bool,
	/// Blocking problems.
	pub errors: Vec<String>,
	/// Suspicious but legal constructs.
	pub warnings: Vec<String>,
}

/// Stateless expression validator.
pub struct ExpressionValidator;

impl ExpressionValidator {
	/// Checks `expression` as written in `component`.
	///
	/// # Example
	///
	/// ```
	/// use pulsepoint_reactive::expression::ExpressionValidator;
	///
	/// let report = ExpressionValidator::validate("on ? bg-red-500 : 'x'", "Card");
	/// assert!(report.valid);
	/// assert_eq!(report.warnings.len(), 1);
	///
	/// assert!(!ExpressionValidator::validate("(a + b", "Card").valid);
	/// ```
	pub fn validate(expression: &str, component: &str) -> ValidationReport {
		let mut errors = check_syntax(expression);
		let mut warnings = Vec::new();

		if errors.is_empty() {
			match parser::parse(expression.trim()) {
				Ok((expr, _)) => validate_tree(&expr, &mut warnings),
				Err(err) => errors.push(err.to_string()),
			}
		}

		for warning in &warnings {
			warn_log!("[{}] expression `{}`: {}", component, expression, warning);
		}

		ValidationReport {
			valid: errors.is_empty(),
			errors,
			warnings,
		}
	}
}

/// Bracket balance and string termination, independent of the grammar.
fn check_syntax(expression: &str) -> Vec<String> {
	let mut errors = Vec::new();
	let mut stack: Vec<char> = Vec::new();
	let mut quote: Option<char> = None;
	let mut escaped = false;

	for c in expression.chars() {
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
			'\'' | '"' | '`' => quote = Some(c),
			'(' | '[' | '{' => stack.push(c),
			')' | ']' | '}' => {
				let open = match c {
					')' => '(',
					']' => '[',
					_ => '{',
				};
				if stack.pop() != Some(open) {
					errors.push(format!("unexpected `{}`", c));
					return errors;
				}
			}
			_ => {}
		}
	}

	if let Some(q) = quote {
		errors.push(format!("unterminated string literal (missing {})", q));
	}
	for open in stack.iter().rev() {
		let kind = match open {
			'(' => "parenthesis",
			'[' => "bracket",
			_ => "brace",
		};
		errors.push(format!("unclosed {} `{}`", kind, open));
	}
	errors
}

fn validate_tree(expr: &Expr, warnings: &mut Vec<String>) {
	if let Expr::Conditional {
		consequent,
		alternate,
		..
	} = expr
	{
		for branch in [consequent.as_ref(), alternate.as_ref()] {
			if let Some(word) = unquoted_hyphenated_word(branch) {
				warnings.push(format!(
					"ternary branch `{}` looks like an unquoted string; did you mean '{}'?",
					word.replace('-', " - "),
					word
				));
			}
		}
	}
	for child in expr.children() {
		validate_tree(child, warnings);
	}
}

/// `bg-red-500` parses as `bg - red - 500`; rebuild the word when the
/// branch is a subtraction chain of bare identifiers and integers.
fn unquoted_hyphenated_word(expr: &Expr) -> Option<String> {
	fn segment(expr: &Expr) -> Option<String> {
		match expr {
			Expr::Ident { name, .. } => Some(name.clone()),
			Expr::Literal(Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
				Some(format_number(*n))
			}
			Expr::Binary {
				op: BinaryOp::Sub,
				left,
				right,
			} => Some(format!("{}-{}", segment(left)?, segment(right)?)),
			_ => None,
		}
	}

	match expr {
		Expr::Binary {
			op: BinaryOp::Sub, ..
		} => {
			let word = segment(expr)?;
			word.starts_with(|c: char| c.is_alphabetic()).then_some(word)
		}
		_ => None,
	}
}
