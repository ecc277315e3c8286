//! Binding-expression compilation, dependency extraction and evaluation.
//!
//! Expressions are a narrow, side-effect free subset of script syntax:
//! literals, member access, calls, arithmetic, comparison, logical and
//! conditional operators. They are parsed once into a tree whose free
//! identifiers are bound to sorted argument slots, cached per component, and
//! evaluated against a context map.

mod ast;
mod evaluator;
mod interpreter;
mod parser;
mod validator;

use std::collections::HashSet;

use once_cell::sync::Lazy;
use thiserror::Error;

pub use evaluator::{EvalOptions, ExpressionEvaluator, KeyResolver};
pub use validator::{ExpressionValidator, ValidationReport};

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
	/// The expression is malformed.
	#[error("syntax error in `{expression}`: {message}")]
	Syntax {
		/// Offending source.
		expression: String,
		/// Parser diagnostic.
		message: String,
	},
	/// The expression uses syntax outside the binding grammar.
	#[error("unsupported syntax: {0}")]
	Unsupported(String),
	/// An identifier has no binding in the evaluation context.
	#[error("{0} is not defined")]
	Reference(String),
	/// A context key is a reserved word or not a valid identifier.
	#[error("`{0}` is not a valid identifier")]
	InvalidIdentifier(String),
	/// An operation was applied to a value that does not support it.
	#[error("type error: {0}")]
	Type(String),
	/// A native function reported a failure.
	#[error("{0}")]
	Thrown(String),
}

/// Words that can never be bound as context identifiers.
pub static RESERVED_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
	[
		"break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
		"do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
		"implements", "import", "in", "instanceof", "interface", "let", "new", "null", "package",
		"private", "protected", "public", "return", "static", "super", "switch", "this", "throw",
		"true", "try", "typeof", "undefined", "var", "void", "while", "with", "yield", "await",
	]
	.into_iter()
	.collect()
});

/// Whether `name` can be bound as a context identifier.
pub fn is_valid_identifier(name: &str) -> bool {
	let mut chars = name.chars();
	let Some(first) = chars.next() else {
		return false;
	};
	(first.is_alphabetic() || first == '_' || first == '$')
		&& chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
		&& !RESERVED_WORDS.contains(name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("count", true)]
	#[case("_private", true)]
	#[case("$el", true)]
	#[case("item2", true)]
	#[case("2item", false)]
	#[case("my-var", false)]
	#[case("class", false)]
	#[case("typeof", false)]
	#[case("", false)]
	fn test_is_valid_identifier(#[case] name: &str, #[case] expected: bool) {
		assert_eq!(is_valid_identifier(name), expected);
	}
}
