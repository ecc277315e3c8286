//! Dynamic values flowing through state, expressions and bindings.
//!
//! [`Value`] is a closed tagged union: everything the state store holds or an
//! expression produces is one of its variants, so equality, truthiness and
//! string conversion are total functions.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::expression::EvalError;
use crate::state::StateGetter;

/// Native function callable from expressions.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, EvalError>;

/// A named, reference-counted native function.
///
/// Two `FunctionRef`s are equal only when they share the same allocation.
#[derive(Clone)]
pub struct FunctionRef {
	name: Rc<str>,
	func: Rc<NativeFn>,
}

impl FunctionRef {
	/// Wraps a closure.
	pub fn new<F>(name: impl Into<Rc<str>>, func: F) -> Self
	where
		F: Fn(&[Value]) -> Result<Value, EvalError> + 'static,
	{
		Self {
			name: name.into(),
			func: Rc::new(func),
		}
	}

	/// Function name used in diagnostics.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Invokes the function.
	pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
		(self.func)(args)
	}

	/// Identity comparison.
	pub fn ptr_eq(&self, other: &FunctionRef) -> bool {
		Rc::ptr_eq(&self.func, &other.func)
	}
}

impl fmt::Debug for FunctionRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "FunctionRef({})", self.name)
	}
}

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
	/// Absent value.
	#[default]
	Undefined,
	/// Explicit null.
	Null,
	/// Boolean.
	Bool(bool),
	/// IEEE-754 double, the only numeric type.
	Number(f64),
	/// UTF-8 string.
	String(String),
	/// Ordered list.
	Array(Vec<Value>),
	/// String-keyed map with deterministic iteration order.
	Object(BTreeMap<String, Value>),
	/// Native function.
	Function(FunctionRef),
	/// Live reference to a state key.
	Getter(StateGetter),
}

impl Value {
	/// Builds an object from key/value pairs.
	pub fn object<K, I>(pairs: I) -> Value
	where
		K: Into<String>,
		I: IntoIterator<Item = (K, Value)>,
	{
		Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
	}

	/// Whether the value is `undefined` or `null`.
	pub fn is_nullish(&self) -> bool {
		matches!(self, Value::Undefined | Value::Null)
	}

	/// Truthiness with script semantics.
	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Undefined | Value::Null => false,
			Value::Bool(b) => *b,
			Value::Number(n) => *n != 0.0 && !n.is_nan(),
			Value::String(s) => !s.is_empty(),
			Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Getter(_) => true,
		}
	}

	/// Result of the `typeof` operator.
	pub fn type_of(&self) -> &'static str {
		match self {
			Value::Undefined => "undefined",
			Value::Null | Value::Array(_) | Value::Object(_) => "object",
			Value::Bool(_) => "boolean",
			Value::Number(_) => "number",
			Value::String(_) => "string",
			Value::Function(_) | Value::Getter(_) => "function",
		}
	}

	/// Numeric coercion.
	pub fn to_number(&self) -> f64 {
		match self {
			Value::Undefined => f64::NAN,
			Value::Null => 0.0,
			Value::Bool(b) => f64::from(u8::from(*b)),
			Value::Number(n) => *n,
			Value::String(s) => {
				let trimmed = s.trim();
				if trimmed.is_empty() {
					0.0
				} else {
					trimmed.parse().unwrap_or(f64::NAN)
				}
			}
			Value::Array(items) if items.is_empty() => 0.0,
			Value::Array(items) if items.len() == 1 => items[0].to_number(),
			Value::Getter(getter) => getter.get().to_number(),
			_ => f64::NAN,
		}
	}

	/// Text rendered into the document for this value.
	///
	/// `undefined` and `null` render as nothing; integral numbers render
	/// without a fractional part; objects render as JSON.
	pub fn to_display_string(&self) -> String {
		match self {
			Value::Undefined | Value::Null => String::new(),
			Value::Bool(b) => b.to_string(),
			Value::Number(n) => format_number(*n),
			Value::String(s) => s.clone(),
			Value::Array(items) => items
				.iter()
				.map(Value::to_display_string)
				.collect::<Vec<_>>()
				.join(","),
			Value::Object(_) => self.to_json().to_string(),
			Value::Function(func) => format!("function {}()", func.name()),
			Value::Getter(getter) => getter.get().to_display_string(),
		}
	}

	/// Converts to JSON. Functions and `undefined` become `null`.
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			Value::Undefined | Value::Null | Value::Function(_) => serde_json::Value::Null,
			Value::Bool(b) => serde_json::Value::Bool(*b),
			Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
				serde_json::Value::Number(serde_json::Number::from(*n as i64))
			}
			Value::Number(n) => serde_json::Number::from_f64(*n)
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			Value::String(s) => serde_json::Value::String(s.clone()),
			Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
			Value::Object(map) => serde_json::Value::Object(
				map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
			),
			Value::Getter(getter) => getter.get().to_json(),
		}
	}

	/// Reads a property the way member access does.
	pub fn get_property(&self, name: &str) -> Value {
		match self {
			Value::Object(map) => map.get(name).cloned().unwrap_or_default(),
			Value::Array(items) => match name {
				"length" => Value::Number(items.len() as f64),
				_ => name
					.parse::<usize>()
					.ok()
					.and_then(|i| items.get(i).cloned())
					.unwrap_or_default(),
			},
			Value::String(s) => match name {
				"length" => Value::Number(s.chars().count() as f64),
				_ => name
					.parse::<usize>()
					.ok()
					.and_then(|i| s.chars().nth(i))
					.map(|c| Value::String(c.to_string()))
					.unwrap_or_default(),
			},
			Value::Getter(getter) => match name {
				"value" => getter.get(),
				_ => getter.get().get_property(name),
			},
			_ => Value::Undefined,
		}
	}

	/// Follows a dotted path (`user.address.city`).
	pub fn get_path(&self, path: &str) -> Value {
		if path.is_empty() {
			return self.clone();
		}
		path.split('.')
			.fold(self.clone(), |current, segment| current.get_property(segment))
	}
}

/// Formats a number the way script engines print it.
pub fn format_number(n: f64) -> String {
	if n.is_nan() {
		"NaN".to_string()
	} else if n.is_infinite() {
		(if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
	} else if n == 0.0 {
		"0".to_string()
	} else if n.fract() == 0.0 && n.abs() < 1e21 {
		format!("{:.0}", n)
	} else {
		n.to_string()
	}
}

/// Structural equality used to decide whether a write is a change.
///
/// Functions compare by identity, getters by the key they read, and `NaN`
/// equals itself so a repeated `NaN` write is not a change.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
		(Value::Bool(x), Value::Bool(y)) => x == y,
		(Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
		(Value::String(x), Value::String(y)) => x == y,
		(Value::Array(x), Value::Array(y)) => {
			x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
		}
		(Value::Object(x), Value::Object(y)) => {
			x.len() == y.len()
				&& x.iter()
					.zip(y)
					.all(|((lk, lv), (rk, rv))| lk == rk && deep_equal(lv, rv))
		}
		(Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
		(Value::Getter(x), Value::Getter(y)) => x.full_key() == y.full_key(),
		_ => false,
	}
}

/// `===` semantics. Aggregates compare structurally.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => x == y,
		_ => deep_equal(a, b),
	}
}

/// `==` semantics: `null == undefined`, numeric coercion across primitives.
pub fn loose_equals(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(l, r) if l.is_nullish() && r.is_nullish() => true,
		(l, r) if l.is_nullish() || r.is_nullish() => false,
		(Value::Number(_), Value::String(_))
		| (Value::String(_), Value::Number(_))
		| (Value::Bool(_), _)
		| (_, Value::Bool(_)) => a.to_number() == b.to_number(),
		_ => strict_equals(a, b),
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		deep_equal(self, other)
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_display_string())
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::Number(value)
	}
}

macro_rules! impl_from_int {
	($($ty:ty),*) => {
		$(
			impl From<$ty> for Value {
				fn from(value: $ty) -> Self {
					Value::Number(value as f64)
				}
			}
		)*
	};
}

impl_from_int!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::String(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::String(value)
	}
}

impl From<Vec<Value>> for Value {
	fn from(value: Vec<Value>) -> Self {
		Value::Array(value)
	}
}

impl From<BTreeMap<String, Value>> for Value {
	fn from(value: BTreeMap<String, Value>) -> Self {
		Value::Object(value)
	}
}

impl From<StateGetter> for Value {
	fn from(value: StateGetter) -> Self {
		Value::Getter(value)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or(Value::Null)
	}
}

impl From<serde_json::Value> for Value {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
			serde_json::Value::String(s) => Value::String(s),
			serde_json::Value::Array(items) => {
				Value::Array(items.into_iter().map(Value::from).collect())
			}
			serde_json::Value::Object(map) => {
				Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
			}
		}
	}
}

/// Uppercases the first character.
pub fn capitalize(s: &str) -> String {
	let mut chars = s.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

/// Whether the value is a live state reference.
pub fn is_state_getter(value: &Value) -> bool {
	matches!(value, Value::Getter(_))
}

/// Reads through a getter; other values are returned as-is.
pub fn extract_state_value(value: &Value) -> Value {
	match value {
		Value::Getter(getter) => getter.get(),
		other => other.clone(),
	}
}

/// Evaluation modes deciding whether a getter is read through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
	/// Operand of an equality or relational comparison.
	pub for_comparison: bool,
	/// Operand of `&&`, `||`, `??` or `!`.
	pub for_logical: bool,
	/// Read through unconditionally.
	pub force_extract: bool,
}

/// Reads through a getter only when one of the modes asks for it.
pub fn extract_state_value_smart(value: &Value, options: ExtractOptions) -> Value {
	if options.for_comparison || options.for_logical || options.force_extract {
		extract_state_value(value)
	} else {
		value.clone()
	}
}

/// Prepares a context map for evaluation.
///
/// With `smart` set, getters are kept so operators can decide per use;
/// otherwise every getter is read through.
pub fn extract_context_values(
	context: &BTreeMap<String, Value>,
	smart: bool,
) -> BTreeMap<String, Value> {
	let options = ExtractOptions {
		force_extract: !smart,
		..ExtractOptions::default()
	};
	context
		.iter()
		.map(|(k, v)| (k.clone(), extract_state_value_smart(v, options)))
		.collect()
}

static EXTRACTION_OPERATORS: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"&&|\|\||\?\?|[=!]==?|[<>]=?|\?|(^|[^=!])!").expect("valid operator pattern")
});

/// Whether an expression applies operators that need plain values.
pub fn expression_needs_value_extraction(expression: &str) -> bool {
	EXTRACTION_OPERATORS.is_match(expression)
}
