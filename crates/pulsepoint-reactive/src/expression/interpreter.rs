//! Tree-walking evaluation over slot-bound arguments.

use std::cmp::Ordering;

use super::EvalError;
use super::ast::{BinaryOp, Expr, LogicalOp, TemplatePiece, UnaryOp};
use crate::value::{
	ExtractOptions, Value, extract_state_value, extract_state_value_smart, format_number,
	loose_equals, strict_equals,
};

const LOGICAL: ExtractOptions = ExtractOptions {
	for_comparison: false,
	for_logical: true,
	force_extract: false,
};

const COMPARISON: ExtractOptions = ExtractOptions {
	for_comparison: true,
	for_logical: false,
	force_extract: false,
};

/// String conversion used by `+` and template literals.
fn concat_string(value: &Value) -> String {
	match value {
		Value::Undefined => "undefined".to_string(),
		Value::Null => "null".to_string(),
		other => other.to_display_string(),
	}
}

fn property_key(value: &Value) -> String {
	match value {
		Value::Number(n) => format_number(*n),
		other => concat_string(other),
	}
}

pub(crate) struct Interpreter<'a> {
	args: &'a [Value],
	params: &'a [String],
}

impl<'a> Interpreter<'a> {
	pub(crate) fn new(params: &'a [String], args: &'a [Value]) -> Self {
		Self { args, params }
	}

	pub(crate) fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
		match expr {
			Expr::Literal(value) => Ok(value.clone()),
			Expr::Ident { name, slot } => match self.args.get(*slot) {
				Some(value) if self.params.get(*slot) == Some(name) => Ok(value.clone()),
				_ => Err(EvalError::Reference(name.clone())),
			},
			Expr::Template(pieces) => {
				let mut out = String::new();
				for piece in pieces {
					match piece {
						TemplatePiece::Text(text) => out.push_str(text),
						TemplatePiece::Code(code) => {
							let value = extract_state_value(&self.eval(code)?);
							out.push_str(&concat_string(&value));
						}
					}
				}
				Ok(Value::String(out))
			}
			Expr::Array(items) => items
				.iter()
				.map(|item| self.eval(item))
				.collect::<Result<Vec<_>, _>>()
				.map(Value::Array),
			Expr::Object(props) => {
				let mut map = std::collections::BTreeMap::new();
				for (key, value) in props {
					map.insert(key.clone(), self.eval(value)?);
				}
				Ok(Value::Object(map))
			}
			Expr::Member {
				object,
				property,
				optional,
			} => {
				let target = self.eval(object)?;
				self.member(&target, property, *optional)
			}
			Expr::Index {
				object,
				index,
				optional,
			} => {
				let target = self.eval(object)?;
				let key = extract_state_value(&self.eval(index)?);
				self.member(&target, &property_key(&key), *optional)
			}
			Expr::Call {
				callee,
				args,
				optional,
			} => self.call(callee, args, *optional),
			Expr::Unary { op, operand } => {
				let value = extract_state_value_smart(&self.eval(operand)?, LOGICAL);
				Ok(match op {
					UnaryOp::Not => Value::Bool(!value.is_truthy()),
					UnaryOp::Neg => Value::Number(-value.to_number()),
					UnaryOp::Plus => Value::Number(value.to_number()),
					UnaryOp::TypeOf => Value::String(value.type_of().to_string()),
				})
			}
			Expr::Binary { op, left, right } => {
				let l = extract_state_value_smart(&self.eval(left)?, COMPARISON);
				let r = extract_state_value_smart(&self.eval(right)?, COMPARISON);
				Ok(binary(*op, &l, &r))
			}
			Expr::Logical { op, left, right } => {
				let l = extract_state_value_smart(&self.eval(left)?, LOGICAL);
				let short_circuit = match op {
					LogicalOp::And => !l.is_truthy(),
					LogicalOp::Or => l.is_truthy(),
					LogicalOp::Nullish => !l.is_nullish(),
				};
				if short_circuit {
					Ok(l)
				} else {
					Ok(extract_state_value_smart(&self.eval(right)?, LOGICAL))
				}
			}
			Expr::Conditional {
				test,
				consequent,
				alternate,
			} => {
				let condition = extract_state_value_smart(&self.eval(test)?, LOGICAL);
				if condition.is_truthy() {
					self.eval(consequent)
				} else {
					self.eval(alternate)
				}
			}
		}
	}

	fn member(&self, target: &Value, property: &str, optional: bool) -> Result<Value, EvalError> {
		match target {
			Value::Getter(_) => Ok(target.get_property(property)),
			value if value.is_nullish() => {
				if optional {
					Ok(Value::Undefined)
				} else {
					Err(EvalError::Type(format!(
						"cannot read properties of {} (reading '{}')",
						concat_string(value),
						property
					)))
				}
			}
			value => Ok(value.get_property(property)),
		}
	}

	fn call(&self, callee: &Expr, args: &[Expr], optional: bool) -> Result<Value, EvalError> {
		let args = args
			.iter()
			.map(|arg| self.eval(arg).map(|v| extract_state_value(&v)))
			.collect::<Result<Vec<_>, _>>()?;

		if let Expr::Member {
			object,
			property,
			optional: optional_member,
		} = callee
		{
			let receiver = extract_state_value(&self.eval(object)?);
			if receiver.is_nullish() && (*optional_member || optional) {
				return Ok(Value::Undefined);
			}
			if let Value::Object(map) = &receiver {
				if let Some(Value::Function(func)) = map.get(property) {
					return func.call(&args);
				}
			}
			return builtin_method(&receiver, property, &args);
		}

		match self.eval(callee)? {
			Value::Function(func) => func.call(&args),
			Value::Getter(getter) if args.is_empty() => Ok(getter.get()),
			value if value.is_nullish() && optional => Ok(Value::Undefined),
			value => Err(EvalError::Type(format!(
				"{} is not a function",
				value.type_of()
			))),
		}
	}
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
	match (l, r) {
		(Value::String(a), Value::String(b)) => Some(a.cmp(b)),
		_ => l.to_number().partial_cmp(&r.to_number()),
	}
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
	if op.is_comparison() {
		let result = match op {
			BinaryOp::LooseEq => loose_equals(l, r),
			BinaryOp::LooseNe => !loose_equals(l, r),
			BinaryOp::StrictEq => strict_equals(l, r),
			BinaryOp::StrictNe => !strict_equals(l, r),
			BinaryOp::Lt => compare(l, r) == Some(Ordering::Less),
			BinaryOp::Le => matches!(compare(l, r), Some(Ordering::Less | Ordering::Equal)),
			BinaryOp::Gt => compare(l, r) == Some(Ordering::Greater),
			_ => matches!(compare(l, r), Some(Ordering::Greater | Ordering::Equal)),
		};
		return Value::Bool(result);
	}
	let stringy = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
	match op {
		BinaryOp::Add if stringy(l) || stringy(r) => {
			Value::String(format!("{}{}", concat_string(l), concat_string(r)))
		}
		BinaryOp::Add => Value::Number(l.to_number() + r.to_number()),
		BinaryOp::Sub => Value::Number(l.to_number() - r.to_number()),
		BinaryOp::Mul => Value::Number(l.to_number() * r.to_number()),
		BinaryOp::Div => Value::Number(l.to_number() / r.to_number()),
		_ => Value::Number(l.to_number() % r.to_number()),
	}
}

fn string_arg(args: &[Value], index: usize) -> String {
	args.get(index).map(concat_string).unwrap_or_default()
}

fn builtin_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, EvalError> {
	let unsupported = || {
		Err(EvalError::Type(format!(
			"{}.{} is not a function",
			receiver.type_of(),
			method
		)))
	};
	match receiver {
		Value::String(s) => Ok(match method {
			"toUpperCase" => Value::String(s.to_uppercase()),
			"toLowerCase" => Value::String(s.to_lowercase()),
			"trim" => Value::String(s.trim().to_string()),
			"toString" => Value::String(s.clone()),
			"includes" => Value::Bool(s.contains(&string_arg(args, 0))),
			"startsWith" => Value::Bool(s.starts_with(&string_arg(args, 0))),
			"endsWith" => Value::Bool(s.ends_with(&string_arg(args, 0))),
			"split" => {
				let separator = string_arg(args, 0);
				let parts: Vec<Value> = if separator.is_empty() {
					s.chars().map(|c| Value::String(c.to_string())).collect()
				} else {
					s.split(separator.as_str()).map(Value::from).collect()
				};
				Value::Array(parts)
			}
			_ => return unsupported(),
		}),
		Value::Array(items) => Ok(match method {
			"includes" => {
				let needle = args.first().cloned().unwrap_or_default();
				Value::Bool(items.iter().any(|item| strict_equals(item, &needle)))
			}
			"indexOf" => {
				let needle = args.first().cloned().unwrap_or_default();
				let index = items.iter().position(|item| strict_equals(item, &needle));
				Value::Number(index.map_or(-1.0, |i| i as f64))
			}
			"join" => {
				let separator = args
					.first()
					.filter(|v| !matches!(v, Value::Undefined))
					.map_or_else(|| ",".to_string(), concat_string);
				Value::String(
					items
						.iter()
						.map(Value::to_display_string)
						.collect::<Vec<_>>()
						.join(&separator),
				)
			}
			"toString" => Value::String(receiver.to_display_string()),
			_ => return unsupported(),
		}),
		Value::Number(n) => Ok(match method {
			"toFixed" => {
				let digits = args.first().map_or(0.0, Value::to_number).clamp(0.0, 100.0) as usize;
				Value::String(format!("{:.*}", digits, n))
			}
			"toString" => Value::String(format_number(*n)),
			_ => return unsupported(),
		}),
		Value::Bool(b) if method == "toString" => Ok(Value::String(b.to_string())),
		_ => unsupported(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::expression::parser::parse;
	use crate::value::FunctionRef;
	use rstest::rstest;
	use serde_json::json;

	fn eval_with(source: &str, bindings: &[(&str, Value)]) -> Result<Value, EvalError> {
		let (expr, params) = parse(source)?;
		let args: Vec<Value> = params
			.iter()
			.map(|p| {
				bindings
					.iter()
					.find(|(name, _)| *name == p.as_str())
					.map(|(_, v)| v.clone())
					.unwrap_or_default()
			})
			.collect();
		Interpreter::new(&params, &args).eval(&expr)
	}

	fn eval(source: &str) -> Value {
		eval_with(source, &[]).unwrap()
	}

	#[rstest]
	#[case("1 + 2 * 3", json!(7))]
	#[case("(1 + 2) * 3", json!(9))]
	#[case("'a' + 1", json!("a1"))]
	#[case("7 % 4", json!(3))]
	#[case("1 < 2 && 'yes'", json!("yes"))]
	#[case("0 || 'fallback'", json!("fallback"))]
	#[case("null ?? 0", json!(0))]
	#[case("'' ?? 'x'", json!(""))]
	#[case("1 == '1'", json!(true))]
	#[case("1 === '1'", json!(false))]
	#[case("!0", json!(true))]
	#[case("typeof 'x'", json!("string"))]
	#[case("-'3'", json!(-3))]
	#[case("true ? 'a' : 'b'", json!("a"))]
	#[case("'b' < 'a'", json!(false))]
	#[case("`n=${1 + 1}`", json!("n=2"))]
	#[case("[1, 2, 3].length", json!(3))]
	#[case("{ a: { b: 5 } }.a.b", json!(5))]
	#[case("'Hello'.toUpperCase()", json!("HELLO"))]
	#[case("'a,b'.split(',').join('-')", json!("a-b"))]
	#[case("[1, 2].includes(2)", json!(true))]
	#[case("[1, 2].indexOf(5)", json!(-1))]
	#[case("(1.005).toFixed(1)", json!("1.0"))]
	#[case("' x '.trim().length", json!(1))]
	fn test_eval(#[case] source: &str, #[case] expected: serde_json::Value) {
		assert_eq!(eval(source), Value::from(expected));
	}

	#[rstest]
	fn test_member_on_undefined_is_type_error() {
		let result = eval_with("user.name", &[("user", Value::Undefined)]);
		assert!(matches!(result, Err(EvalError::Type(_))));
		let optional = eval_with("user?.name", &[("user", Value::Undefined)]).unwrap();
		assert_eq!(optional, Value::Undefined);
	}

	#[rstest]
	fn test_native_function_call() {
		let double = FunctionRef::new("double", |args| {
			Ok(Value::Number(args.first().map_or(0.0, Value::to_number) * 2.0))
		});
		let result = eval_with("double(n) + 1", &[
			("double", Value::Function(double)),
			("n", Value::from(4)),
		]);
		assert_eq!(result.unwrap(), Value::from(9));
	}

	#[rstest]
	fn test_calling_non_function_fails() {
		let result = eval_with("n()", &[("n", Value::from(1))]);
		assert!(matches!(result, Err(EvalError::Type(_))));
		let result = eval_with("'x'.nope()", &[]);
		assert!(matches!(result, Err(EvalError::Type(_))));
	}
}
