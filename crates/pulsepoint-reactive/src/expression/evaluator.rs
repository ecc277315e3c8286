//! Cached expression compiler and evaluator.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::ast::Expr;
use super::interpreter::Interpreter;
use super::{EvalError, is_valid_identifier, parser};
use crate::cache::{CacheStats, Cacheable, LruCache};
use crate::config::MAX_CACHE_SIZE;
use crate::debug_log;
use crate::value::{Value, extract_state_value};

/// Resolves bare identifiers to state keys.
///
/// Implemented by the state store; dependency extraction only needs these
/// two questions answered.
pub trait KeyResolver {
	/// Fully-qualified key `name` resolves to from `component`.
	fn find_existing_state_key(&self, name: &str, component: &str) -> Option<String>;

	/// Counter bumped whenever a state key is created or deleted.
	fn key_generation(&self) -> u64;
}

/// Per-call evaluation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalOptions {
	/// Inject getters as-is so the caller receives the getter itself when the
	/// expression is a bare reference. Operators still read through.
	pub preserve_getters: bool,
}

#[derive(Debug)]
struct Compiled {
	expr: Expr,
	params: Vec<String>,
}

#[derive(Debug, Clone)]
struct DependencyEntry {
	dependencies: Rc<[String]>,
	generation: u64,
}

const COMMON_EXPRESSIONS: &[&str] = &[
	"true", "false", "null", "undefined", "0", "1", "''", "\"\"", "[]", "{}",
];

fn cache_key(component: &str, expression: &str) -> String {
	format!("{}::{}", component, expression)
}

/// Compiles, caches and evaluates binding expressions.
///
/// # Example
///
/// ```ignore
/// let mut evaluator = ExpressionEvaluator::new();
/// let context = BTreeMap::from([("count".to_string(), Value::from(2))]);
/// let value = evaluator.evaluate_expression("count * 2", &context, "Counter")?;
/// assert_eq!(value, Value::from(4));
/// ```
#[derive(Debug)]
pub struct ExpressionEvaluator {
	expression_cache: LruCache<String, Rc<Compiled>>,
	dependency_cache: LruCache<String, DependencyEntry>,
	common_cache: LruCache<String, Rc<Compiled>>,
}

impl Default for ExpressionEvaluator {
	fn default() -> Self {
		Self::new()
	}
}

impl ExpressionEvaluator {
	/// Evaluator with the default cache capacity.
	pub fn new() -> Self {
		Self::with_capacity(MAX_CACHE_SIZE)
	}

	/// Evaluator whose caches hold at most `max_size` entries each.
	pub fn with_capacity(max_size: usize) -> Self {
		let mut evaluator = Self {
			expression_cache: LruCache::new(max_size),
			dependency_cache: LruCache::new(max_size),
			common_cache: LruCache::new(COMMON_EXPRESSIONS.len()),
		};
		evaluator.precompile_common_expressions();
		evaluator
	}

	fn precompile_common_expressions(&mut self) {
		for source in COMMON_EXPRESSIONS {
			if let Ok((expr, params)) = parser::parse(source) {
				self.common_cache
					.set(source.to_string(), Rc::new(Compiled { expr, params }));
			}
		}
	}

	fn compile(&mut self, expression: &str, component: &str) -> Result<Rc<Compiled>, EvalError> {
		let normalized = expression.trim();
		if let Some(compiled) = self.common_cache.get(normalized) {
			return Ok(Rc::clone(compiled));
		}
		let key = cache_key(component, normalized);
		if let Some(compiled) = self.expression_cache.get(&key) {
			return Ok(Rc::clone(compiled));
		}
		let (expr, params) = parser::parse(normalized)?;
		let compiled = Rc::new(Compiled { expr, params });
		self.expression_cache.set(key, Rc::clone(&compiled));
		Ok(compiled)
	}

	/// Validates that `expression` compiles, caching the compiled form.
	pub fn precompile(&mut self, expression: &str, component: &str) -> Result<(), EvalError> {
		self.compile(expression, component).map(|_| ())
	}

	/// State keys `expression` reads when evaluated inside `component`.
	///
	/// Identifiers that do not resolve to a state key (locals, functions)
	/// are skipped. Member chains keep their static path so nested writes
	/// can be matched by prefix: `user.name` in `Profile` yields
	/// `Profile.user.name`.
	pub fn extract_dependencies(
		&mut self,
		expression: &str,
		component: &str,
		resolver: &dyn KeyResolver,
	) -> Result<Rc<[String]>, EvalError> {
		let key = cache_key(component, expression.trim());
		let generation = resolver.key_generation();
		if let Some(entry) = self.dependency_cache.get(&key) {
			if entry.generation == generation {
				return Ok(Rc::clone(&entry.dependencies));
			}
			debug_log!("dependency cache entry {} is stale", key);
		}

		let compiled = self.compile(expression, component)?;
		let mut paths = Vec::new();
		collect_paths(&compiled.expr, &mut paths);

		let mut dependencies: Vec<String> = Vec::new();
		for path in paths {
			let (root, rest) = match path.split_once('.') {
				Some((root, rest)) => (root, Some(rest)),
				None => (path.as_str(), None),
			};
			let Some(full_key) = resolver.find_existing_state_key(root, component) else {
				continue;
			};
			let dependency = match rest {
				Some(rest) => format!("{}.{}", full_key, rest),
				None => full_key,
			};
			if !dependencies.contains(&dependency) {
				dependencies.push(dependency);
			}
		}

		let dependencies: Rc<[String]> = dependencies.into();
		self.dependency_cache.set(
			key,
			DependencyEntry {
				dependencies: Rc::clone(&dependencies),
				generation,
			},
		);
		Ok(dependencies)
	}

	/// Evaluates with default options: getters are read through before
	/// injection and the result is a plain value.
	pub fn evaluate_expression(
		&mut self,
		expression: &str,
		context: &BTreeMap<String, Value>,
		component: &str,
	) -> Result<Value, EvalError> {
		self.evaluate_with(expression, context, component, EvalOptions::default())
	}

	/// Evaluates `expression` against `context`.
	pub fn evaluate_with(
		&mut self,
		expression: &str,
		context: &BTreeMap<String, Value>,
		component: &str,
		options: EvalOptions,
	) -> Result<Value, EvalError> {
		let compiled = self.compile(expression, component)?;
		let safe = prepare_safe_context(context);
		let args = compiled
			.params
			.iter()
			.map(|param| match safe.get(param.as_str()) {
				Some(value) if options.preserve_getters => Ok((*value).clone()),
				Some(value) => Ok(extract_state_value(value)),
				None => Err(EvalError::Reference(param.clone())),
			})
			.collect::<Result<Vec<_>, _>>()?;

		let result = Interpreter::new(&compiled.params, &args).eval(&compiled.expr)?;
		if options.preserve_getters {
			Ok(result)
		} else {
			Ok(extract_state_value(&result))
		}
	}

	/// Removes every cached entry compiled for `component`.
	pub fn invalidate_by_component(&mut self, component: &str) -> usize {
		let prefix = format!("{}::", component);
		self.expression_cache.delete_by_prefix(&prefix)
			+ self.dependency_cache.delete_by_prefix(&prefix)
	}

	/// Removes cached entries of every component whose name starts with
	/// `prefix` (`"app."` for the components nested in `app`).
	pub fn invalidate_by_prefix(&mut self, prefix: &str) -> usize {
		self.expression_cache.delete_by_prefix(prefix) + self.dependency_cache.delete_by_prefix(prefix)
	}

	/// Drops dependency entries computed against an older key set.
	pub fn cleanup_stale_expressions(&mut self, resolver: &dyn KeyResolver) -> usize {
		let generation = resolver.key_generation();
		self.dependency_cache
			.retain(|_, entry| entry.generation == generation)
	}
}

impl Cacheable for ExpressionEvaluator {
	fn invalidate_cache(&mut self, key: Option<&str>) {
		match key {
			Some(key) => {
				self.expression_cache.delete(key);
				self.dependency_cache.delete(key);
			}
			None => {
				self.expression_cache.clear();
				self.dependency_cache.clear();
			}
		}
	}

	fn cache_stats(&self) -> BTreeMap<&'static str, CacheStats> {
		BTreeMap::from([
			("expressions", self.expression_cache.stats()),
			("dependencies", self.dependency_cache.stats()),
			("common", self.common_cache.stats()),
		])
	}
}

/// Drops context keys that cannot be bound as identifiers.
fn prepare_safe_context(context: &BTreeMap<String, Value>) -> BTreeMap<&str, &Value> {
	context
		.iter()
		.filter(|(key, _)| {
			let valid = is_valid_identifier(key);
			if !valid {
				debug_log!("skipping context key {:?}: not a bindable identifier", key);
			}
			valid
		})
		.map(|(key, value)| (key.as_str(), value))
		.collect()
}

/// Static paths read by the expression, in evaluation order.
fn collect_paths(expr: &Expr, out: &mut Vec<String>) {
	match expr {
		Expr::Ident { .. } | Expr::Member { .. } => {
			if let Some(path) = expr.static_path() {
				out.push(path);
				return;
			}
		}
		Expr::Call { callee, args, .. } => {
			if let Expr::Member { object, .. } = callee.as_ref() {
				// `items.includes(x)` reads `items`, not `items.includes`.
				match object.static_path() {
					Some(path) => out.push(path),
					None => collect_paths(object, out),
				}
			} else {
				collect_paths(callee, out);
			}
			for arg in args {
				collect_paths(arg, out);
			}
			return;
		}
		_ => {}
	}
	for child in expr.children() {
		collect_paths(child, out);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};
	use std::cell::Cell;

	struct Keys {
		keys: Vec<&'static str>,
		generation: Cell<u64>,
	}

	impl KeyResolver for Keys {
		fn find_existing_state_key(&self, name: &str, component: &str) -> Option<String> {
			let scoped = format!("{}.{}", component, name);
			if self.keys.contains(&scoped.as_str()) {
				Some(scoped)
			} else if self.keys.contains(&name) {
				Some(name.to_string())
			} else {
				None
			}
		}

		fn key_generation(&self) -> u64 {
			self.generation.get()
		}
	}

	#[fixture]
	fn keys() -> Keys {
		Keys {
			keys: vec!["Counter.count", "Counter.user", "theme"],
			generation: Cell::new(1),
		}
	}

	fn context(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.clone()))
			.collect()
	}

	#[rstest]
	#[case("count + 1", vec!["Counter.count"])]
	#[case("user.name.first", vec!["Counter.user.name.first"])]
	#[case("theme === 'dark' ? count : local", vec!["theme", "Counter.count"])]
	#[case("user.tags.includes(tag)", vec!["Counter.user.tags"])]
	#[case("user[key]", vec!["Counter.user"])]
	#[case("`${count}/${count}`", vec!["Counter.count"])]
	#[case("42", vec![])]
	fn test_extract_dependencies(keys: Keys, #[case] expression: &str, #[case] expected: Vec<&str>) {
		let mut evaluator = ExpressionEvaluator::with_capacity(8);
		let deps = evaluator
			.extract_dependencies(expression, "Counter", &keys)
			.unwrap();
		let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
		assert_eq!(deps, expected);
	}

	#[rstest]
	fn test_dependency_cache_goes_stale_on_key_change(keys: Keys) {
		let mut evaluator = ExpressionEvaluator::with_capacity(8);
		evaluator.extract_dependencies("count", "Counter", &keys).unwrap();
		evaluator.extract_dependencies("count", "Counter", &keys).unwrap();
		assert_eq!(evaluator.cache_stats()["dependencies"].hits, 1);

		keys.generation.set(2);
		let mut widened = keys;
		widened.keys.push("Counter.step");
		let deps = evaluator
			.extract_dependencies("count + step", "Counter", &widened)
			.unwrap();
		assert_eq!(deps.len(), 2);
		assert_eq!(evaluator.cleanup_stale_expressions(&widened), 1);
	}

	#[rstest]
	fn test_evaluate_expression() {
		let mut evaluator = ExpressionEvaluator::new();
		let ctx = context(&[("count", Value::from(2)), ("label", Value::from("n"))]);
		let value = evaluator
			.evaluate_expression("label + '=' + count * 2", &ctx, "Counter")
			.unwrap();
		assert_eq!(value, Value::from("n=4"));
	}

	#[rstest]
	fn test_missing_identifier_is_reference_error() {
		let mut evaluator = ExpressionEvaluator::new();
		let result = evaluator.evaluate_expression("missing + 1", &BTreeMap::new(), "X");
		assert_eq!(result, Err(EvalError::Reference("missing".to_string())));
	}

	#[rstest]
	fn test_invalid_context_keys_are_not_bindable() {
		let mut evaluator = ExpressionEvaluator::new();
		let ctx = context(&[("my-var", Value::from(1)), ("ok", Value::from(2))]);
		assert_eq!(
			evaluator.evaluate_expression("ok", &ctx, "X").unwrap(),
			Value::from(2)
		);
		assert!(evaluator.evaluate_expression("my - var", &ctx, "X").is_err());
	}

	#[rstest]
	fn test_compiled_cache_and_component_invalidation() {
		let mut evaluator = ExpressionEvaluator::new();
		let ctx = context(&[("a", Value::from(1))]);
		evaluator.evaluate_expression("a + 1", &ctx, "One").unwrap();
		evaluator.evaluate_expression("a + 1", &ctx, "One").unwrap();
		evaluator.evaluate_expression("a + 1", &ctx, "Two").unwrap();
		let stats = evaluator.cache_stats();
		assert_eq!(stats["expressions"].size, 2);
		assert_eq!(stats["expressions"].hits, 1);

		assert_eq!(evaluator.invalidate_by_component("One"), 1);
		assert_eq!(evaluator.cache_stats()["expressions"].size, 1);

		evaluator.clear_all_caches();
		assert_eq!(evaluator.cache_stats()["expressions"].size, 0);
	}

	#[rstest]
	fn test_common_expressions_skip_component_cache() {
		let mut evaluator = ExpressionEvaluator::new();
		let value = evaluator
			.evaluate_expression(" true ", &BTreeMap::new(), "Any")
			.unwrap();
		assert_eq!(value, Value::Bool(true));
		assert_eq!(evaluator.cache_stats()["expressions"].size, 0);
	}

	#[rstest]
	fn test_syntax_error_is_returned() {
		let mut evaluator = ExpressionEvaluator::new();
		let result = evaluator.evaluate_expression("a +", &BTreeMap::new(), "X");
		assert!(matches!(result, Err(EvalError::Syntax { .. })));
	}
}
