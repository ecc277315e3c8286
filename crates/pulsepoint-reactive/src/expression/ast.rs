//! Binding-expression syntax tree.

use std::collections::BTreeSet;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
	Not,
	Neg,
	Plus,
	TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
	Add,
	Sub,
	Mul,
	Div,
	Rem,
	Lt,
	Le,
	Gt,
	Ge,
	LooseEq,
	LooseNe,
	StrictEq,
	StrictNe,
}

impl BinaryOp {
	pub(crate) fn is_comparison(self) -> bool {
		!matches!(
			self,
			BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
		)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
	And,
	Or,
	Nullish,
}

#[derive(Debug, Clone)]
pub(crate) enum TemplatePiece {
	Text(String),
	Code(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
	Literal(Value),
	Ident {
		name: String,
		slot: usize,
	},
	Template(Vec<TemplatePiece>),
	Array(Vec<Expr>),
	Object(Vec<(String, Expr)>),
	Member {
		object: Box<Expr>,
		property: String,
		optional: bool,
	},
	Index {
		object: Box<Expr>,
		index: Box<Expr>,
		optional: bool,
	},
	Call {
		callee: Box<Expr>,
		args: Vec<Expr>,
		optional: bool,
	},
	Unary {
		op: UnaryOp,
		operand: Box<Expr>,
	},
	Binary {
		op: BinaryOp,
		left: Box<Expr>,
		right: Box<Expr>,
	},
	Logical {
		op: LogicalOp,
		left: Box<Expr>,
		right: Box<Expr>,
	},
	Conditional {
		test: Box<Expr>,
		consequent: Box<Expr>,
		alternate: Box<Expr>,
	},
}

impl Expr {
	/// Direct children in evaluation order.
	pub(crate) fn children(&self) -> Vec<&Expr> {
		match self {
			Expr::Literal(_) | Expr::Ident { .. } => Vec::new(),
			Expr::Template(pieces) => pieces
				.iter()
				.filter_map(|piece| match piece {
					TemplatePiece::Code(expr) => Some(expr),
					TemplatePiece::Text(_) => None,
				})
				.collect(),
			Expr::Array(items) => items.iter().collect(),
			Expr::Object(props) => props.iter().map(|(_, v)| v).collect(),
			Expr::Member { object, .. } => vec![object.as_ref()],
			Expr::Index { object, index, .. } => vec![object.as_ref(), index.as_ref()],
			Expr::Call { callee, args, .. } => {
				std::iter::once(callee.as_ref()).chain(args.iter()).collect()
			}
			Expr::Unary { operand, .. } => vec![operand.as_ref()],
			Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
				vec![left.as_ref(), right.as_ref()]
			}
			Expr::Conditional {
				test,
				consequent,
				alternate,
			} => vec![test.as_ref(), consequent.as_ref(), alternate.as_ref()],
		}
	}

	fn children_mut(&mut self) -> Vec<&mut Expr> {
		match self {
			Expr::Literal(_) | Expr::Ident { .. } => Vec::new(),
			Expr::Template(pieces) => pieces
				.iter_mut()
				.filter_map(|piece| match piece {
					TemplatePiece::Code(expr) => Some(expr),
					TemplatePiece::Text(_) => None,
				})
				.collect(),
			Expr::Array(items) => items.iter_mut().collect(),
			Expr::Object(props) => props.iter_mut().map(|(_, v)| v).collect(),
			Expr::Member { object, .. } => vec![object.as_mut()],
			Expr::Index { object, index, .. } => vec![object.as_mut(), index.as_mut()],
			Expr::Call { callee, args, .. } => {
				std::iter::once(callee.as_mut()).chain(args.iter_mut()).collect()
			}
			Expr::Unary { operand, .. } => vec![operand.as_mut()],
			Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
				vec![left.as_mut(), right.as_mut()]
			}
			Expr::Conditional {
				test,
				consequent,
				alternate,
			} => vec![test.as_mut(), consequent.as_mut(), alternate.as_mut()],
		}
	}

	/// Free identifiers referenced anywhere in the tree.
	pub(crate) fn free_identifiers(&self, out: &mut BTreeSet<String>) {
		if let Expr::Ident { name, .. } = self {
			out.insert(name.clone());
		}
		for child in self.children() {
			child.free_identifiers(out);
		}
	}

	/// Points every identifier at its index in the sorted `params` list.
	pub(crate) fn bind_slots(&mut self, params: &[String]) {
		if let Expr::Ident { name, slot } = self {
			if let Ok(index) = params.binary_search(name) {
				*slot = index;
			}
		}
		for child in self.children_mut() {
			child.bind_slots(params);
		}
	}

	/// Static dotted path for `a`, `a.b`, `a?.b.c`; `None` otherwise.
	pub(crate) fn static_path(&self) -> Option<String> {
		match self {
			Expr::Ident { name, .. } => Some(name.clone()),
			Expr::Member {
				object, property, ..
			} => object
				.static_path()
				.map(|base| format!("{}.{}", base, property)),
			_ => None,
		}
	}
}
