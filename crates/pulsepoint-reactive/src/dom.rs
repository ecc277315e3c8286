//! In-memory document tree the runtime binds against.
//!
//! Nodes live in an arena owned by [`Document`] and are addressed by
//! [`NodeId`]. Structural changes are published as [`MutationEvent`]s over an
//! unbounded channel so caches and subscription indexes can react without
//! holding a reference into the tree.

mod document;
mod selector;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub use document::Document;
pub use selector::Selector;

/// Handle to a node inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
	/// Arena index of the node.
	pub fn index(self) -> usize {
		self.0
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "node#{}", self.0)
	}
}

/// Node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
	/// The document root.
	Document,
	/// An element with its attributes.
	Element {
		/// Lowercase tag name.
		tag: String,
		/// Attributes by name.
		attrs: BTreeMap<String, String>,
	},
	/// A text node.
	Text(String),
	/// A comment node.
	Comment(String),
}

/// Structural change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
	/// `node` was attached under `parent`.
	NodeInserted {
		/// Inserted node.
		node: NodeId,
		/// Its new parent.
		parent: NodeId,
	},
	/// `node` was detached from `parent`.
	NodeRemoved {
		/// Removed node.
		node: NodeId,
		/// Its former parent.
		parent: NodeId,
	},
	/// An attribute of `node` was set or removed.
	AttributeChanged {
		/// Element whose attribute changed.
		node: NodeId,
		/// Attribute name.
		name: String,
	},
}

/// Errors raised by tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
	/// The id does not belong to this document.
	#[error("unknown node: {0}")]
	NodeNotFound(NodeId),
	/// The operation would create a cycle or attach under a leaf.
	#[error("cannot insert {child} under {parent}")]
	HierarchyRequest {
		/// Intended parent.
		parent: NodeId,
		/// Node being inserted.
		child: NodeId,
	},
	/// The reference node is not a child of the parent.
	#[error("{reference} is not a child of {parent}")]
	NotAChild {
		/// Parent node.
		parent: NodeId,
		/// Expected child.
		reference: NodeId,
	},
	/// The selector uses syntax outside the supported subset.
	#[error("invalid selector `{0}`")]
	InvalidSelector(String),
}
