//! Arena-backed document.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{DomError, MutationEvent, NodeId, NodeKind, Selector};

#[derive(Debug)]
struct NodeData {
	kind: NodeKind,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct Tree {
	nodes: Vec<NodeData>,
	observers: Vec<UnboundedSender<MutationEvent>>,
}

impl Tree {
	fn node(&self, id: NodeId) -> Result<&NodeData, DomError> {
		self.nodes.get(id.0).ok_or(DomError::NodeNotFound(id))
	}

	fn emit(&mut self, event: MutationEvent) {
		self.observers
			.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
	}

	fn push(&mut self, kind: NodeKind) -> NodeId {
		let id = NodeId(self.nodes.len());
		self.nodes.push(NodeData {
			kind,
			parent: None,
			children: Vec::new(),
		});
		id
	}

	fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
		loop {
			if node == ancestor {
				return true;
			}
			match self.nodes.get(node.0).and_then(|n| n.parent) {
				Some(parent) => node = parent,
				None => return false,
			}
		}
	}

	fn detach(&mut self, node: NodeId) {
		let Some(parent) = self.nodes.get(node.0).and_then(|n| n.parent) else {
			return;
		};
		if let Some(data) = self.nodes.get_mut(parent.0) {
			data.children.retain(|child| *child != node);
		}
		if let Some(data) = self.nodes.get_mut(node.0) {
			data.parent = None;
		}
		self.emit(MutationEvent::NodeRemoved { node, parent });
	}
}

/// Shared handle to a document tree.
///
/// Cloning the handle shares the tree. The root node is always
/// [`Document::root`].
///
/// # Example
///
/// ```
/// use pulsepoint_reactive::dom::Document;
///
/// let doc = Document::new();
/// let div = doc.create_element_with("div", &[("pp-component", "Counter")]);
/// doc.append_child(doc.root(), div).unwrap();
/// assert!(doc.is_connected(div));
/// ```
#[derive(Debug, Clone)]
pub struct Document {
	tree: Rc<RefCell<Tree>>,
}

impl Default for Document {
	fn default() -> Self {
		Self::new()
	}
}

impl Document {
	/// Creates an empty document.
	pub fn new() -> Self {
		let mut tree = Tree::default();
		tree.push(NodeKind::Document);
		Self {
			tree: Rc::new(RefCell::new(tree)),
		}
	}

	/// The document node.
	pub fn root(&self) -> NodeId {
		NodeId(0)
	}

	/// Whether both handles share one tree.
	pub fn ptr_eq(&self, other: &Document) -> bool {
		Rc::ptr_eq(&self.tree, &other.tree)
	}

	/// Returns a receiver for subsequent structural changes.
	pub fn subscribe_mutations(&self) -> UnboundedReceiver<MutationEvent> {
		let (tx, rx) = mpsc::unbounded();
		self.tree.borrow_mut().observers.push(tx);
		rx
	}

	/// Creates a detached element.
	pub fn create_element(&self, tag: &str) -> NodeId {
		self.tree.borrow_mut().push(NodeKind::Element {
			tag: tag.to_ascii_lowercase(),
			attrs: BTreeMap::new(),
		})
	}

	/// Creates a detached element with attributes.
	pub fn create_element_with(&self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
		self.tree.borrow_mut().push(NodeKind::Element {
			tag: tag.to_ascii_lowercase(),
			attrs: attrs
				.iter()
				.map(|(k, v)| (k.to_string(), v.to_string()))
				.collect(),
		})
	}

	/// Creates a detached text node.
	pub fn create_text(&self, text: &str) -> NodeId {
		self.tree.borrow_mut().push(NodeKind::Text(text.to_string()))
	}

	/// Creates a detached comment node.
	pub fn create_comment(&self, text: &str) -> NodeId {
		self.tree.borrow_mut().push(NodeKind::Comment(text.to_string()))
	}

	/// Appends `child` as the last child of `parent`, moving it if attached.
	pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
		self.insert_before(parent, child, None)
	}

	/// Inserts `child` before `reference`, or last when `reference` is `None`.
	pub fn insert_before(
		&self,
		parent: NodeId,
		child: NodeId,
		reference: Option<NodeId>,
	) -> Result<(), DomError> {
		let mut tree = self.tree.borrow_mut();
		let parent_kind = &tree.node(parent)?.kind;
		let accepts_children = matches!(parent_kind, NodeKind::Document | NodeKind::Element { .. });
		tree.node(child)?;
		if !accepts_children || tree.is_ancestor_or_self(child, parent) {
			return Err(DomError::HierarchyRequest { parent, child });
		}
		if let Some(reference) = reference {
			if reference == child {
				return Ok(());
			}
			if tree.node(reference)?.parent != Some(parent) {
				return Err(DomError::NotAChild { parent, reference });
			}
		}

		tree.detach(child);
		let data = &mut tree.nodes[parent.0];
		let index = reference
			.and_then(|r| data.children.iter().position(|c| *c == r))
			.unwrap_or(data.children.len());
		data.children.insert(index, child);
		tree.nodes[child.0].parent = Some(parent);
		tree.emit(MutationEvent::NodeInserted {
			node: child,
			parent,
		});
		Ok(())
	}

	/// Detaches a node (and its subtree) from its parent.
	pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
		let mut tree = self.tree.borrow_mut();
		tree.node(node)?;
		tree.detach(node);
		Ok(())
	}

	/// Node payload, if the id is valid.
	pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
		self.tree.borrow().nodes.get(node.0).map(|n| n.kind.clone())
	}

	/// Tag name of an element.
	pub fn tag_name(&self, node: NodeId) -> Option<String> {
		match &self.tree.borrow().nodes.get(node.0)?.kind {
			NodeKind::Element { tag, .. } => Some(tag.clone()),
			_ => None,
		}
	}

	/// Whether the node is an element.
	pub fn is_element(&self, node: NodeId) -> bool {
		matches!(self.kind(node), Some(NodeKind::Element { .. }))
	}

	/// Comment text, if the node is a comment.
	pub fn comment_text(&self, node: NodeId) -> Option<String> {
		match &self.tree.borrow().nodes.get(node.0)?.kind {
			NodeKind::Comment(text) => Some(text.clone()),
			_ => None,
		}
	}

	/// Data of a text node.
	pub fn text(&self, node: NodeId) -> Option<String> {
		match &self.tree.borrow().nodes.get(node.0)?.kind {
			NodeKind::Text(text) => Some(text.clone()),
			_ => None,
		}
	}

	/// Replaces the data of a text node.
	pub fn set_text(&self, node: NodeId, text: &str) -> Result<(), DomError> {
		let mut tree = self.tree.borrow_mut();
		match tree.nodes.get_mut(node.0).map(|n| &mut n.kind) {
			Some(NodeKind::Text(data)) => {
				*data = text.to_string();
				Ok(())
			}
			Some(_) => Err(DomError::HierarchyRequest {
				parent: node,
				child: node,
			}),
			None => Err(DomError::NodeNotFound(node)),
		}
	}

	/// Concatenated text of all descendant text nodes.
	pub fn text_content(&self, node: NodeId) -> String {
		let tree = self.tree.borrow();
		let mut out = String::new();
		let mut stack = vec![node];
		while let Some(current) = stack.pop() {
			let Some(data) = tree.nodes.get(current.0) else {
				continue;
			};
			if let NodeKind::Text(text) = &data.kind {
				out.push_str(text);
			}
			stack.extend(data.children.iter().rev());
		}
		out
	}

	/// Attribute value of an element.
	pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
		match &self.tree.borrow().nodes.get(node.0)?.kind {
			NodeKind::Element { attrs, .. } => attrs.get(name).cloned(),
			_ => None,
		}
	}

	/// Whether the element carries the attribute.
	pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
		self.get_attribute(node, name).is_some()
	}

	/// Sets an attribute on an element.
	pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
		let mut tree = self.tree.borrow_mut();
		match tree.nodes.get_mut(node.0).map(|n| &mut n.kind) {
			Some(NodeKind::Element { attrs, .. }) => {
				attrs.insert(name.to_string(), value.to_string());
			}
			Some(_) => {
				return Err(DomError::HierarchyRequest {
					parent: node,
					child: node,
				});
			}
			None => return Err(DomError::NodeNotFound(node)),
		}
		tree.emit(MutationEvent::AttributeChanged {
			node,
			name: name.to_string(),
		});
		Ok(())
	}

	/// Removes an attribute; returns whether it was present.
	pub fn remove_attribute(&self, node: NodeId, name: &str) -> bool {
		let mut tree = self.tree.borrow_mut();
		let removed = match tree.nodes.get_mut(node.0).map(|n| &mut n.kind) {
			Some(NodeKind::Element { attrs, .. }) => attrs.remove(name).is_some(),
			_ => false,
		};
		if removed {
			tree.emit(MutationEvent::AttributeChanged {
				node,
				name: name.to_string(),
			});
		}
		removed
	}

	/// Parent node.
	pub fn parent(&self, node: NodeId) -> Option<NodeId> {
		self.tree.borrow().nodes.get(node.0)?.parent
	}

	/// Nearest ancestor that is an element.
	pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
		self.parent(node).filter(|p| self.is_element(*p))
	}

	/// Child nodes in order.
	pub fn children(&self, node: NodeId) -> Vec<NodeId> {
		self.tree
			.borrow()
			.nodes
			.get(node.0)
			.map(|n| n.children.clone())
			.unwrap_or_default()
	}

	/// Child elements in order.
	pub fn child_elements(&self, node: NodeId) -> Vec<NodeId> {
		self.children(node)
			.into_iter()
			.filter(|c| self.is_element(*c))
			.collect()
	}

	fn sibling(&self, node: NodeId, offset: isize) -> Option<NodeId> {
		let tree = self.tree.borrow();
		let parent = tree.nodes.get(node.0)?.parent?;
		let siblings = &tree.nodes.get(parent.0)?.children;
		let index = siblings.iter().position(|c| *c == node)?;
		let target = index.checked_add_signed(offset)?;
		siblings.get(target).copied()
	}

	/// Previous sibling node.
	pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
		self.sibling(node, -1)
	}

	/// Next sibling node.
	pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
		self.sibling(node, 1)
	}

	/// Whether the node is reachable from the document root.
	pub fn is_connected(&self, node: NodeId) -> bool {
		let tree = self.tree.borrow();
		node.0 < tree.nodes.len() && tree.is_ancestor_or_self(NodeId(0), node)
	}

	/// Inclusive descendant check.
	pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
		self.tree.borrow().is_ancestor_or_self(ancestor, node)
	}

	/// Number of element ancestors.
	pub fn depth(&self, node: NodeId) -> usize {
		let mut depth = 0;
		let mut current = self.parent_element(node);
		while let Some(parent) = current {
			depth += 1;
			current = self.parent_element(parent);
		}
		depth
	}

	/// All descendants in document order, excluding `node`.
	pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
		let tree = self.tree.borrow();
		let mut out = Vec::new();
		let mut stack: Vec<NodeId> = tree
			.nodes
			.get(node.0)
			.map(|n| n.children.iter().rev().copied().collect())
			.unwrap_or_default();
		while let Some(current) = stack.pop() {
			out.push(current);
			if let Some(data) = tree.nodes.get(current.0) {
				stack.extend(data.children.iter().rev());
			}
		}
		out
	}

	/// Elements under `scope` matching `selector`, in document order.
	pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>, DomError> {
		let selector = Selector::parse(selector)?;
		Ok(self
			.descendants(scope)
			.into_iter()
			.filter(|node| selector.matches(self, *node))
			.collect())
	}

	/// First element under `scope` matching `selector`.
	pub fn query_selector(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>, DomError> {
		let selector = Selector::parse(selector)?;
		Ok(self
			.descendants(scope)
			.into_iter()
			.find(|node| selector.matches(self, *node)))
	}

	/// Element with the given `id` attribute.
	pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
		self.descendants(self.root())
			.into_iter()
			.find(|node| self.get_attribute(*node, "id").as_deref() == Some(id))
	}

	/// Number of nodes ever created.
	pub fn node_count(&self) -> usize {
		self.tree.borrow().nodes.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::StreamExt;
	use rstest::{fixture, rstest};

	/// `<div id=app><ul class="list"><li>a</li><li class="on">b</li></ul></div>`
	#[fixture]
	fn doc() -> (Document, NodeId, NodeId) {
		let doc = Document::new();
		let app = doc.create_element_with("div", &[("id", "app")]);
		let ul = doc.create_element_with("ul", &[("class", "list")]);
		doc.append_child(doc.root(), app).unwrap();
		doc.append_child(app, ul).unwrap();
		for (text, class) in [("a", ""), ("b", "on")] {
			let li = doc.create_element_with("li", &[("class", class)]);
			let t = doc.create_text(text);
			doc.append_child(li, t).unwrap();
			doc.append_child(ul, li).unwrap();
		}
		(doc, app, ul)
	}

	#[rstest]
	fn test_tree_navigation(doc: (Document, NodeId, NodeId)) {
		let (doc, app, ul) = doc;
		let items = doc.child_elements(ul);
		assert_eq!(items.len(), 2);
		assert_eq!(doc.next_sibling(items[0]), Some(items[1]));
		assert_eq!(doc.previous_sibling(items[0]), None);
		assert_eq!(doc.parent(ul), Some(app));
		assert_eq!(doc.depth(items[0]), 2);
		assert_eq!(doc.text_content(app), "ab");
		assert!(doc.contains(app, items[1]));
	}

	#[rstest]
	fn test_query_selector_all(doc: (Document, NodeId, NodeId)) {
		let (doc, _, ul) = doc;
		let root = doc.root();
		assert_eq!(doc.query_selector_all(root, "li").unwrap().len(), 2);
		assert_eq!(doc.query_selector_all(root, "#app .list > li.on").unwrap().len(), 1);
		assert_eq!(doc.query_selector_all(root, "ul, li").unwrap().len(), 3);
		assert_eq!(doc.query_selector(root, "ul").unwrap(), Some(ul));
		assert!(doc.query_selector_all(ul, "ul").unwrap().is_empty());
	}

	#[rstest]
	fn test_remove_disconnects_subtree(doc: (Document, NodeId, NodeId)) {
		let (doc, _, ul) = doc;
		let li = doc.child_elements(ul)[0];
		doc.remove(ul).unwrap();
		assert!(!doc.is_connected(ul));
		assert!(!doc.is_connected(li));
		assert_eq!(doc.get_element_by_id("app").map(|a| doc.children(a).len()), Some(0));
	}

	#[rstest]
	fn test_insert_rejects_cycles(doc: (Document, NodeId, NodeId)) {
		let (doc, app, ul) = doc;
		assert_eq!(
			doc.append_child(ul, app),
			Err(DomError::HierarchyRequest { parent: ul, child: app })
		);
		let text = doc.create_text("x");
		assert!(doc.append_child(text, app).is_err());
	}

	#[rstest]
	fn test_insert_before_reference(doc: (Document, NodeId, NodeId)) {
		let (doc, _, ul) = doc;
		let first = doc.child_elements(ul)[0];
		let li = doc.create_element("li");
		doc.insert_before(ul, li, Some(first)).unwrap();
		assert_eq!(doc.children(ul)[0], li);

		let stray = doc.create_element("p");
		assert_eq!(
			doc.insert_before(ul, doc.create_element("li"), Some(stray)),
			Err(DomError::NotAChild { parent: ul, reference: stray })
		);
	}

	#[rstest]
	fn test_mutation_events(doc: (Document, NodeId, NodeId)) {
		let (doc, app, ul) = doc;
		let mut rx = doc.subscribe_mutations();
		doc.set_attribute(app, "data-x", "1").unwrap();
		doc.remove(ul).unwrap();
		doc.append_child(app, ul).unwrap();
		drop(doc);

		let events = futures::executor::block_on(rx.by_ref().take(3).collect::<Vec<_>>());
		assert_eq!(
			events,
			vec![
				MutationEvent::AttributeChanged { node: app, name: "data-x".into() },
				MutationEvent::NodeRemoved { node: ul, parent: app },
				MutationEvent::NodeInserted { node: ul, parent: app },
			]
		);
	}
}
