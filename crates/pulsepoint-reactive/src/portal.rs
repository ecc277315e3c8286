//! Portals: content owned by a component but rendered into a container
//! elsewhere in the document.
//!
//! Content rendered through a portal keeps its owning component, so
//! bindings inside it resolve state the same way they would in place. Each
//! portal carries a hydration signal that the runtime completes once the
//! portal's bindings are attached.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::config::attrs;
use crate::dom::{Document, DomError, MutationEvent, NodeId};
use crate::hydration::{Completion, HydrationError, Signal};
use crate::{debug_log, warn_log};

static PORTAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a unique portal id.
fn generate_portal_id() -> String {
	let id = PORTAL_COUNTER.fetch_add(1, Ordering::SeqCst);
	format!("portal-{}", id)
}

/// Errors raised by portal operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
	/// The target selector matched nothing.
	#[error("portal container not found: {0}")]
	ContainerNotFound(String),
	/// The target node is not an element.
	#[error("portal container {0} is not an element")]
	InvalidContainer(NodeId),
	/// Tree operation failed.
	#[error(transparent)]
	Dom(#[from] DomError),
	/// The manager was destroyed.
	#[error("portal manager has been destroyed")]
	Destroyed,
}

/// What a portal renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalContent {
	/// An existing node, moved into the container.
	Node(NodeId),
	/// Text, rendered as a new text node.
	Text(String),
}

impl From<NodeId> for PortalContent {
	fn from(node: NodeId) -> Self {
		PortalContent::Node(node)
	}
}

impl From<&str> for PortalContent {
	fn from(text: &str) -> Self {
		PortalContent::Text(text.to_string())
	}
}

/// Where a portal renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalTarget {
	/// A container element.
	Node(NodeId),
	/// First element in the document matching a selector.
	Selector(String),
}

impl From<NodeId> for PortalTarget {
	fn from(node: NodeId) -> Self {
		PortalTarget::Node(node)
	}
}

impl From<&str> for PortalTarget {
	fn from(selector: &str) -> Self {
		PortalTarget::Selector(selector.to_string())
	}
}

/// Callback receiving the portal container.
pub type ContainerCallback = Rc<dyn Fn(NodeId)>;

/// Options for [`PortalManager::create_portal`].
#[derive(Clone, Default)]
pub struct PortalOptions {
	/// Stable key; creating a portal with a key already in use replaces
	/// that portal's content.
	pub key: Option<String>,
	/// Called with the container after the content is attached.
	pub on_mount: Option<ContainerCallback>,
	/// Called with the container after the content is detached.
	pub on_unmount: Option<ContainerCallback>,
}

impl PortalOptions {
	/// Empty options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the key.
	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}

	/// Sets the mount callback.
	pub fn on_mount(mut self, callback: impl Fn(NodeId) + 'static) -> Self {
		self.on_mount = Some(Rc::new(callback));
		self
	}

	/// Sets the unmount callback.
	pub fn on_unmount(mut self, callback: impl Fn(NodeId) + 'static) -> Self {
		self.on_unmount = Some(Rc::new(callback));
		self
	}
}

impl fmt::Debug for PortalOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PortalOptions")
			.field("key", &self.key)
			.field("on_mount", &self.on_mount.is_some())
			.field("on_unmount", &self.on_unmount.is_some())
			.finish()
	}
}

/// A rendered portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portal {
	/// Portal id.
	pub id: String,
	/// Rendered content.
	pub content: PortalContent,
	/// Container element.
	pub container: NodeId,
	/// Owning component.
	pub component: Option<String>,
	/// Node attached to the container.
	pub rendered: NodeId,
	/// Whether the runtime attached bindings to the content.
	pub hydrated: bool,
}

struct PortalEntry {
	portal: Portal,
	on_unmount: Option<ContainerCallback>,
	signal: Signal,
}

/// Creates, updates and removes portals in one document.
pub struct PortalManager {
	document: Document,
	portals: Vec<PortalEntry>,
	destroyed: bool,
}

impl fmt::Debug for PortalManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PortalManager")
			.field("portals", &self.portals.len())
			.field("destroyed", &self.destroyed)
			.finish()
	}
}

impl PortalManager {
	/// Creates a manager rendering into `document`.
	pub fn new(document: Document) -> Self {
		Self {
			document,
			portals: Vec::new(),
			destroyed: false,
		}
	}

	fn position(&self, id: &str) -> Option<usize> {
		self.portals.iter().position(|entry| entry.portal.id == id)
	}

	fn resolve_target(&self, target: &PortalTarget) -> Result<NodeId, PortalError> {
		let container = match target {
			PortalTarget::Node(node) => *node,
			PortalTarget::Selector(selector) => self
				.document
				.query_selector(self.document.root(), selector)?
				.ok_or_else(|| PortalError::ContainerNotFound(selector.clone()))?,
		};
		if !self.document.is_element(container) {
			return Err(PortalError::InvalidContainer(container));
		}
		Ok(container)
	}

	fn render(
		&self,
		content: &PortalContent,
		container: NodeId,
		component: Option<&str>,
	) -> Result<NodeId, PortalError> {
		let node = match content {
			PortalContent::Node(node) => *node,
			PortalContent::Text(text) => self.document.create_text(text),
		};
		if let Some(component) = component {
			if self.document.is_element(node) && !self.document.has_attribute(node, attrs::COMPONENT) {
				self.document
					.set_attribute(node, attrs::COMPONENT, component)?;
			}
		}
		self.document.append_child(container, node)?;
		Ok(node)
	}

	fn detach(&self, entry: &PortalEntry) {
		let rendered = entry.portal.rendered;
		if self.document.parent(rendered).is_some() {
			if let Err(error) = self.document.remove(rendered) {
				warn_log!("failed to detach portal {}: {}", entry.portal.id, error);
			}
		}
		if let Some(on_unmount) = &entry.on_unmount {
			on_unmount(entry.portal.container);
		}
	}

	/// Renders `content` into the container named by `target` and returns
	/// the portal id.
	pub fn create_portal(
		&mut self,
		content: impl Into<PortalContent>,
		target: impl Into<PortalTarget>,
		component: Option<&str>,
		options: PortalOptions,
	) -> Result<String, PortalError> {
		if self.destroyed {
			return Err(PortalError::Destroyed);
		}
		let content = content.into();
		let container = self.resolve_target(&target.into())?;

		if let Some(key) = &options.key {
			let id = format!("portal-{}", key);
			if self.has_portal(&id) {
				self.update_portal(&id, content, Some(options))?;
				return Ok(id);
			}
		}

		let rendered = self.render(&content, container, component)?;
		let id = match &options.key {
			Some(key) => format!("portal-{}", key),
			None => generate_portal_id(),
		};
		if let Some(on_mount) = &options.on_mount {
			on_mount(container);
		}
		debug_log!("created {} in {}", id, container);
		self.portals.push(PortalEntry {
			portal: Portal {
				id: id.clone(),
				content,
				container,
				component: component.map(str::to_string),
				rendered,
				hydrated: false,
			},
			on_unmount: options.on_unmount,
			signal: Signal::new(),
		});
		Ok(id)
	}

	/// Detaches and forgets a portal. Returns whether it existed.
	///
	/// Anyone waiting for its hydration receives
	/// [`HydrationError::PortalRemoved`].
	pub fn remove_portal(&mut self, id: &str) -> bool {
		let Some(index) = self.position(id) else {
			return false;
		};
		let mut entry = self.portals.remove(index);
		self.detach(&entry);
		entry
			.signal
			.complete(Err(HydrationError::PortalRemoved(id.to_string())));
		true
	}

	/// Replaces a portal's content in place.
	///
	/// With `options`, the unmount callback is replaced and the mount
	/// callback runs. Returns `Ok(false)` for an unknown id.
	pub fn update_portal(
		&mut self,
		id: &str,
		content: impl Into<PortalContent>,
		options: Option<PortalOptions>,
	) -> Result<bool, PortalError> {
		if self.destroyed {
			return Err(PortalError::Destroyed);
		}
		let Some(index) = self.position(id) else {
			return Ok(false);
		};
		let content = content.into();
		let (container, component) = {
			let portal = &self.portals[index].portal;
			(portal.container, portal.component.clone())
		};

		let old = self.portals[index].portal.rendered;
		if self.document.parent(old).is_some() {
			self.document.remove(old)?;
		}
		let rendered = self.render(&content, container, component.as_deref())?;

		let entry = &mut self.portals[index];
		entry.portal.content = content;
		entry.portal.rendered = rendered;
		if let Some(options) = options {
			entry.on_unmount = options.on_unmount;
			if let Some(on_mount) = options.on_mount {
				on_mount(container);
			}
		}
		Ok(true)
	}

	/// Portal by id.
	pub fn get_portal(&self, id: &str) -> Option<&Portal> {
		self.portals
			.iter()
			.find(|entry| entry.portal.id == id)
			.map(|entry| &entry.portal)
	}

	/// Whether a portal with `id` exists.
	pub fn has_portal(&self, id: &str) -> bool {
		self.position(id).is_some()
	}

	/// Every portal in creation order.
	pub fn get_all_portals(&self) -> Vec<&Portal> {
		self.portals.iter().map(|entry| &entry.portal).collect()
	}

	/// Ids of portals not hydrated yet.
	pub fn pending_hydration(&self) -> Vec<String> {
		self.portals
			.iter()
			.filter(|entry| !entry.portal.hydrated)
			.map(|entry| entry.portal.id.clone())
			.collect()
	}

	/// Marks a portal hydrated and resolves its waiters.
	pub fn mark_hydrated(&mut self, id: &str) -> bool {
		let Some(index) = self.position(id) else {
			return false;
		};
		let entry = &mut self.portals[index];
		entry.portal.hydrated = true;
		entry.signal.complete(Ok(()));
		true
	}

	/// Fails a portal's hydration; the portal stays rendered.
	pub fn fail_hydration(&mut self, id: &str, error: HydrationError) -> bool {
		let Some(index) = self.position(id) else {
			return false;
		};
		self.portals[index].signal.complete(Err(error));
		true
	}

	/// Future resolving once the portal is hydrated.
	pub fn wait_hydrated(&mut self, id: &str) -> Completion {
		match self.position(id) {
			Some(index) => self.portals[index].signal.wait(),
			None => Completion::failed(HydrationError::PortalNotFound(id.to_string())),
		}
	}

	/// Removes portals whose container left the document. Returns the count.
	pub fn handle_mutation(&mut self, event: &MutationEvent) -> usize {
		if !matches!(event, MutationEvent::NodeRemoved { .. }) {
			return 0;
		}
		let orphaned: Vec<String> = self
			.portals
			.iter()
			.filter(|entry| !self.document.is_connected(entry.portal.container))
			.map(|entry| entry.portal.id.clone())
			.collect();
		for id in &orphaned {
			debug_log!("container of {} was removed", id);
			self.remove_portal(id);
		}
		orphaned.len()
	}

	/// Removes every portal owned by `component` or its nested components.
	pub fn remove_component_portals(&mut self, component: &str) -> usize {
		let nested = format!("{}.", component);
		let owned: Vec<String> = self
			.portals
			.iter()
			.filter(|entry| {
				entry
					.portal
					.component
					.as_deref()
					.is_some_and(|c| c == component || c.starts_with(&nested))
			})
			.map(|entry| entry.portal.id.clone())
			.collect();
		for id in &owned {
			self.remove_portal(id);
		}
		owned.len()
	}

	/// Number of portals.
	pub fn len(&self) -> usize {
		self.portals.len()
	}

	/// Whether there are no portals.
	pub fn is_empty(&self) -> bool {
		self.portals.is_empty()
	}

	/// Removes every portal and rejects later creation. Idempotent.
	pub fn destroy(&mut self) {
		let ids: Vec<String> = self
			.portals
			.iter()
			.map(|entry| entry.portal.id.clone())
			.collect();
		for id in &ids {
			self.remove_portal(id);
		}
		self.destroyed = true;
	}

	/// Whether [`destroy`](Self::destroy) was called.
	pub fn is_destroyed(&self) -> bool {
		self.destroyed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::executor::block_on;
	use pretty_assertions::assert_eq;
	use rstest::{fixture, rstest};
	use std::cell::RefCell;

	struct Page {
		doc: Document,
		overlay: NodeId,
		manager: PortalManager,
	}

	#[fixture]
	fn page() -> Page {
		let doc = Document::new();
		let body = doc.create_element("body");
		doc.append_child(doc.root(), body).unwrap();
		let overlay = doc.create_element_with("div", &[("id", "overlay")]);
		doc.append_child(body, overlay).unwrap();
		let manager = PortalManager::new(doc.clone());
		Page {
			doc,
			overlay,
			manager,
		}
	}

	#[rstest]
	fn test_create_by_selector_marks_owner(mut page: Page) {
		let dialog = page.doc.create_element("dialog");
		let id = page
			.manager
			.create_portal(dialog, "#overlay", Some("Modal"), PortalOptions::new())
			.unwrap();

		assert!(id.starts_with("portal-"));
		assert_eq!(page.doc.parent(dialog), Some(page.overlay));
		assert_eq!(
			page.doc.get_attribute(dialog, attrs::COMPONENT).as_deref(),
			Some("Modal")
		);
		let portal = page.manager.get_portal(&id).unwrap();
		assert_eq!(portal.container, page.overlay);
		assert!(!portal.hydrated);
	}

	#[rstest]
	fn test_missing_container(mut page: Page) {
		let err = page
			.manager
			.create_portal("hi", "#nowhere", None, PortalOptions::new())
			.unwrap_err();
		assert_eq!(err, PortalError::ContainerNotFound("#nowhere".into()));

		let err = page
			.manager
			.create_portal("hi", "div[", None, PortalOptions::new())
			.unwrap_err();
		assert!(matches!(err, PortalError::Dom(DomError::InvalidSelector(_))));
	}

	#[rstest]
	fn test_remove_runs_unmount_and_cancels_waiters(mut page: Page) {
		let log = Rc::new(RefCell::new(Vec::new()));
		let (mounted, unmounted) = (Rc::clone(&log), Rc::clone(&log));
		let options = PortalOptions::new()
			.on_mount(move |_| mounted.borrow_mut().push("mount"))
			.on_unmount(move |_| unmounted.borrow_mut().push("unmount"));
		let id = page
			.manager
			.create_portal("toast", page.overlay, None, options)
			.unwrap();
		let rendered = page.manager.get_portal(&id).unwrap().rendered;
		let waiter = page.manager.wait_hydrated(&id);

		assert!(page.manager.remove_portal(&id));
		assert!(!page.manager.remove_portal(&id));
		assert!(!page.doc.is_connected(rendered));
		assert_eq!(*log.borrow(), vec!["mount", "unmount"]);
		assert_eq!(
			block_on(waiter),
			Err(HydrationError::PortalRemoved(id.clone()))
		);
	}

	#[rstest]
	fn test_keyed_create_replaces_content(mut page: Page) {
		let first = page
			.manager
			.create_portal("one", page.overlay, None, PortalOptions::new().with_key("toast"))
			.unwrap();
		let second = page
			.manager
			.create_portal("two", page.overlay, None, PortalOptions::new().with_key("toast"))
			.unwrap();

		assert_eq!(first, "portal-toast");
		assert_eq!(first, second);
		assert_eq!(page.manager.len(), 1);
		assert_eq!(page.doc.text_content(page.overlay), "two");
	}

	#[rstest]
	fn test_update_unknown_portal(mut page: Page) {
		assert_eq!(page.manager.update_portal("portal-x", "t", None), Ok(false));
	}

	#[rstest]
	fn test_mark_hydrated_resolves_waiters(mut page: Page) {
		let id = page
			.manager
			.create_portal("x", page.overlay, None, PortalOptions::new())
			.unwrap();
		let waiter = page.manager.wait_hydrated(&id);
		assert_eq!(page.manager.pending_hydration(), vec![id.clone()]);

		assert!(page.manager.mark_hydrated(&id));
		assert_eq!(block_on(waiter), Ok(()));
		assert!(page.manager.pending_hydration().is_empty());
		assert_eq!(
			block_on(page.manager.wait_hydrated("portal-missing")),
			Err(HydrationError::PortalNotFound("portal-missing".into()))
		);
	}

	#[rstest]
	fn test_container_removal_drops_portal(mut page: Page) {
		let id = page
			.manager
			.create_portal("x", page.overlay, None, PortalOptions::new())
			.unwrap();
		page.doc.remove(page.overlay).unwrap();

		let removed = page.manager.handle_mutation(&MutationEvent::NodeRemoved {
			node: page.overlay,
			parent: page.doc.root(),
		});
		assert_eq!(removed, 1);
		assert!(!page.manager.has_portal(&id));
	}

	#[rstest]
	fn test_component_portals_removed_with_component(mut page: Page) {
		page.manager
			.create_portal("a", page.overlay, Some("App.Menu"), PortalOptions::new())
			.unwrap();
		page.manager
			.create_portal("b", page.overlay, Some("Sidebar"), PortalOptions::new())
			.unwrap();
		assert_eq!(page.manager.remove_component_portals("App"), 1);
		assert_eq!(page.manager.len(), 1);
	}

	#[rstest]
	fn test_destroy_is_terminal_and_idempotent(mut page: Page) {
		page.manager
			.create_portal("a", page.overlay, None, PortalOptions::new())
			.unwrap();
		page.manager.destroy();
		page.manager.destroy();
		assert!(page.manager.is_empty());
		assert_eq!(
			page.manager
				.create_portal("b", page.overlay, None, PortalOptions::new()),
			Err(PortalError::Destroyed)
		);
	}
}
