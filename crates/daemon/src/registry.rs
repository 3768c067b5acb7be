use std::sync::Arc;

use parking_lot::RwLock;

use crate::pass::PassFactory;
use crate::types::{FileKind, PassId};

/// Source of pass factories per file kind.
///
/// The returned order is the registration order, used as the last tie-breaker
/// when ordering passes.
pub trait FactoryRegistry: Send + Sync {
	fn factories_for(&self, kind: &FileKind) -> Vec<Arc<dyn PassFactory>>;

	fn pass_ids_for(&self, kind: &FileKind) -> Vec<PassId> {
		self.factories_for(kind).iter().map(|f| f.id()).collect()
	}
}

struct Registration {
	/// `None` applies to every file kind.
	kind: Option<FileKind>,
	factory: Arc<dyn PassFactory>,
}

/// In-memory [`FactoryRegistry`].
#[derive(Default)]
pub struct PassRegistry {
	entries: RwLock<Vec<Registration>>,
}

impl PassRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `factory` for one file kind. A later registration with the
	/// same id for the same kind replaces the earlier one in place.
	pub fn register(&self, kind: impl Into<FileKind>, factory: Arc<dyn PassFactory>) {
		self.insert(Some(kind.into()), factory);
	}

	/// Registers `factory` for every file kind.
	pub fn register_for_all(&self, factory: Arc<dyn PassFactory>) {
		self.insert(None, factory);
	}

	fn insert(&self, kind: Option<FileKind>, factory: Arc<dyn PassFactory>) {
		let mut entries = self.entries.write();
		let id = factory.id();
		tracing::debug!(pass = id.0, name = factory.name(), kind = ?kind.as_ref().map(FileKind::as_str), "daemon.registry.register");
		if let Some(existing) = entries.iter_mut().find(|e| e.kind == kind && e.factory.id() == id) {
			existing.factory = factory;
		} else {
			entries.push(Registration { kind, factory });
		}
	}

	/// Removes every registration of `pass`. Returns true if any existed.
	pub fn unregister(&self, pass: PassId) -> bool {
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|e| e.factory.id() != pass);
		before != entries.len()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl FactoryRegistry for PassRegistry {
	fn factories_for(&self, kind: &FileKind) -> Vec<Arc<dyn PassFactory>> {
		let entries = self.entries.read();
		let mut out: Vec<Arc<dyn PassFactory>> = Vec::new();
		for entry in entries.iter() {
			let applies = entry.kind.as_ref().is_none_or(|k| k == kind);
			if applies && !out.iter().any(|f| f.id() == entry.factory.id()) {
				out.push(Arc::clone(&entry.factory));
			}
		}
		out
	}
}
