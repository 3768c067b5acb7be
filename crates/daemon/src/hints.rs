//! Per-document import hint switches.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::types::DocumentId;

/// Serializable snapshot of documents whose import hints are switched off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintsState {
	#[serde(default)]
	pub disabled: Vec<DocumentId>,
}

#[derive(Debug, Default)]
pub(crate) struct DisabledHints {
	ids: FxHashSet<DocumentId>,
}

impl DisabledHints {
	/// Returns true if the setting changed.
	pub(crate) fn set_enabled(&mut self, doc: DocumentId, enabled: bool) -> bool {
		if enabled { self.ids.remove(&doc) } else { self.ids.insert(doc) }
	}

	pub(crate) fn is_enabled(&self, doc: DocumentId) -> bool {
		!self.ids.contains(&doc)
	}

	pub(crate) fn clear(&mut self) {
		self.ids.clear();
	}

	pub(crate) fn snapshot(&self) -> HintsState {
		let mut disabled: Vec<_> = self.ids.iter().copied().collect();
		disabled.sort();
		HintsState { disabled }
	}

	pub(crate) fn load(&mut self, state: &HintsState) {
		self.ids = state.disabled.iter().copied().collect();
	}
}
