//! Interfaces the host editor implements.

use crate::types::{DocumentHandle, EditorHandle, EditorId};

/// Read access to the host's editors and documents.
pub trait EditorSource: Send + Sync {
	/// Editors currently visible, in host order.
	fn active_editors(&self) -> Vec<EditorHandle>;

	/// Document shown by `editor`, or `None` if the editor is gone.
	fn document(&self, editor: EditorId) -> Option<DocumentHandle>;
}

/// Reports whether a heavy background operation (indexing) is running.
pub trait HeavyActivityProbe: Send + Sync {
	fn is_heavy_operation_running(&self) -> bool;
}

/// Probe for hosts without heavy operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHeavyActivity;

impl HeavyActivityProbe for NoHeavyActivity {
	fn is_heavy_operation_running(&self) -> bool {
		false
	}
}
