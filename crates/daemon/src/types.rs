//! Identifiers and host-side handles shared by every daemon component.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::range::TextEdit;

/// Stable identity of an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

/// Identity of one editor view. Several editors may show the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditorId(pub u64);

/// Identity of a registered pass factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub u32);

impl fmt::Display for PassId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// File kind used to select pass factories (for example `"rust"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKind(Arc<str>);

impl FileKind {
	pub fn new(kind: impl AsRef<str>) -> Self {
		Self(Arc::from(kind.as_ref()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for FileKind {
	fn from(kind: &str) -> Self {
		Self::new(kind)
	}
}

impl fmt::Display for FileKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// One active editor as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorHandle {
	pub id: EditorId,
	/// The focused editor is preferred for document-bound passes.
	pub focused: bool,
}

impl EditorHandle {
	pub fn new(id: EditorId) -> Self {
		Self { id, focused: false }
	}

	pub fn focused(id: EditorId) -> Self {
		Self { id, focused: true }
	}
}

/// Snapshot of a document as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
	pub id: DocumentId,
	pub kind: FileKind,
	/// Modification stamp, bumped on every edit.
	pub stamp: u64,
	/// Text length in bytes.
	pub len: u32,
	/// True while the host applies a bulk update to this document.
	pub in_bulk_update: bool,
}

impl DocumentHandle {
	pub fn new(id: DocumentId, kind: impl Into<FileKind>, stamp: u64, len: u32) -> Self {
		Self {
			id,
			kind: kind.into(),
			stamp,
			len,
			in_bulk_update: false,
		}
	}
}

/// Edit notification delivered by the host after the text changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentEdit {
	pub document: DocumentId,
	/// `None` when the change cannot be range-scoped (reload, encoding change).
	pub edit: Option<TextEdit>,
	/// Stamp of the document after the edit.
	pub stamp: u64,
}
