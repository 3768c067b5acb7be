//! Per-document, per-pass dirty scope tracking.
//!
//! The tracker is owned by the scheduler and only touched on the interactive
//! thread. Completions carry the document stamp they were computed against and
//! are rejected once a newer edit arrived, so a stale run can never hide dirt.

use rustc_hash::FxHashMap;

use crate::error::illegal_usage;
use crate::range::{TextEdit, TextRange};
use crate::types::{DocumentId, PassId};

/// What part of a document a pass still has to analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyScope {
	Clean,
	Range(TextRange),
	Whole,
}

impl DirtyScope {
	pub fn is_clean(self) -> bool {
		matches!(self, Self::Clean)
	}

	/// Maps a tracked range through an edit and unions in the edited text.
	fn absorb_edit(self, edit: TextEdit) -> Self {
		let touched = edit.new_range();
		match self {
			Self::Whole => Self::Whole,
			Self::Clean => Self::Range(touched),
			Self::Range(range) => Self::Range(range.shift_through(edit).cover(touched)),
		}
	}

	fn absorb_range(self, range: TextRange) -> Self {
		match self {
			Self::Whole => Self::Whole,
			Self::Clean => Self::Range(range),
			Self::Range(current) => Self::Range(current.cover(range)),
		}
	}

	fn covered_by(self, coverage: Coverage, doc_len: u32) -> bool {
		match (self, coverage) {
			(Self::Clean, _) | (_, Coverage::Whole) => true,
			(Self::Range(dirty), Coverage::Range(done)) => done.contains_range(dirty),
			(Self::Whole, Coverage::Range(done)) => done.contains_range(TextRange::new(0, doc_len)),
		}
	}
}

/// The part of a document a completed pass actually analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
	Whole,
	Range(TextRange),
}

impl From<DirtyScope> for Coverage {
	fn from(scope: DirtyScope) -> Self {
		match scope {
			DirtyScope::Range(range) => Self::Range(range),
			DirtyScope::Clean | DirtyScope::Whole => Self::Whole,
		}
	}
}

/// Why a document is being dirtied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
	/// An edit; tracked ranges are shifted through it first.
	Edit(TextEdit),
	/// A region must be re-analyzed without any text change.
	Range(TextRange),
	/// Nothing about the previous results can be trusted.
	Whole,
}

#[derive(Debug)]
struct DocStatus {
	len: u32,
	stamp: u64,
	passes: FxHashMap<PassId, DirtyScope>,
}

#[derive(Debug)]
pub struct DirtyScopeTracker {
	docs: FxHashMap<DocumentId, DocStatus>,
	allow_dirt: bool,
}

impl Default for DirtyScopeTracker {
	fn default() -> Self {
		Self::new()
	}
}

impl DirtyScopeTracker {
	pub fn new() -> Self {
		Self {
			docs: FxHashMap::default(),
			allow_dirt: true,
		}
	}

	/// Starts tracking `doc`; every listed pass begins `Whole` dirty.
	///
	/// Re-registering a tracked document resets it.
	pub fn register_document(&mut self, doc: DocumentId, len: u32, stamp: u64, passes: impl IntoIterator<Item = PassId>) {
		let passes = passes.into_iter().map(|pass| (pass, DirtyScope::Whole)).collect();
		self.docs.insert(doc, DocStatus { len, stamp, passes });
		tracing::trace!(doc = doc.0, stamp, "daemon.dirty.register");
	}

	/// Adds a pass to a tracked document, `Whole` dirty. Known passes are kept as is.
	pub fn register_pass(&mut self, doc: DocumentId, pass: PassId) {
		if let Some(status) = self.docs.get_mut(&doc) {
			status.passes.entry(pass).or_insert(DirtyScope::Whole);
		}
	}

	pub fn forget_document(&mut self, doc: DocumentId) -> bool {
		self.docs.remove(&doc).is_some()
	}

	pub fn is_tracked(&self, doc: DocumentId) -> bool {
		self.docs.contains_key(&doc)
	}

	/// Tracked documents in id order.
	pub fn documents(&self) -> Vec<DocumentId> {
		let mut docs: Vec<_> = self.docs.keys().copied().collect();
		docs.sort();
		docs
	}

	/// Unions `invalidation` into every registered pass of `doc`.
	///
	/// Unknown documents are ignored.
	///
	/// # Panics
	///
	/// Panics if dirt is currently forbidden (see [`Self::allow_dirt`]). Dirt
	/// is re-allowed first so a single violation reports once.
	pub fn mark_dirty(&mut self, doc: DocumentId, invalidation: Invalidation, reason: &str) {
		self.assert_dirt_allowed(format_args!("document {}", doc.0), reason);
		let Some(status) = self.docs.get_mut(&doc) else {
			tracing::trace!(doc = doc.0, reason, "daemon.dirty.unknown_document");
			return;
		};
		if let Invalidation::Edit(edit) = invalidation {
			status.len = edit.apply_len(status.len);
		}
		for scope in status.passes.values_mut() {
			*scope = match invalidation {
				Invalidation::Edit(edit) => scope.absorb_edit(edit),
				Invalidation::Range(range) => scope.absorb_range(range),
				Invalidation::Whole => DirtyScope::Whole,
			};
		}
		tracing::debug!(doc = doc.0, ?invalidation, reason, "daemon.dirty.mark");
	}

	/// # Panics
	///
	/// Panics if dirt is currently forbidden.
	pub fn mark_all_dirty(&mut self, reason: &str) {
		self.assert_dirt_allowed(format_args!("all documents"), reason);
		for status in self.docs.values_mut() {
			status.passes.values_mut().for_each(|scope| *scope = DirtyScope::Whole);
		}
		tracing::debug!(docs = self.docs.len(), reason, "daemon.dirty.mark_all");
	}

	/// Records a newer modification stamp; older stamps are ignored.
	pub fn advance_stamp(&mut self, doc: DocumentId, stamp: u64) {
		if let Some(status) = self.docs.get_mut(&doc) {
			status.stamp = status.stamp.max(stamp);
		}
	}

	/// Overrides the tracked length, for hosts that report it after the fact.
	pub fn set_len(&mut self, doc: DocumentId, len: u32) {
		if let Some(status) = self.docs.get_mut(&doc) {
			status.len = len;
		}
	}

	/// Clears `pass` for `doc` if a run computed against `run_stamp` covered all of its dirt.
	///
	/// Returns true if the pass is clean afterwards. Stale completions
	/// (`run_stamp` older than the current stamp) never clear anything.
	pub fn mark_up_to_date(&mut self, doc: DocumentId, pass: PassId, coverage: Coverage, run_stamp: u64) -> bool {
		let Some(status) = self.docs.get_mut(&doc) else {
			return false;
		};
		if run_stamp < status.stamp {
			tracing::debug!(doc = doc.0, pass = pass.0, run_stamp, current = status.stamp, "daemon.dirty.stale_completion");
			return false;
		}
		let len = status.len;
		let Some(scope) = status.passes.get_mut(&pass) else {
			return false;
		};
		if !scope.covered_by(coverage, len) {
			tracing::trace!(doc = doc.0, pass = pass.0, ?coverage, dirty = ?*scope, "daemon.dirty.partial_completion");
			return false;
		}
		*scope = DirtyScope::Clean;
		true
	}

	/// True iff every registered pass of `doc` is clean. Unknown documents are vacuously clean.
	pub fn is_all_clean(&self, doc: DocumentId) -> bool {
		self.docs
			.get(&doc)
			.is_none_or(|status| status.passes.values().all(|scope| scope.is_clean()))
	}

	pub fn scope(&self, doc: DocumentId, pass: PassId) -> Option<DirtyScope> {
		self.docs.get(&doc)?.passes.get(&pass).copied()
	}

	pub fn stamp(&self, doc: DocumentId) -> Option<u64> {
		self.docs.get(&doc).map(|status| status.stamp)
	}

	pub fn len(&self, doc: DocumentId) -> Option<u32> {
		self.docs.get(&doc).map(|status| status.len)
	}

	fn assert_dirt_allowed(&mut self, what: std::fmt::Arguments<'_>, reason: &str) {
		if !self.allow_dirt {
			self.allow_dirt = true;
			illegal_usage(format_args!("{what} modified while dirt is forbidden ({reason})"));
		}
	}

	/// Sets whether documents may be dirtied and returns the previous setting.
	pub fn allow_dirt(&mut self, allow: bool) -> bool {
		std::mem::replace(&mut self.allow_dirt, allow)
	}
}
