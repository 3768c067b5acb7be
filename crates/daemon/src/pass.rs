//! Pass contracts: factories create passes, passes collect then apply.

use std::sync::Arc;

use crate::dirty::{Coverage, DirtyScope};
use crate::error::{Canceled, PassError};
use crate::progress::ProgressToken;
use crate::range::TextRange;
use crate::types::{DocumentHandle, DocumentId, EditorId, PassId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
	Error,
	Warning,
	WeakWarning,
	Information,
}

/// One reported finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
	pub range: TextRange,
	pub severity: Severity,
	pub message: String,
}

impl Artifact {
	pub fn new(range: TextRange, severity: Severity, message: impl Into<String>) -> Self {
		Self {
			range,
			severity,
			message: message.into(),
		}
	}

	pub fn error(range: TextRange, message: impl Into<String>) -> Self {
		Self::new(range, Severity::Error, message)
	}

	pub fn warning(range: TextRange, message: impl Into<String>) -> Self {
		Self::new(range, Severity::Warning, message)
	}
}

/// Results of one pass for one document, delivered on the interactive thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassBatch {
	pub pass: PassId,
	pub document: DocumentId,
	pub editor: EditorId,
	pub coverage: Coverage,
	pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
	Pending,
	Running,
	Done,
	Canceled,
	Failed,
}

impl PassState {
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Done | Self::Canceled | Self::Failed)
	}
}

/// Whether a pass runs once per document or once per editor showing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassBinding {
	#[default]
	Document,
	Editor,
}

/// What a factory is asked to create a pass for.
#[derive(Debug, Clone, Copy)]
pub struct PassTarget<'a> {
	pub document: &'a DocumentHandle,
	pub editor: EditorId,
	pub scope: DirtyScope,
}

/// Read-only view handed to [`HighlightingPass::collect`].
#[derive(Debug)]
pub struct PassContext<'a> {
	pub(crate) token: &'a ProgressToken,
	pub(crate) document: DocumentId,
	pub(crate) editor: EditorId,
	pub(crate) scope: DirtyScope,
	pub(crate) stamp: u64,
}

impl PassContext<'_> {
	/// Returns `Err(Canceled)` once the run is canceled. Call it often.
	pub fn check_canceled(&self) -> Result<(), Canceled> {
		self.token.check_canceled()
	}

	pub fn is_canceled(&self) -> bool {
		self.token.is_canceled()
	}

	pub fn document(&self) -> DocumentId {
		self.document
	}

	pub fn editor(&self) -> EditorId {
		self.editor
	}

	/// Dirty scope the pass was created for.
	pub fn scope(&self) -> DirtyScope {
		self.scope
	}

	/// Document stamp the run computes against.
	pub fn stamp(&self) -> u64 {
		self.stamp
	}

	pub fn is_complete_essential_requested(&self) -> bool {
		self.token.is_complete_essential_requested()
	}
}

/// A unit of analysis for one document (or one editor).
///
/// `collect` runs on a worker thread and must only read shared state.
/// `apply` runs on the interactive thread, in graph order, and must be short.
pub trait HighlightingPass: Send {
	fn collect(&mut self, cx: &PassContext<'_>) -> Result<Vec<Artifact>, PassError>;

	/// Range actually analyzed; `None` means the scope the pass was created for.
	fn coverage(&self) -> Option<Coverage> {
		None
	}

	fn apply(&mut self, _batch: &PassBatch) -> Result<(), PassError> {
		Ok(())
	}
}

/// Describes and instantiates one kind of pass.
pub trait PassFactory: Send + Sync {
	fn id(&self) -> PassId;

	fn name(&self) -> &str;

	fn depends_on(&self) -> &[PassId] {
		&[]
	}

	/// Lower runs earlier among otherwise unordered passes.
	fn priority(&self) -> i32 {
		0
	}

	/// Dumb-aware passes may run while a heavy operation (indexing) is active.
	fn is_dumb_aware(&self) -> bool {
		false
	}

	/// The general pass produces the foundation other passes read and always runs first.
	fn is_general(&self) -> bool {
		false
	}

	fn binding(&self) -> PassBinding {
		PassBinding::Document
	}

	/// Returns `Ok(None)` when the pass has nothing to do for this target.
	fn create(&self, target: &PassTarget<'_>) -> anyhow::Result<Option<Box<dyn HighlightingPass>>>;
}

/// Static description of a pass, for factories built from closures.
#[derive(Debug, Clone)]
pub struct PassDescriptor {
	pub id: PassId,
	pub name: Arc<str>,
	pub depends_on: Vec<PassId>,
	pub priority: i32,
	pub dumb_aware: bool,
	pub general: bool,
	pub binding: PassBinding,
}

impl PassDescriptor {
	pub fn new(id: PassId, name: &str) -> Self {
		Self {
			id,
			name: Arc::from(name),
			depends_on: Vec::new(),
			priority: 0,
			dumb_aware: false,
			general: false,
			binding: PassBinding::Document,
		}
	}

	pub fn depends_on(mut self, deps: impl IntoIterator<Item = PassId>) -> Self {
		self.depends_on.extend(deps);
		self
	}

	pub fn priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn dumb_aware(mut self) -> Self {
		self.dumb_aware = true;
		self
	}

	pub fn general(mut self) -> Self {
		self.general = true;
		self
	}

	pub fn per_editor(mut self) -> Self {
		self.binding = PassBinding::Editor;
		self
	}

	/// Pairs the descriptor with a creation closure.
	pub fn build<F>(self, create: F) -> FnPassFactory<F>
	where
		F: Fn(&PassTarget<'_>) -> anyhow::Result<Option<Box<dyn HighlightingPass>>> + Send + Sync,
	{
		FnPassFactory { descriptor: self, create }
	}
}

/// [`PassFactory`] backed by a [`PassDescriptor`] and a closure.
pub struct FnPassFactory<F> {
	descriptor: PassDescriptor,
	create: F,
}

impl<F> PassFactory for FnPassFactory<F>
where
	F: Fn(&PassTarget<'_>) -> anyhow::Result<Option<Box<dyn HighlightingPass>>> + Send + Sync,
{
	fn id(&self) -> PassId {
		self.descriptor.id
	}

	fn name(&self) -> &str {
		&self.descriptor.name
	}

	fn depends_on(&self) -> &[PassId] {
		&self.descriptor.depends_on
	}

	fn priority(&self) -> i32 {
		self.descriptor.priority
	}

	fn is_dumb_aware(&self) -> bool {
		self.descriptor.dumb_aware
	}

	fn is_general(&self) -> bool {
		self.descriptor.general
	}

	fn binding(&self) -> PassBinding {
		self.descriptor.binding
	}

	fn create(&self, target: &PassTarget<'_>) -> anyhow::Result<Option<Box<dyn HighlightingPass>>> {
		(self.create)(target)
	}
}
