//! Shared fixtures for unit tests: scripted passes gated behind a barrier,
//! a fake editor host, and a heavy-activity switch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Canceled, PassError};
use crate::host::{EditorSource, HeavyActivityProbe};
use crate::pass::{Artifact, HighlightingPass, PassBatch, PassContext, PassDescriptor, PassFactory};
use crate::range::TextRange;
use crate::types::{DocumentHandle, DocumentId, EditorHandle, EditorId};

pub(crate) fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Barrier that holds `collect` calls until opened.
#[derive(Debug, Default)]
pub(crate) struct Gate {
	open: Mutex<bool>,
	cv: Condvar,
}

impl Gate {
	pub(crate) fn closed() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn open(&self) {
		*self.open.lock() = true;
		self.cv.notify_all();
	}

	pub(crate) fn close(&self) {
		*self.open.lock() = false;
	}

	/// Waits for the gate, bailing out as soon as the run is canceled.
	fn pass_through(&self, cx: &PassContext<'_>) -> Result<(), Canceled> {
		let mut open = self.open.lock();
		while !*open {
			cx.check_canceled()?;
			self.cv.wait_for(&mut open, Duration::from_millis(2));
		}
		Ok(())
	}
}

/// Opens the gate on drop so a failing test never leaves workers parked.
pub(crate) struct GateGuard(pub(crate) Arc<Gate>);

impl Drop for GateGuard {
	fn drop(&mut self) {
		self.0.open();
	}
}

/// Ordered log of pass activity.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
	pub(crate) fn push(&self, entry: String) {
		self.0.lock().push(entry);
	}

	pub(crate) fn with_prefix(&self, prefix: &str) -> Vec<String> {
		self.0.lock().iter().filter(|e| e.starts_with(prefix)).cloned().collect()
	}

	pub(crate) fn count(&self, prefix: &str) -> usize {
		self.with_prefix(prefix).len()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
	Succeed,
	Fail(&'static str),
	Panic,
	FailApply,
	/// Spins on `check_canceled` until the run is canceled.
	UntilCanceled,
	/// Reports cancellation from its first collect only.
	CancelFirst,
}

pub(crate) struct ScriptedPass {
	name: Arc<str>,
	journal: Journal,
	gate: Option<Arc<Gate>>,
	behavior: Behavior,
}

impl HighlightingPass for ScriptedPass {
	fn collect(&mut self, cx: &PassContext<'_>) -> Result<Vec<Artifact>, PassError> {
		self.journal.push(format!("collect:{}:{}", self.name, cx.document().0));
		if let Some(gate) = &self.gate {
			gate.pass_through(cx)?;
		}
		match self.behavior {
			Behavior::Succeed | Behavior::FailApply => {
				cx.check_canceled()?;
				Ok(vec![Artifact::warning(TextRange::new(0, 1), self.name.to_string())])
			}
			Behavior::Fail(message) => Err(PassError::failed(message)),
			Behavior::Panic => panic!("{} exploded", self.name),
			Behavior::CancelFirst if self.journal.count(&format!("collect:{}:", self.name)) == 1 => Err(Canceled.into()),
			Behavior::CancelFirst => Ok(vec![Artifact::warning(TextRange::new(0, 1), self.name.to_string())]),
			Behavior::UntilCanceled => loop {
				cx.check_canceled()?;
				std::thread::sleep(Duration::from_millis(1));
			},
		}
	}

	fn apply(&mut self, batch: &PassBatch) -> Result<(), PassError> {
		if self.behavior == Behavior::FailApply {
			return Err(PassError::failed(format!("{} could not publish", self.name)));
		}
		self.journal
			.push(format!("apply:{}:{}:{}", self.name, batch.document.0, batch.editor.0));
		Ok(())
	}
}

pub(crate) fn scripted(descriptor: PassDescriptor, journal: &Journal, gate: Option<&Arc<Gate>>, behavior: Behavior) -> Arc<dyn PassFactory> {
	let journal = journal.clone();
	let gate = gate.cloned();
	let name = Arc::clone(&descriptor.name);
	Arc::new(descriptor.build(move |_| {
		Ok(Some(Box::new(ScriptedPass {
			name: Arc::clone(&name),
			journal: journal.clone(),
			gate: gate.clone(),
			behavior,
		}) as Box<dyn HighlightingPass>))
	}))
}

pub(crate) fn rust_doc(id: u64, len: u32) -> DocumentHandle {
	DocumentHandle::new(DocumentId(id), "rust", 1, len)
}

/// In-memory editor host.
#[derive(Debug, Default)]
pub(crate) struct FakeEditors {
	shown: Mutex<Vec<(EditorHandle, DocumentHandle)>>,
}

impl FakeEditors {
	pub(crate) fn show(&self, editor: EditorHandle, doc: DocumentHandle) {
		let mut shown = self.shown.lock();
		shown.retain(|(e, _)| e.id != editor.id);
		shown.push((editor, doc));
	}

	pub(crate) fn hide(&self, editor: EditorId) {
		self.shown.lock().retain(|(e, _)| e.id != editor);
	}

	/// Replaces the snapshot of `doc` in every editor showing it.
	pub(crate) fn update(&self, doc: DocumentHandle) {
		for (_, shown) in self.shown.lock().iter_mut().filter(|(_, d)| d.id == doc.id) {
			*shown = doc.clone();
		}
	}

	pub(crate) fn handles(&self) -> Vec<EditorHandle> {
		self.shown.lock().iter().map(|(e, _)| *e).collect()
	}
}

impl EditorSource for FakeEditors {
	fn active_editors(&self) -> Vec<EditorHandle> {
		self.handles()
	}

	fn document(&self, editor: EditorId) -> Option<DocumentHandle> {
		self.shown.lock().iter().find(|(e, _)| e.id == editor).map(|(_, d)| d.clone())
	}
}

#[derive(Debug, Default)]
pub(crate) struct HeavySwitch(AtomicBool);

impl HeavySwitch {
	pub(crate) fn set(&self, heavy: bool) {
		self.0.store(heavy, Ordering::SeqCst);
	}
}

impl HeavyActivityProbe for HeavySwitch {
	fn is_heavy_operation_running(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}
