//! Runs a [`PassGraph`] under a [`ProgressToken`].
//!
//! Collect phases run as tasks on the worker pool. Their results queue up in a
//! channel until [`Executor::drain`] is called on the interactive thread,
//! which applies them per document strictly in graph order. A canceled token
//! aborts every pass that has not been applied yet; batches already applied
//! stay valid.

mod task;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use xeno_worker::{JobTracker, WorkerPool, panic_message};

use self::task::{Collected, PassJob, Signal, StateCell};
use crate::dirty::{Coverage, DirtyScope, DirtyScopeTracker};
use crate::error::{DaemonError, PassError};
use crate::graph::{PassGraph, PassInstance};
use crate::pass::{Artifact, PassBatch, PassContext, PassState};
use crate::progress::ProgressToken;
use crate::types::{DocumentId, EditorId, PassId};

/// Upper bound for waiting on canceled collect phases to unwind.
pub const CANCEL_WAIT: Duration = Duration::from_secs(30);

/// Cancel reason recorded when a pass itself reports [`PassError::Canceled`]
/// while its run was still live.
pub const PASS_CANCELED: &str = "pass canceled";

/// Receives every applied batch on the interactive thread.
pub type CommitFn = Box<dyn FnMut(&PassBatch) + Send>;

/// Batches applied by one run, in commit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
	pub epoch: u64,
	pub batches: Vec<PassBatch>,
}

impl RunResult {
	pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
		self.batches.iter().flat_map(|b| b.artifacts.iter())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
	/// Every pass reached a terminal state without the token being canceled.
	Completed { result: RunResult, failure: Option<DaemonError> },
	/// The token was canceled; passes not yet applied were aborted.
	Canceled { result: RunResult, failure: Option<DaemonError> },
}

impl RunEnd {
	pub fn result(&self) -> &RunResult {
		match self {
			Self::Completed { result, .. } | Self::Canceled { result, .. } => result,
		}
	}

	pub fn failure(&self) -> Option<&DaemonError> {
		match self {
			Self::Completed { failure, .. } | Self::Canceled { failure, .. } => failure.as_ref(),
		}
	}

	pub fn is_canceled(&self) -> bool {
		matches!(self, Self::Canceled { .. })
	}
}

/// A run that ended, with the token it ran under.
#[derive(Debug)]
pub struct FinishedRun {
	pub token: ProgressToken,
	pub end: RunEnd,
}

/// What one [`Executor::drain`] call did.
#[derive(Debug, Default)]
pub struct DrainReport {
	pub applied: usize,
	pub finished: Option<FinishedRun>,
}

/// Progress view of one submitted pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedPass {
	pub pass: PassId,
	pub name: Arc<str>,
	pub editor: EditorId,
	pub state: PassState,
}

struct Slot {
	id: PassId,
	name: Arc<str>,
	editor: EditorId,
	scope: DirtyScope,
	state: Arc<StateCell>,
	collected: Option<Collected>,
}

struct DocRun {
	document: DocumentId,
	stamp: u64,
	slots: Vec<Slot>,
	/// Index of the next slot to commit.
	next: usize,
}

struct ActiveRun {
	token: ProgressToken,
	jobs: JobTracker,
	rx: mpsc::UnboundedReceiver<Collected>,
	docs: Vec<DocRun>,
	commit: CommitFn,
	result: RunResult,
	failure: Option<DaemonError>,
}

impl ActiveRun {
	fn receive(&mut self) {
		while let Ok(collected) = self.rx.try_recv() {
			let (doc, slot) = (collected.doc, collected.slot);
			if let Some(slot) = self.docs.get_mut(doc).and_then(|d| d.slots.get_mut(slot)) {
				slot.collected = Some(collected);
			}
		}
	}

	fn is_complete(&self) -> bool {
		self.docs.iter().all(|d| d.next == d.slots.len())
	}

	fn apply_ready(&mut self, tracker: &mut DirtyScopeTracker, report: &mut DrainReport) {
		let ActiveRun {
			token,
			docs,
			commit,
			result,
			failure,
			..
		} = self;
		for doc in docs.iter_mut() {
			while let Some(slot) = doc.slots.get_mut(doc.next) {
				if token.is_canceled() {
					return;
				}
				let Some(collected) = slot.collected.take() else {
					break;
				};
				doc.next += 1;
				let applied = commit_one(slot, doc.document, doc.stamp, collected, token, commit, tracker, failure);
				if let Some(batch) = applied {
					result.batches.push(batch);
					report.applied += 1;
				}
			}
		}
	}

	fn abort_unapplied(&mut self) {
		for doc in &mut self.docs {
			for slot in &mut doc.slots[doc.next..] {
				slot.collected = None;
				if !slot.state.get().is_terminal() {
					slot.state.set(PassState::Canceled);
				}
			}
			doc.next = doc.slots.len();
		}
	}
}

fn commit_one(
	slot: &Slot,
	document: DocumentId,
	stamp: u64,
	collected: Collected,
	token: &ProgressToken,
	commit: &mut CommitFn,
	tracker: &mut DirtyScopeTracker,
	failure: &mut Option<DaemonError>,
) -> Option<PassBatch> {
	let Collected { mut pass, outcome, .. } = collected;
	let artifacts = match outcome {
		Ok(artifacts) => artifacts,
		Err(PassError::Canceled(_)) => {
			slot.state.set(PassState::Canceled);
			return None;
		}
		Err(PassError::Failed(err)) => {
			slot.state.set(PassState::Failed);
			record_failure(failure, slot, document, format!("{err:#}"));
			return None;
		}
	};

	let coverage = pass
		.as_ref()
		.and_then(|p| p.coverage())
		.unwrap_or_else(|| Coverage::from(slot.scope));
	let batch = PassBatch {
		pass: slot.id,
		document,
		editor: slot.editor,
		coverage,
		artifacts,
	};
	if let Some(pass) = pass.as_mut() {
		let applied = std::panic::catch_unwind(AssertUnwindSafe(|| pass.apply(&batch)))
			.unwrap_or_else(|payload| Err(PassError::failed(format!("apply panicked: {}", panic_message(payload.as_ref())))));
		match applied {
			Ok(()) => {}
			Err(PassError::Canceled(_)) => {
				slot.state.set(PassState::Canceled);
				cancel_from_pass(token, slot);
				return None;
			}
			Err(PassError::Failed(err)) => {
				slot.state.set(PassState::Failed);
				record_failure(failure, slot, document, format!("{err:#}"));
				return None;
			}
		}
	}

	(*commit)(&batch);
	let cleared = tracker.mark_up_to_date(document, slot.id, batch.coverage, stamp);
	slot.state.set(PassState::Done);
	tracing::trace!(pass = slot.id.0, doc = document.0, editor = slot.editor.0, artifacts = batch.artifacts.len(), cleared, "daemon.executor.apply");
	Some(batch)
}

/// A pass that reports cancellation on its own ends the whole run.
/// Collect-side cancellation is handled by the pass task.
fn cancel_from_pass(token: &ProgressToken, slot: &Slot) {
	if token.cancel_with_reason(PASS_CANCELED) {
		tracing::debug!(pass = slot.id.0, name = %slot.name, epoch = token.epoch(), "daemon.executor.apply_canceled_run");
	}
}

/// First failure wins; later ones are attached to it.
fn record_failure(failure: &mut Option<DaemonError>, slot: &Slot, document: DocumentId, message: String) {
	tracing::warn!(pass = slot.id.0, name = %slot.name, doc = document.0, %message, "daemon.executor.pass_failed");
	match failure {
		Some(DaemonError::PassExecution { suppressed, .. }) => suppressed.push(format!("{} ({}): {message}", slot.id, slot.name)),
		Some(_) => {}
		None => {
			*failure = Some(DaemonError::PassExecution {
				pass: slot.id,
				name: slot.name.to_string(),
				document,
				message,
				suppressed: Vec::new(),
			});
		}
	}
}

pub struct Executor {
	pool: WorkerPool,
	active: Option<ActiveRun>,
	/// Job trackers of canceled runs whose collect phases may still be unwinding.
	retired: Vec<JobTracker>,
}

impl Executor {
	pub fn new(max_workers: usize) -> Self {
		Self::with_pool(WorkerPool::new(max_workers))
	}

	pub fn with_pool(pool: WorkerPool) -> Self {
		Self {
			pool,
			active: None,
			retired: Vec::new(),
		}
	}

	pub fn pool(&self) -> &WorkerPool {
		&self.pool
	}

	/// Starts running `graph` under `token`.
	///
	/// A still-active previous run is canceled and retired first.
	pub fn submit(&mut self, graph: PassGraph, token: ProgressToken, commit: CommitFn) {
		if let Some(previous) = self.active.take() {
			previous.token.cancel_with_reason("superseded");
			self.retire(previous);
		}

		let jobs = JobTracker::new();
		let (tx, rx) = mpsc::unbounded_channel();
		let mut docs = Vec::new();
		let mut spawned = 0usize;

		for (doc_index, doc) in graph.into_documents().into_iter().enumerate() {
			let senders: Vec<watch::Sender<Signal>> = doc.instances.iter().map(|_| watch::channel(Signal::Pending).0).collect();
			let deps: Vec<Vec<watch::Receiver<Signal>>> = doc
				.instances
				.iter()
				.map(|i| i.after.iter().map(|&pos| senders[pos].subscribe()).collect())
				.collect();

			let mut slots = Vec::with_capacity(doc.instances.len());
			for (slot_index, ((instance, done), deps)) in doc.instances.into_iter().zip(senders).zip(deps).enumerate() {
				let PassInstance {
					id,
					name,
					editor,
					scope,
					pass,
					..
				} = instance;
				let state = Arc::new(StateCell::new(PassState::Pending));
				let job = PassJob {
					doc: doc_index,
					slot: slot_index,
					document: doc.document,
					editor,
					scope,
					stamp: doc.stamp,
					pass,
					deps,
					done,
					state: Arc::clone(&state),
					token: token.clone(),
					tx: tx.clone(),
					job: jobs.enter(format!("{name} on document {}", doc.document.0)),
				};
				self.pool.spawn(job.run(self.pool.clone()));
				spawned += 1;
				slots.push(Slot {
					id,
					name,
					editor,
					scope,
					state,
					collected: None,
				});
			}
			docs.push(DocRun {
				document: doc.document,
				stamp: doc.stamp,
				slots,
				next: 0,
			});
		}

		tracing::debug!(epoch = token.epoch(), passes = spawned, documents = docs.len(), "daemon.executor.submit");
		self.active = Some(ActiveRun {
			result: RunResult {
				epoch: token.epoch(),
				batches: Vec::new(),
			},
			token,
			jobs,
			rx,
			docs,
			commit,
			failure: None,
		});
	}

	/// Applies every batch whose turn has come and reports a finished run.
	///
	/// Must be called on the interactive thread.
	pub fn drain(&mut self, tracker: &mut DirtyScopeTracker) -> DrainReport {
		let mut report = DrainReport::default();
		self.retired.retain(|jobs| jobs.pending() > 0);

		let ended = match self.active.as_mut() {
			None => return report,
			Some(run) => {
				run.receive();
				if !run.token.is_canceled() {
					run.apply_ready(tracker, &mut report);
				}
				if run.token.is_canceled() {
					Some(false)
				} else if run.is_complete() {
					Some(true)
				} else {
					None
				}
			}
		};

		if let Some(completed) = ended
			&& let Some(run) = self.active.take()
		{
			report.finished = Some(self.finish(run, completed));
		}
		report
	}

	fn finish(&mut self, mut run: ActiveRun, completed: bool) -> FinishedRun {
		let epoch = run.token.epoch();
		let result = std::mem::take(&mut run.result);
		let failure = run.failure.take();
		let end = if completed {
			tracing::debug!(epoch, batches = result.batches.len(), failed = failure.is_some(), "daemon.executor.completed");
			RunEnd::Completed { result, failure }
		} else {
			run.abort_unapplied();
			tracing::debug!(epoch, batches = result.batches.len(), reason = ?run.token.cancel_reason(), "daemon.executor.canceled");
			RunEnd::Canceled { result, failure }
		};
		let token = run.token.clone();
		self.retire(run);
		FinishedRun { token, end }
	}

	fn retire(&mut self, run: ActiveRun) {
		if run.jobs.pending() > 0 {
			self.retired.push(run.jobs);
		}
	}

	/// Blocks until every collect phase of the current run has finished.
	///
	/// Returns true if nothing is left running.
	pub fn wait_for(&self, timeout: Duration) -> bool {
		self.active.as_ref().is_none_or(|run| run.jobs.wait_idle(timeout))
	}

	/// Cancels the current run and returns it as finished.
	///
	/// With `wait`, also blocks until collect phases of canceled runs unwound.
	pub fn cancel_all(&mut self, reason: &str, wait: bool) -> Option<FinishedRun> {
		let finished = self.active.take().map(|run| {
			run.token.cancel_with_reason(reason);
			self.finish(run, false)
		});
		if wait {
			for jobs in &self.retired {
				if !jobs.wait_idle(CANCEL_WAIT) {
					tracing::warn!(pending = ?jobs.pending_names(), "daemon.executor.cancel_wait_timeout");
				}
			}
			self.retired.retain(|jobs| jobs.pending() > 0);
		}
		finished
	}

	pub fn is_idle(&self) -> bool {
		self.active.is_none()
	}

	pub fn current_token(&self) -> Option<&ProgressToken> {
		self.active.as_ref().map(|run| &run.token)
	}

	/// Names of passes whose collect phase has not finished.
	pub fn pending_pass_names(&self) -> Vec<String> {
		self.active.as_ref().map(|run| run.jobs.pending_names()).unwrap_or_default()
	}

	/// Passes of the current run for `doc`, sorted by pass id.
	pub fn submitted_passes(&self, doc: DocumentId) -> Vec<SubmittedPass> {
		let Some(run) = self.active.as_ref() else {
			return Vec::new();
		};
		let mut passes: Vec<SubmittedPass> = run
			.docs
			.iter()
			.filter(|d| d.document == doc)
			.flat_map(|d| d.slots.iter())
			.map(|slot| SubmittedPass {
				pass: slot.id,
				name: Arc::clone(&slot.name),
				editor: slot.editor,
				state: slot.state.get(),
			})
			.collect();
		passes.sort_by_key(|p| (p.pass, p.editor));
		passes
	}

	/// Runs the collect phase of every pass in `graph` on the calling thread,
	/// in graph order, without applying anything.
	pub fn run_main_passes(graph: PassGraph, token: &ProgressToken) -> Result<Vec<Artifact>, DaemonError> {
		let mut artifacts = Vec::new();
		for doc in graph.into_documents() {
			let stamp = doc.stamp;
			for instance in doc.instances {
				token.check_canceled()?;
				let PassInstance {
					id,
					name,
					document,
					editor,
					scope,
					mut pass,
					..
				} = instance;
				let cx = PassContext {
					token,
					document,
					editor,
					scope,
					stamp,
				};
				match pass.collect(&cx) {
					Ok(found) => artifacts.extend(found),
					Err(PassError::Canceled(_)) => return Err(DaemonError::Canceled),
					Err(PassError::Failed(err)) => {
						return Err(DaemonError::PassExecution {
							pass: id,
							name: name.to_string(),
							document,
							message: format!("{err:#}"),
							suppressed: Vec::new(),
						});
					}
				}
			}
		}
		Ok(artifacts)
	}
}

impl Drop for Executor {
	fn drop(&mut self) {
		if let Some(run) = self.active.take() {
			run.token.cancel_with_reason("executor dropped");
		}
	}
}
