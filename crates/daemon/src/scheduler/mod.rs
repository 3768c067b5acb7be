//! Top-level controller of background analysis.
//!
//! The [`Scheduler`] lives on the interactive thread (the thread that built
//! it). It turns edit, focus and settings events into dirty scopes and a
//! debounce deadline, and on [`Scheduler::tick`] starts a run: cancel the
//! previous token, install a new one, build the pass graph and hand it to the
//! [`Executor`]. Other threads talk to it through a [`SchedulerHandle`].
//!
//! # Run lifecycle
//!
//! `Idle -> Scheduled -> Running -> Completed | Canceled -> Scheduled | Idle`.
//! Every dirtying event cancels the live run and pushes the deadline out to
//! one debounce delay from now, never earlier than an already armed deadline.
//! At most one token is live at any time, and every `daemon_starting`
//! notification is paired with exactly one `daemon_finished`.

mod shared;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use xeno_worker::WorkerPool;

pub use self::shared::{SchedulerHandle, UpdateSuspension};
use self::shared::Shared;
use crate::config::{ConfigSource, DaemonConfig};
use crate::dirty::{Coverage, DirtyScope, DirtyScopeTracker, Invalidation};
use crate::error::{DaemonError, illegal_usage};
use crate::events::{DaemonListener, Listeners};
use crate::executor::{CommitFn, Executor, FinishedRun, PASS_CANCELED, RunEnd, RunResult, SubmittedPass};
use crate::graph::{BuildOptions, BuildTarget, PassGraph};
use crate::hints::{DisabledHints, HintsState};
use crate::host::{EditorSource, HeavyActivityProbe, NoHeavyActivity};
use crate::pass::PassBatch;
use crate::progress::ProgressToken;
use crate::registry::FactoryRegistry;
use crate::types::{DocumentEdit, DocumentHandle, DocumentId, EditorHandle, EditorId, PassId};

/// Slice [`Scheduler::run_passes`] blocks for between drains.
const POLL_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
	Idle,
	/// A run fires once `tick` is called at or after `deadline`.
	Scheduled { deadline: Instant },
	Running { epoch: u64 },
}

/// What one [`Scheduler::tick`] did.
#[derive(Debug, Default)]
pub struct TickOutcome {
	/// Batches applied during this tick.
	pub applied: usize,
	/// Epoch of the run started by this tick.
	pub started: Option<u64>,
	pub finished: Option<RunEnd>,
}

enum StartOutcome {
	Started(u64),
	NothingToDo(u64),
	/// A document is in bulk update.
	Suppressed,
	/// A cancel event arrived while the graph was being built.
	Canceled,
}

pub struct SchedulerBuilder {
	registry: Arc<dyn FactoryRegistry>,
	editors: Arc<dyn EditorSource>,
	config: Arc<dyn ConfigSource>,
	heavy: Arc<dyn HeavyActivityProbe>,
	listeners: Listeners,
	commit: Option<CommitFn>,
	pool: Option<WorkerPool>,
}

impl SchedulerBuilder {
	pub fn new(registry: Arc<dyn FactoryRegistry>, editors: Arc<dyn EditorSource>) -> Self {
		Self {
			registry,
			editors,
			config: Arc::new(DaemonConfig::default()),
			heavy: Arc::new(NoHeavyActivity),
			listeners: Listeners::default(),
			commit: None,
			pool: None,
		}
	}

	pub fn config(mut self, config: Arc<dyn ConfigSource>) -> Self {
		self.config = config;
		self
	}

	pub fn heavy_activity(mut self, probe: Arc<dyn HeavyActivityProbe>) -> Self {
		self.heavy = probe;
		self
	}

	pub fn listener(mut self, listener: Arc<dyn DaemonListener>) -> Self {
		self.listeners.push(listener);
		self
	}

	/// Receives every applied batch, on the interactive thread, in commit order.
	pub fn on_commit(mut self, commit: impl FnMut(&PassBatch) + Send + 'static) -> Self {
		self.commit = Some(Box::new(commit));
		self
	}

	/// Runs collect phases on `pool` instead of one sized from the config.
	pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
		self.pool = Some(pool);
		self
	}

	/// Builds the scheduler. The calling thread becomes the interactive thread.
	pub fn build(self) -> Scheduler {
		let config = self.config.daemon_config();
		let pool = self.pool.unwrap_or_else(|| WorkerPool::new(config.max_workers));
		let commit: CommitFn = self.commit.unwrap_or_else(|| Box::new(|_: &PassBatch| {}));
		let shared = Arc::new(Shared::new(self.config, self.registry, std::thread::current().id()));
		tracing::debug!(max_workers = pool.max_workers(), delay_ms = config.autoreparse_delay_ms, "daemon.scheduler.build");
		Scheduler {
			shared,
			tracker: DirtyScopeTracker::new(),
			executor: Executor::with_pool(pool),
			editors: self.editors,
			heavy: self.heavy,
			listeners: self.listeners,
			commit: Arc::new(Mutex::new(commit)),
			hints: DisabledHints::default(),
			highlighting_disabled: FxHashSet::default(),
			last_config: config,
			serialize_passes: false,
			complete_essential: false,
			deferred_by_heavy: false,
		}
	}
}

pub struct Scheduler {
	shared: Arc<Shared>,
	tracker: DirtyScopeTracker,
	executor: Executor,
	editors: Arc<dyn EditorSource>,
	heavy: Arc<dyn HeavyActivityProbe>,
	listeners: Listeners,
	commit: Arc<Mutex<CommitFn>>,
	hints: DisabledHints,
	highlighting_disabled: FxHashSet<DocumentId>,
	/// Config seen by the last [`Scheduler::settings_changed`].
	last_config: DaemonConfig,
	serialize_passes: bool,
	/// The next token asks passes for complete essential highlighting.
	complete_essential: bool,
	/// Passes were dropped for a heavy operation; re-arm once it ends.
	deferred_by_heavy: bool,
}

impl Scheduler {
	pub fn builder(registry: Arc<dyn FactoryRegistry>, editors: Arc<dyn EditorSource>) -> SchedulerBuilder {
		SchedulerBuilder::new(registry, editors)
	}

	pub fn handle(&self) -> SchedulerHandle {
		SchedulerHandle {
			shared: Arc::clone(&self.shared),
		}
	}

	fn assert_interactive(&self) {
		if !self.shared.is_interactive_thread() {
			illegal_usage("scheduler called off the interactive thread");
		}
	}

	fn is_live(&self) -> bool {
		self.assert_interactive();
		!self.shared.is_disposed()
	}

	pub fn document_opened(&mut self, doc: &DocumentHandle) {
		if !self.is_live() {
			return;
		}
		self.ensure_tracked(doc);
		self.stop_and_flush(true, "document opened");
	}

	pub fn document_closed(&mut self, doc: DocumentId) {
		if !self.is_live() {
			return;
		}
		self.tracker.forget_document(doc);
		self.highlighting_disabled.remove(&doc);
		self.stop_and_flush(true, "document closed");
	}

	/// Records an edit and schedules a re-run.
	///
	/// # Panics
	///
	/// Panics while a synchronous run forbids document changes.
	pub fn document_changed(&mut self, edit: DocumentEdit) {
		if !self.is_live() {
			return;
		}
		let invalidation = edit.edit.map_or(Invalidation::Whole, Invalidation::Edit);
		self.tracker.mark_dirty(edit.document, invalidation, "document changed");
		self.tracker.advance_stamp(edit.document, edit.stamp);
		self.stop_and_flush(true, "document changed");
	}

	/// Marks every tracked document dirty and schedules a run.
	pub fn restart(&mut self) {
		if !self.is_live() {
			return;
		}
		self.tracker.mark_all_dirty("restart");
		self.stop_and_flush(true, "restart");
	}

	pub fn restart_document(&mut self, doc: DocumentId) {
		if !self.is_live() {
			return;
		}
		self.tracker.mark_dirty(doc, Invalidation::Whole, "document restart");
		self.stop_and_flush(true, "document restart");
	}

	/// Focus or the set of visible editors changed.
	pub fn editors_changed(&mut self, reason: &str) {
		if !self.is_live() {
			return;
		}
		self.stop_and_flush(true, reason);
	}

	/// Re-reads the config source.
	///
	/// Highlighting-relevant changes re-analyze everything; switching
	/// automatic updates back on schedules a run.
	pub fn settings_changed(&mut self) {
		if !self.is_live() {
			return;
		}
		let config = self.shared.config.daemon_config();
		let previous = std::mem::replace(&mut self.last_config, config.clone());
		if previous.is_code_highlighting_changed(&config) {
			tracing::debug!(from = %previous.analysis_profile, to = %config.analysis_profile, "daemon.settings.profile_changed");
			self.tracker.mark_all_dirty("highlighting settings changed");
			self.stop_and_flush(true, "highlighting settings changed");
		} else if config.updates_enabled && !previous.updates_enabled {
			self.stop_and_flush(true, "automatic updates enabled");
		}
	}

	/// Cancels the current run and, with `restart`, schedules the next one.
	///
	/// Returns true if a run was canceled.
	pub fn stop_process(&mut self, restart: bool, reason: &str) -> bool {
		self.assert_interactive();
		let canceled = self.shared.stop_process(restart, reason);
		self.flush_notices();
		canceled
	}

	fn stop_and_flush(&mut self, restart: bool, reason: &str) {
		self.shared.stop_process(restart, reason);
		self.flush_notices();
	}

	pub fn is_update_by_timer_enabled(&self) -> bool {
		self.shared.is_update_by_timer_enabled()
	}

	/// Switches automatic runs on or off. An in-flight run is left alone.
	pub fn set_update_by_timer_enabled(&self, enabled: bool) {
		self.shared.set_update_by_timer_enabled(enabled);
	}

	pub fn disable_update_by_timer(&self) -> UpdateSuspension {
		self.handle().disable_update_by_timer()
	}

	pub fn set_highlighting_enabled(&mut self, doc: DocumentId, enabled: bool) {
		if !self.is_live() {
			return;
		}
		let changed = if enabled {
			self.highlighting_disabled.remove(&doc)
		} else {
			self.highlighting_disabled.insert(doc)
		};
		if !changed {
			return;
		}
		if enabled {
			self.tracker.mark_dirty(doc, Invalidation::Whole, "highlighting enabled");
		}
		self.stop_and_flush(true, if enabled { "highlighting enabled" } else { "highlighting disabled" });
	}

	pub fn is_highlighting_available(&self, doc: DocumentId) -> bool {
		!self.highlighting_disabled.contains(&doc)
	}

	/// Enabling hints for a document schedules a run so they show up.
	pub fn set_hints_enabled(&mut self, doc: DocumentId, enabled: bool) {
		if !self.is_live() {
			return;
		}
		if self.hints.set_enabled(doc, enabled) && enabled {
			self.stop_and_flush(true, "import hints enabled");
		}
	}

	pub fn is_hints_enabled_for(&self, doc: DocumentId) -> bool {
		self.hints.is_enabled(doc)
	}

	pub fn reset_hints(&mut self) {
		self.hints.clear();
	}

	pub fn hints_state(&self) -> HintsState {
		self.hints.snapshot()
	}

	pub fn load_hints_state(&mut self, state: &HintsState) {
		self.hints.load(state);
	}

	/// Re-analyzes everything; the next run asks passes for complete
	/// essential highlighting.
	pub fn restart_to_complete_essential_highlighting(&mut self) {
		if !self.is_live() {
			return;
		}
		self.complete_essential = true;
		self.restart();
	}

	/// Makes every non-general pass wait for the general pass.
	pub fn serialize_code_insight_passes(&mut self, serialize: bool) {
		if !self.is_live() {
			return;
		}
		let _suspended = self.disable_update_by_timer();
		self.stop_and_flush(false, "pass serialization changed");
		self.serialize_passes = serialize;
	}

	/// Applies finished batches and starts a run if the deadline is due.
	pub fn tick(&mut self, now: Instant) -> TickOutcome {
		self.assert_interactive();
		let mut outcome = self.drain_once();
		if self.deferred_by_heavy && !self.heavy.is_heavy_operation_running() {
			self.deferred_by_heavy = false;
			self.shared.stop_process(true, "heavy operation finished");
		}
		if self.shared.take_due(now) {
			outcome.started = self.on_timer();
		}
		self.flush_notices();
		outcome
	}

	fn on_timer(&mut self) -> Option<u64> {
		let updates_enabled = self.shared.config.daemon_config().updates_enabled;
		let by_timer = self.shared.is_update_by_timer_enabled();
		if !updates_enabled || !by_timer {
			tracing::debug!(updates_enabled, by_timer, "daemon.timer.suppressed");
			return None;
		}
		let editors = self.editors.active_editors();
		if editors.is_empty() {
			tracing::trace!("daemon.timer.no_editors");
			return None;
		}
		match self.queue_passes_creation(&editors, &[]) {
			StartOutcome::Started(epoch) => Some(epoch),
			StartOutcome::NothingToDo(_) | StartOutcome::Suppressed | StartOutcome::Canceled => None,
		}
	}

	fn drain_once(&mut self) -> TickOutcome {
		self.flush_notices();
		if self.shared.take_restart_request() {
			self.tracker.mark_all_dirty("restart requested");
		}
		let report = self.executor.drain(&mut self.tracker);
		let finished = report.finished.map(|run| self.finish_run(run));
		self.flush_notices();
		TickOutcome {
			applied: report.applied,
			started: None,
			finished,
		}
	}

	fn flush_notices(&self) {
		for reason in self.shared.take_notices() {
			self.listeners.cancel_event(&reason);
		}
	}

	fn finish_run(&mut self, run: FinishedRun) -> RunEnd {
		let FinishedRun { token, end } = run;
		if let Some(failure) = end.failure() {
			self.listeners.error(failure);
		}
		// A run canceled by its own pass has no event to re-arm it. A newer
		// token means a run is already starting.
		if end.is_canceled()
			&& token.cancel_reason().as_deref() == Some(PASS_CANCELED)
			&& self.shared.current_token().same_run(&token)
		{
			self.shared.stop_process(true, PASS_CANCELED);
		}
		self.retire_token(&token);
		end
	}

	/// Stops `token` and reports it finished once. Exhausted tokens are
	/// canceled silently so they never count as live.
	fn retire_token(&mut self, token: &ProgressToken) {
		if token.stop_if_running() {
			if token.is_complete_essential_requested() {
				self.complete_essential = false;
			}
			let editors = token.take_attached_editors();
			tracing::debug!(epoch = token.epoch(), reason = ?token.cancel_reason(), "daemon.run.finished");
			self.listeners.finished(&editors);
		}
		token.cancel_with_reason("completed");
	}

	fn ensure_tracked(&mut self, doc: &DocumentHandle) {
		let passes = self.shared.registry.pass_ids_for(&doc.kind);
		if self.tracker.is_tracked(doc.id) {
			for pass in passes {
				self.tracker.register_pass(doc.id, pass);
			}
			self.tracker.advance_stamp(doc.id, doc.stamp);
		} else {
			self.tracker.register_document(doc.id, doc.len, doc.stamp, passes);
		}
	}

	/// Groups editors by document, focused editor first. `None` if a
	/// document is in bulk update.
	fn collect_targets(&mut self, editors: &[EditorHandle]) -> Option<Vec<BuildTarget>> {
		let mut ordered = editors.to_vec();
		ordered.sort_by_key(|e| !e.focused);
		let mut targets: Vec<BuildTarget> = Vec::new();
		for editor in ordered {
			let Some(doc) = self.editors.document(editor.id) else {
				continue;
			};
			if doc.in_bulk_update {
				tracing::debug!(doc = doc.id.0, "daemon.bulk_update");
				self.shared.stop_process(false, "document in bulk update");
				return None;
			}
			if !self.is_highlighting_available(doc.id) {
				continue;
			}
			self.ensure_tracked(&doc);
			match targets.iter_mut().find(|t| t.document.id == doc.id) {
				Some(target) => target.editors.push(editor.id),
				None => targets.push(BuildTarget {
					document: doc,
					editors: vec![editor.id],
				}),
			}
		}
		Some(targets)
	}

	fn queue_passes_creation(&mut self, editors: &[EditorHandle], ignore: &[PassId]) -> StartOutcome {
		if editors.is_empty() {
			illegal_usage("cannot start a run without editors");
		}
		let Some(targets) = self.collect_targets(editors) else {
			return StartOutcome::Suppressed;
		};

		let editor_ids: Vec<EditorId> = targets.iter().flat_map(|t| t.editors.iter().copied()).collect();
		let clock = self.shared.clock.clone();
		let complete_essential = self.complete_essential;
		let token_editors = editor_ids.clone();
		let previous = self
			.shared
			.install_token("new run", move || ProgressToken::new(clock.next(), token_editors, complete_essential));
		self.flush_notices();
		if let Some(run) = self.executor.cancel_all("new run", false) {
			self.finish_run(run);
		}
		self.retire_token(&previous);

		let events_before = self.shared.cancel_events();
		let token = self.shared.current_token();
		let epoch = token.epoch();
		token.start();
		tracing::debug!(epoch, editors = editor_ids.len(), documents = targets.len(), complete_essential, "daemon.run.start");
		self.listeners.starting(&editor_ids);

		let options = BuildOptions {
			heavy_mode: self.heavy.is_heavy_operation_running(),
			serialize_passes: self.serialize_passes,
		};
		let mut graph = PassGraph::build(self.shared.registry.as_ref(), &self.tracker, &targets, ignore, options);
		for failure in graph.take_failures() {
			self.listeners.error(&failure);
		}
		if graph.dropped_for_heavy() > 0 {
			self.deferred_by_heavy = true;
		}

		if self.shared.cancel_events() != events_before {
			tracing::debug!(epoch, "daemon.run.canceled_while_building");
			self.shared.stop_process(true, "canceled while creating passes");
			self.flush_notices();
			self.retire_token(&token);
			return StartOutcome::Canceled;
		}
		if graph.is_empty() {
			tracing::debug!(epoch, "daemon.run.nothing_to_do");
			self.retire_token(&token);
			return StartOutcome::NothingToDo(epoch);
		}

		let sink = Arc::clone(&self.commit);
		self.executor.submit(
			graph,
			token,
			Box::new(move |batch: &PassBatch| {
				let mut commit = sink.lock();
				(*commit)(batch);
			}),
		);
		StartOutcome::Started(epoch)
	}

	/// Runs every pass for `editors` to completion and returns what was applied.
	///
	/// Automatic scheduling is bypassed: any in-flight run is canceled and
	/// waited for first. Passes in `ignore` count as done. Without
	/// `can_change_document`, dirtying a document during the run is illegal.
	///
	/// # Errors
	///
	/// The first pass failure, [`DaemonError::Canceled`] if the run was
	/// canceled, or [`DaemonError::Timeout`] naming the passes still running.
	///
	/// # Panics
	///
	/// Panics off the interactive thread, or when `editors` is empty.
	pub fn run_passes(
		&mut self,
		editors: &[EditorHandle],
		ignore: &[PassId],
		can_change_document: bool,
		timeout: Duration,
	) -> Result<RunResult, DaemonError> {
		if !self.is_live() {
			return Err(DaemonError::Canceled);
		}
		self.shared.clear_deadline();
		if let Some(run) = self.executor.cancel_all("synchronous run requested", true) {
			self.finish_run(run);
		}
		self.flush_notices();

		let previous = self.tracker.allow_dirt(can_change_document);
		let outcome = self.run_passes_inner(editors, ignore, timeout);
		self.tracker.allow_dirt(previous);
		self.flush_notices();
		outcome
	}

	fn run_passes_inner(&mut self, editors: &[EditorHandle], ignore: &[PassId], timeout: Duration) -> Result<RunResult, DaemonError> {
		for editor in editors {
			let Some(doc) = self.editors.document(editor.id) else {
				continue;
			};
			self.ensure_tracked(&doc);
			let stamp = self.tracker.stamp(doc.id).unwrap_or(doc.stamp);
			for &pass in ignore {
				self.tracker.mark_up_to_date(doc.id, pass, Coverage::Whole, stamp);
			}
		}

		let epoch = match self.queue_passes_creation(editors, ignore) {
			StartOutcome::Started(epoch) => epoch,
			StartOutcome::NothingToDo(epoch) => {
				return Ok(RunResult {
					epoch,
					batches: Vec::new(),
				});
			}
			StartOutcome::Suppressed | StartOutcome::Canceled => return Err(DaemonError::Canceled),
		};

		let started = Instant::now();
		loop {
			if let Some(end) = self.drain_once().finished {
				return match end {
					RunEnd::Completed { result, failure: None } => Ok(result),
					RunEnd::Completed { failure: Some(failure), .. } | RunEnd::Canceled { failure: Some(failure), .. } => Err(failure),
					RunEnd::Canceled { failure: None, .. } => Err(DaemonError::Canceled),
				};
			}
			let elapsed = started.elapsed();
			if elapsed >= timeout {
				let error = DaemonError::Timeout {
					elapsed,
					pending: self.executor.pending_pass_names(),
				};
				tracing::warn!(epoch, %error, "daemon.run_passes.timeout");
				self.listeners.error(&error);
				if let Some(run) = self.executor.cancel_all("synchronous run timed out", false) {
					self.finish_run(run);
				}
				return Err(error);
			}
			self.executor.wait_for(POLL_SLICE.min(timeout - elapsed));
		}
	}

	/// Cancels everything without restart. Later events are ignored.
	pub fn dispose(&mut self) {
		self.assert_interactive();
		if self.shared.is_disposed() {
			return;
		}
		self.shared.dispose();
		if let Some(run) = self.executor.cancel_all("dispose", false) {
			self.finish_run(run);
		}
		let token = self.shared.current_token();
		self.retire_token(&token);
		self.flush_notices();
		tracing::debug!("daemon.scheduler.dispose");
	}

	fn automatic_updates_enabled(&self) -> bool {
		!self.shared.is_disposed() && self.shared.is_update_by_timer_enabled() && self.shared.config.daemon_config().updates_enabled
	}

	pub fn state(&self) -> SchedulerState {
		if self.shared.is_running() {
			return SchedulerState::Running {
				epoch: self.shared.current_token().epoch(),
			};
		}
		match self.next_deadline() {
			Some(deadline) => SchedulerState::Scheduled { deadline },
			None => SchedulerState::Idle,
		}
	}

	/// When the next automatic run is due, if one is armed and allowed.
	pub fn next_deadline(&self) -> Option<Instant> {
		self.shared.deadline().filter(|_| self.automatic_updates_enabled())
	}

	pub fn is_running(&self) -> bool {
		self.shared.is_running()
	}

	pub fn is_running_or_pending(&self) -> bool {
		self.is_running() || self.next_deadline().is_some() || !self.executor.is_idle()
	}

	/// True if nothing runs and every pass of `doc` is clean.
	pub fn is_all_analysis_finished(&self, doc: DocumentId) -> bool {
		!self.shared.is_disposed() && !self.is_running() && self.tracker.is_all_clean(doc)
	}

	pub fn is_pass_finished(&self, doc: DocumentId, pass: PassId) -> bool {
		self.tracker.scope(doc, pass) == Some(DirtyScope::Clean)
	}

	pub fn submitted_passes(&self, doc: DocumentId) -> Vec<SubmittedPass> {
		self.executor.submitted_passes(doc)
	}

	pub fn current_token(&self) -> ProgressToken {
		self.shared.current_token()
	}

	pub fn tracker(&self) -> &DirtyScopeTracker {
		&self.tracker
	}
}

impl Drop for Scheduler {
	fn drop(&mut self) {
		self.shared.dispose();
	}
}

#[cfg(test)]
mod invariants;
