//! State shared between the interactive thread and any-thread handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::Instant;

use parking_lot::Mutex;
use xeno_worker::GenerationClock;

use crate::config::ConfigSource;
use crate::dirty::DirtyScopeTracker;
use crate::error::{DaemonError, illegal_usage};
use crate::executor::Executor;
use crate::graph::{BuildOptions, BuildTarget, PassGraph};
use crate::pass::Artifact;
use crate::progress::ProgressToken;
use crate::registry::FactoryRegistry;
use crate::types::{DocumentHandle, EditorId};

/// The token, the debounce deadline and the timer switch change together.
#[derive(Debug)]
struct Guarded {
	token: ProgressToken,
	deadline: Option<Instant>,
	update_by_timer: bool,
	suspensions: usize,
	disposed: bool,
}

pub(crate) struct Shared {
	guarded: Mutex<Guarded>,
	cancel_events: AtomicU64,
	/// Cancel reasons waiting to be delivered on the interactive thread.
	notices: Mutex<Vec<String>>,
	restart_requested: AtomicBool,
	pub(crate) clock: GenerationClock,
	pub(crate) config: Arc<dyn ConfigSource>,
	pub(crate) registry: Arc<dyn FactoryRegistry>,
	pub(crate) interactive: ThreadId,
}

impl Shared {
	pub(crate) fn new(config: Arc<dyn ConfigSource>, registry: Arc<dyn FactoryRegistry>, interactive: ThreadId) -> Self {
		Self {
			guarded: Mutex::new(Guarded {
				token: ProgressToken::dead(),
				deadline: None,
				update_by_timer: true,
				suspensions: 0,
				disposed: false,
			}),
			cancel_events: AtomicU64::new(0),
			notices: Mutex::new(Vec::new()),
			restart_requested: AtomicBool::new(false),
			clock: GenerationClock::new(),
			config,
			registry,
			interactive,
		}
	}

	/// Cancels the live token (if any) and, with `restart`, pushes the
	/// deadline out by one debounce delay from now.
	///
	/// Returns true if a live token was canceled.
	pub(crate) fn stop_process(&self, restart: bool, reason: &str) -> bool {
		let delay = self.config.daemon_config().debounce_delay();
		let mut g = self.guarded.lock();
		if g.disposed {
			return false;
		}
		let canceled = self.cancel_locked(&g, reason);
		if restart {
			g.deadline = Some(later(g.deadline, Instant::now() + delay));
		}
		tracing::debug!(reason, restart, canceled, deadline = ?g.deadline, "daemon.stop_process");
		canceled
	}

	/// Every call counts as a cancel event, even when nothing was running.
	fn cancel_locked(&self, g: &Guarded, reason: &str) -> bool {
		let canceled = self.cancel_token(g, reason);
		self.cancel_events.fetch_add(1, Ordering::AcqRel);
		canceled
	}

	fn cancel_token(&self, g: &Guarded, reason: &str) -> bool {
		let canceled = g.token.cancel_with_reason(reason);
		if canceled {
			tracing::debug!(epoch = g.token.epoch(), reason, "daemon.cancel");
			self.notices.lock().push(reason.to_string());
		}
		canceled
	}

	/// Cancels the previous token and installs the one built by `make`.
	///
	/// Cancellation happens before `make` runs and does not count as a cancel
	/// event. Returns the previous token.
	pub(crate) fn install_token(&self, reason: &str, make: impl FnOnce() -> ProgressToken) -> ProgressToken {
		let mut g = self.guarded.lock();
		self.cancel_token(&g, reason);
		let next = make();
		std::mem::replace(&mut g.token, next)
	}

	pub(crate) fn current_token(&self) -> ProgressToken {
		self.guarded.lock().token.clone()
	}

	pub(crate) fn is_running(&self) -> bool {
		let g = self.guarded.lock();
		g.token.is_running() && !g.token.is_canceled()
	}

	pub(crate) fn deadline(&self) -> Option<Instant> {
		self.guarded.lock().deadline
	}

	/// Clears and reports the deadline if it is due at `now`.
	pub(crate) fn take_due(&self, now: Instant) -> bool {
		let mut g = self.guarded.lock();
		match g.deadline {
			Some(deadline) if deadline <= now && !g.disposed => {
				g.deadline = None;
				true
			}
			_ => false,
		}
	}

	pub(crate) fn clear_deadline(&self) {
		self.guarded.lock().deadline = None;
	}

	pub(crate) fn arm(&self, reason: &str) {
		let delay = self.config.daemon_config().debounce_delay();
		let mut g = self.guarded.lock();
		if g.disposed {
			return;
		}
		g.deadline = Some(later(g.deadline, Instant::now() + delay));
		tracing::trace!(reason, deadline = ?g.deadline, "daemon.arm");
	}

	pub(crate) fn is_update_by_timer_enabled(&self) -> bool {
		self.guarded.lock().update_by_timer
	}

	/// Flips the timer switch. Enabling re-arms; disabling never cancels a run.
	pub(crate) fn set_update_by_timer_enabled(&self, enabled: bool) {
		let mut g = self.guarded.lock();
		g.update_by_timer = enabled;
		drop(g);
		tracing::debug!(enabled, "daemon.update_by_timer");
		if enabled {
			self.arm("update by timer enabled");
		}
	}

	fn suspend(&self) {
		let mut g = self.guarded.lock();
		g.suspensions += 1;
		g.update_by_timer = false;
		tracing::debug!(suspensions = g.suspensions, "daemon.suspend");
	}

	fn resume(&self) {
		let mut g = self.guarded.lock();
		g.suspensions = g.suspensions.saturating_sub(1);
		let last = g.suspensions == 0;
		drop(g);
		if last {
			self.set_update_by_timer_enabled(true);
		}
	}

	pub(crate) fn cancel_events(&self) -> u64 {
		self.cancel_events.load(Ordering::Acquire)
	}

	pub(crate) fn take_notices(&self) -> Vec<String> {
		std::mem::take(&mut *self.notices.lock())
	}

	/// The flag is raised only after the live token is canceled, so a drain
	/// that observes it can no longer apply results of the old run.
	pub(crate) fn request_restart(&self, reason: &str) {
		self.stop_process(true, reason);
		self.restart_requested.store(true, Ordering::Release);
	}

	pub(crate) fn take_restart_request(&self) -> bool {
		self.restart_requested.swap(false, Ordering::AcqRel)
	}

	pub(crate) fn is_disposed(&self) -> bool {
		self.guarded.lock().disposed
	}

	pub(crate) fn dispose(&self) {
		let mut g = self.guarded.lock();
		if g.disposed {
			return;
		}
		self.cancel_locked(&g, "dispose");
		g.deadline = None;
		g.disposed = true;
	}

	pub(crate) fn is_interactive_thread(&self) -> bool {
		std::thread::current().id() == self.interactive
	}
}

fn later(current: Option<Instant>, candidate: Instant) -> Instant {
	current.map_or(candidate, |d| d.max(candidate))
}

/// Thread-safe handle to a scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
	pub(crate) shared: Arc<Shared>,
}

impl SchedulerHandle {
	/// Cancels the current run and, with `restart`, schedules the next one
	/// one debounce delay from now. Returns true if a run was canceled.
	pub fn stop_process(&self, restart: bool, reason: &str) -> bool {
		self.shared.stop_process(restart, reason)
	}

	pub fn is_running(&self) -> bool {
		self.shared.is_running()
	}

	pub fn current_token(&self) -> ProgressToken {
		self.shared.current_token()
	}

	pub fn is_update_by_timer_enabled(&self) -> bool {
		self.shared.is_update_by_timer_enabled()
	}

	pub fn set_update_by_timer_enabled(&self, enabled: bool) {
		self.shared.set_update_by_timer_enabled(enabled);
	}

	/// Suspends automatic runs until the returned guard (and every other
	/// outstanding guard) is dropped.
	pub fn disable_update_by_timer(&self) -> UpdateSuspension {
		self.shared.suspend();
		UpdateSuspension {
			shared: Arc::clone(&self.shared),
		}
	}

	/// Marks every tracked document dirty on the next interactive-thread call
	/// and schedules a run.
	pub fn request_restart(&self, reason: &str) {
		self.shared.request_restart(reason);
	}

	/// Runs the collect phase of every pass for `document` on the calling
	/// thread, general pass first, without applying results.
	///
	/// Background runs are stopped for the duration and everything is
	/// re-analyzed afterwards.
	///
	/// # Panics
	///
	/// Panics when called on the interactive thread.
	pub fn run_main_passes(&self, document: &DocumentHandle, editor: EditorId, token: &ProgressToken) -> Result<Vec<Artifact>, DaemonError> {
		if self.shared.is_interactive_thread() {
			illegal_usage("run_main_passes must not be called on the interactive thread");
		}
		self.shared.stop_process(false, "running main passes");

		let mut tracker = DirtyScopeTracker::new();
		tracker.register_document(document.id, document.len, document.stamp, self.shared.registry.pass_ids_for(&document.kind));
		let target = BuildTarget {
			document: document.clone(),
			editors: vec![editor],
		};
		let mut graph = PassGraph::build(self.shared.registry.as_ref(), &tracker, &[target], &[], BuildOptions::default());
		let outcome = match graph.take_failures().into_iter().next() {
			Some(failure) => Err(failure),
			None => Executor::run_main_passes(graph, token),
		};

		self.shared.request_restart("main passes finished");
		outcome
	}
}

/// Keeps automatic runs suspended while alive.
///
/// Guards nest; the last one dropped re-enables the timer and schedules a run.
#[must_use = "dropping the guard immediately re-enables automatic runs"]
pub struct UpdateSuspension {
	shared: Arc<Shared>,
}

impl Drop for UpdateSuspension {
	fn drop(&mut self) {
		self.shared.resume();
	}
}
