use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use super::*;
use crate::config::SharedConfig;
use crate::events::{DaemonEvent, channel};
use crate::pass::PassDescriptor;
use crate::range::{TextEdit, TextRange};
use crate::registry::PassRegistry;
use crate::testing::{Behavior, FakeEditors, Gate, GateGuard, HeavySwitch, Journal, init_tracing, rust_doc, scripted};

mod catalog;

pub(crate) const E1: EditorId = EditorId(1);
pub(crate) const D1: DocumentId = DocumentId(1);

/// Far enough ahead that any armed deadline is due.
pub(crate) fn later() -> Instant {
	Instant::now() + Duration::from_secs(3600)
}

/// A scheduler wired to fake collaborators and a channel listener.
pub(crate) struct Harness {
	pub(crate) scheduler: Scheduler,
	pub(crate) registry: Arc<PassRegistry>,
	pub(crate) editors: Arc<FakeEditors>,
	pub(crate) config: SharedConfig,
	pub(crate) heavy: Arc<HeavySwitch>,
	pub(crate) journal: Journal,
	pub(crate) events: mpsc::UnboundedReceiver<DaemonEvent>,
	pub(crate) committed: Arc<Mutex<Vec<(PassId, DocumentId)>>>,
}

impl Harness {
	pub(crate) fn new(delay_ms: u64) -> Self {
		init_tracing();
		let registry = Arc::new(PassRegistry::new());
		let editors = Arc::new(FakeEditors::default());
		let config = SharedConfig::new(DaemonConfig {
			autoreparse_delay_ms: delay_ms,
			..DaemonConfig::default()
		});
		let heavy = Arc::new(HeavySwitch::default());
		let (listener, events) = channel();
		let committed: Arc<Mutex<Vec<(PassId, DocumentId)>>> = Arc::default();
		let sink = Arc::clone(&committed);
		let scheduler = Scheduler::builder(registry.clone(), editors.clone())
			.config(Arc::new(config.clone()))
			.heavy_activity(heavy.clone())
			.listener(Arc::new(listener))
			.on_commit(move |batch| sink.lock().push((batch.pass, batch.document)))
			.build();
		Self {
			scheduler,
			registry,
			editors,
			config,
			heavy,
			journal: Journal::default(),
			events,
			committed,
		}
	}

	pub(crate) fn add(&self, descriptor: PassDescriptor, gate: Option<&Arc<Gate>>, behavior: Behavior) {
		self.registry.register("rust", scripted(descriptor, &self.journal, gate, behavior));
	}

	pub(crate) fn open(&mut self, editor: EditorHandle, doc: DocumentHandle) {
		self.editors.show(editor, doc.clone());
		self.scheduler.document_opened(&doc);
	}

	pub(crate) fn edit(&mut self, doc: DocumentId, edit: TextEdit, stamp: u64) {
		self.scheduler.document_changed(DocumentEdit {
			document: doc,
			edit: Some(edit),
			stamp,
		});
	}

	/// Ticks until nothing is running or scheduled and returns every run end seen.
	pub(crate) fn settle(&mut self) -> Vec<RunEnd> {
		let deadline = Instant::now() + Duration::from_secs(5);
		let mut ends = Vec::new();
		loop {
			ends.extend(self.scheduler.tick(later()).finished);
			if !self.scheduler.is_running_or_pending() {
				return ends;
			}
			assert!(Instant::now() < deadline, "scheduler did not settle");
			std::thread::sleep(Duration::from_millis(1));
		}
	}

	/// Blocks until the journal holds `count` entries starting with `prefix`.
	pub(crate) fn wait_journal(&self, prefix: &str, count: usize) {
		let deadline = Instant::now() + Duration::from_secs(5);
		while self.journal.count(prefix) < count {
			assert!(Instant::now() < deadline, "journal never reached {count} x {prefix}");
			std::thread::sleep(Duration::from_millis(1));
		}
	}

	pub(crate) fn drain_events(&mut self) -> Vec<DaemonEvent> {
		let mut events = Vec::new();
		while let Ok(event) = self.events.try_recv() {
			events.push(event);
		}
		events
	}
}

#[cfg_attr(test, test)]
pub(crate) fn test_new_run_cancels_previous_token() {
	let mut h = Harness::new(0);
	h.add(PassDescriptor::new(PassId(1), "slow"), None, Behavior::UntilCanceled);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));

	let first_epoch = h.scheduler.tick(later()).started.expect("first run");
	let first = h.scheduler.current_token();
	assert!(first.is_running() && !first.is_canceled());
	h.wait_journal("collect:slow", 1);

	h.scheduler.editors_changed("focus moved");
	assert!(first.is_canceled(), "dirtying event cancels the live run");
	assert!(!h.scheduler.is_running());

	let second_epoch = h.scheduler.tick(later()).started.expect("second run");
	let second = h.scheduler.current_token();
	assert!(second_epoch > first_epoch);
	assert!(!first.is_running());
	assert!(!second.is_canceled());
	assert_eq!(h.scheduler.state(), SchedulerState::Running { epoch: second_epoch });

	h.scheduler.dispose();
	assert!(second.is_canceled());
	assert_eq!(h.scheduler.state(), SchedulerState::Idle);
}

#[cfg_attr(test, test)]
pub(crate) fn test_debounce_coalesces_edit_burst() {
	let mut h = Harness::new(200);
	h.add(PassDescriptor::new(PassId(1), "syntax"), None, Behavior::Succeed);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));
	let opened = h.scheduler.next_deadline().expect("armed on open");

	for stamp in 2..6 {
		h.edit(D1, TextEdit::insert(stamp as u32, 1), stamp);
	}
	let deadline = h.scheduler.next_deadline().expect("armed after edits");
	assert!(deadline >= opened, "re-arming never moves the deadline earlier");
	assert_eq!(h.scheduler.state(), SchedulerState::Scheduled { deadline });

	assert!(h.scheduler.tick(deadline - Duration::from_millis(1)).started.is_none(), "must not fire early");
	assert!(h.scheduler.tick(deadline).started.is_some());
	h.settle();

	assert_eq!(h.journal.count("collect:syntax"), 1, "the burst coalesces into one run");
	assert!(h.scheduler.is_all_analysis_finished(D1));
}

#[cfg_attr(test, test)]
pub(crate) fn test_edit_during_collect_keeps_union_dirty() {
	let mut h = Harness::new(0);
	let gate = Gate::closed();
	let _guard = GateGuard(Arc::clone(&gate));
	h.add(PassDescriptor::new(PassId(1), "syntax"), Some(&gate), Behavior::Succeed);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));
	gate.open();
	h.settle();
	assert!(h.scheduler.is_pass_finished(D1, PassId(1)));

	gate.close();
	h.edit(D1, TextEdit::insert(10, 5), 2);
	h.scheduler.tick(later()).started.expect("run for the first edit");
	h.wait_journal("collect:syntax", 2);

	h.edit(D1, TextEdit::insert(50, 3), 3);
	assert_eq!(h.scheduler.tracker().scope(D1, PassId(1)), Some(DirtyScope::Range(TextRange::new(10, 53))));

	gate.open();
	let ends = h.settle();
	assert!(ends.first().is_some_and(RunEnd::is_canceled), "the interrupted run ends canceled: {ends:?}");
	assert!(matches!(ends.last(), Some(RunEnd::Completed { failure: None, .. })));
	assert_eq!(h.committed.lock().len(), 2, "the interrupted run never applied");
	assert!(h.scheduler.is_pass_finished(D1, PassId(1)));
	assert_eq!(h.scheduler.tracker().stamp(D1), Some(3));
}

#[cfg_attr(test, test)]
pub(crate) fn test_starting_and_finished_are_paired() {
	let mut h = Harness::new(0);
	h.add(PassDescriptor::new(PassId(1), "slow"), None, Behavior::UntilCanceled);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));

	for _ in 0..3 {
		h.scheduler.tick(later()).started.expect("run starts");
		h.scheduler.editors_changed("focus moved");
	}
	h.scheduler.dispose();

	let events = h.drain_events();
	let mut open = 0;
	for event in &events {
		match event {
			DaemonEvent::Starting(editors) => {
				assert_eq!(open, 0, "a run started before the previous one finished");
				assert_eq!(editors, &vec![E1]);
				open += 1;
			}
			DaemonEvent::Finished(editors) => {
				assert_eq!(open, 1, "finished without a matching start");
				assert_eq!(editors, &vec![E1]);
				open -= 1;
			}
			DaemonEvent::CancelEventOccurred(_) | DaemonEvent::Error(_) => {}
		}
	}
	assert_eq!(open, 0);
	let starts = events.iter().filter(|e| matches!(e, DaemonEvent::Starting(_))).count();
	let cancels = events.iter().filter(|e| matches!(e, DaemonEvent::CancelEventOccurred(_))).count();
	assert_eq!(starts, 3);
	assert_eq!(cancels, 3, "only canceling a live run is reported");
}

#[cfg_attr(test, test)]
pub(crate) fn test_disabling_timer_keeps_inflight_run() {
	let mut h = Harness::new(0);
	let gate = Gate::closed();
	let _guard = GateGuard(Arc::clone(&gate));
	h.add(PassDescriptor::new(PassId(1), "syntax"), Some(&gate), Behavior::Succeed);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));
	h.scheduler.tick(later()).started.expect("run");

	h.scheduler.set_update_by_timer_enabled(false);
	assert!(!h.scheduler.current_token().is_canceled());
	assert!(h.scheduler.is_running());

	gate.open();
	let ends = h.settle();
	assert!(matches!(ends.as_slice(), [RunEnd::Completed { failure: None, .. }]));
	assert!(h.scheduler.is_all_analysis_finished(D1));

	h.edit(D1, TextEdit::insert(0, 1), 2);
	assert_eq!(h.scheduler.state(), SchedulerState::Idle);
	assert!(h.scheduler.tick(later()).started.is_none());

	h.scheduler.set_update_by_timer_enabled(true);
	assert!(h.scheduler.tick(later()).started.is_some());
	h.settle();
	assert!(h.scheduler.is_all_analysis_finished(D1));
}

#[cfg_attr(test, test)]
pub(crate) fn test_suspensions_nest() {
	let mut h = Harness::new(0);
	h.add(PassDescriptor::new(PassId(1), "syntax"), None, Behavior::Succeed);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));

	let outer = h.scheduler.handle().disable_update_by_timer();
	let inner = h.scheduler.disable_update_by_timer();
	drop(inner);
	assert!(!h.scheduler.is_update_by_timer_enabled());
	assert!(h.scheduler.tick(later()).started.is_none());

	std::thread::spawn(move || drop(outer)).join().unwrap();
	assert!(h.scheduler.is_update_by_timer_enabled());
	assert!(h.scheduler.next_deadline().is_some(), "the last guard re-arms");
	assert!(h.scheduler.tick(later()).started.is_some());
}

#[cfg_attr(test, test)]
pub(crate) fn test_heavy_mode_drop_rearms_afterwards() {
	let mut h = Harness::new(0);
	h.add(PassDescriptor::new(PassId(1), "syntax").dumb_aware(), None, Behavior::Succeed);
	h.add(PassDescriptor::new(PassId(2), "inspections"), None, Behavior::Succeed);
	h.heavy.set(true);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));

	h.settle();
	assert_eq!(h.journal.with_prefix("collect:"), vec!["collect:syntax:1"]);
	assert!(h.scheduler.is_pass_finished(D1, PassId(1)));
	assert!(!h.scheduler.is_all_analysis_finished(D1));

	h.heavy.set(false);
	h.settle();
	assert_eq!(h.journal.count("collect:inspections"), 1);
	assert_eq!(h.journal.count("collect:syntax"), 1, "clean passes are not re-run");
	assert!(h.scheduler.is_all_analysis_finished(D1));
}

#[cfg_attr(test, test)]
#[should_panic(expected = "modified while dirt is forbidden")]
pub(crate) fn test_restart_during_strict_run_is_illegal() {
	let mut h = Harness::new(0);
	h.add(PassDescriptor::new(PassId(1), "syntax"), None, Behavior::Succeed);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));

	let handle = h.scheduler.handle();
	std::thread::spawn(move || handle.request_restart("external change")).join().unwrap();
	let _ = h.scheduler.run_passes(&[EditorHandle::focused(E1)], &[], false, Duration::from_secs(5));
}

#[cfg_attr(test, test)]
pub(crate) fn test_restart_flag_is_raised_after_cancel() {
	let mut h = Harness::new(0);
	let gate = Gate::closed();
	let _guard = GateGuard(Arc::clone(&gate));
	h.add(PassDescriptor::new(PassId(1), "syntax"), Some(&gate), Behavior::Succeed);
	h.open(EditorHandle::focused(E1), rust_doc(1, 100));
	h.scheduler.tick(later()).started.expect("run");
	let token = h.scheduler.current_token();

	let observer = h.scheduler.handle();
	let watcher = std::thread::spawn(move || {
		while !observer.shared.take_restart_request() {
			std::hint::spin_loop();
		}
		observer.shared.current_token().is_canceled()
	});
	let requester = h.scheduler.handle();
	std::thread::spawn(move || requester.request_restart("external change")).join().unwrap();

	assert!(watcher.join().unwrap(), "restart flag was visible while the run was still live");
	assert!(token.is_canceled());
	gate.open();
	let ends = h.settle();
	assert!(ends[0].is_canceled());
	assert_eq!(*h.committed.lock(), vec![(PassId(1), D1)], "only the restarted run applies");
	assert!(h.scheduler.is_all_analysis_finished(D1));
}

#[cfg_attr(test, test)]
pub(crate) fn test_interactive_calls_from_other_thread_panic() {
	let h = Harness::new(0);
	let handle = h.scheduler.handle();
	let doc = rust_doc(1, 10);
	let token = ProgressToken::new(1, Vec::new(), false);
	let on_interactive = std::panic::catch_unwind(AssertUnwindSafe(|| handle.run_main_passes(&doc, E1, &token)));
	assert!(on_interactive.is_err(), "run_main_passes must refuse the interactive thread");

	let Harness { mut scheduler, .. } = h;
	let off_thread = std::thread::spawn(move || scheduler.restart()).join();
	assert!(off_thread.is_err(), "scheduler calls must refuse other threads");
}
