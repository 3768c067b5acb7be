//! Invariant catalog for [`crate::scheduler::Scheduler`].
#![allow(dead_code)]

/// Must keep at most one live (started and not canceled) token.
///
/// - Enforced in: `Shared::install_token`, `Scheduler::retire_token`
/// - Tested by: [`crate::scheduler::invariants::test_new_run_cancels_previous_token`]
/// - Failure symptom: Two runs apply results for the same document and markers flicker between them.
pub(crate) const AT_MOST_ONE_LIVE_TOKEN: () = ();

/// Must cancel the previous token before the next one is created.
///
/// - Enforced in: `Shared::install_token`
/// - Tested by: [`crate::scheduler::invariants::test_new_run_cancels_previous_token`]
/// - Failure symptom: A pass observes a fresh epoch while the old run is still committing.
pub(crate) const CANCEL_HAPPENS_BEFORE_NEXT_TOKEN: () = ();

/// Must never start a run before the debounce deadline, and must push the
/// deadline to the later of the armed and the new one on every dirtying event.
///
/// - Enforced in: `Shared::stop_process`, `Shared::take_due`
/// - Tested by: [`crate::scheduler::invariants::test_debounce_coalesces_edit_burst`]
/// - Failure symptom: Every keystroke starts and cancels a run.
pub(crate) const DEBOUNCE_NEVER_FIRES_EARLY: () = ();

/// Must not clear dirt with results computed against an older document stamp.
///
/// - Enforced in: [`crate::dirty::DirtyScopeTracker::mark_up_to_date`]
/// - Tested by: [`crate::scheduler::invariants::test_edit_during_collect_keeps_union_dirty`]
/// - Failure symptom: Text edited while a pass ran is reported clean and never re-analyzed.
pub(crate) const STALE_COMPLETION_NEVER_CLEARS: () = ();

/// Must pair every `daemon_starting` with exactly one `daemon_finished`.
///
/// - Enforced in: `Scheduler::retire_token`
/// - Tested by: [`crate::scheduler::invariants::test_starting_and_finished_are_paired`]
/// - Failure symptom: Status indicators stay busy forever, or listeners see a finish for a run they never saw start.
pub(crate) const STARTING_FINISHED_PAIRED: () = ();

/// Must not cancel an in-flight run when automatic updates are switched off.
///
/// - Enforced in: `Shared::set_update_by_timer_enabled`
/// - Tested by: [`crate::scheduler::invariants::test_disabling_timer_keeps_inflight_run`]
/// - Failure symptom: Results of an almost finished run are thrown away when a modal operation starts.
pub(crate) const DISABLED_TIMER_KEEPS_INFLIGHT_RUN: () = ();

/// Must re-enable automatic updates only when the last suspension guard drops.
///
/// - Enforced in: `Shared::suspend`, `Shared::resume`
/// - Tested by: [`crate::scheduler::invariants::test_suspensions_nest`]
/// - Failure symptom: An inner guard re-enables runs while an outer operation still needs them off.
pub(crate) const SUSPENSIONS_NEST: () = ();

/// Must re-arm once heavy mode ends if passes were dropped for it.
///
/// - Enforced in: [`crate::scheduler::Scheduler::tick`]
/// - Tested by: [`crate::scheduler::invariants::test_heavy_mode_drop_rearms_afterwards`]
/// - Failure symptom: Non-dumb-aware results stay missing until the next edit.
pub(crate) const HEAVY_MODE_FALLBACK_REARMS: () = ();

/// Must reject document dirt while a synchronous run forbids it.
///
/// - Enforced in: [`crate::dirty::DirtyScopeTracker::mark_dirty`], [`crate::dirty::DirtyScopeTracker::mark_all_dirty`]
/// - Tested by: [`crate::scheduler::invariants::test_restart_during_strict_run_is_illegal`]
/// - Failure symptom: A validation run reports results for text that no longer exists.
pub(crate) const NO_DIRT_DURING_STRICT_RUN: () = ();

/// Must cancel the live token before a cross-thread restart request becomes
/// visible to the interactive thread.
///
/// - Enforced in: `Shared::request_restart`
/// - Tested by: [`crate::scheduler::invariants::test_restart_flag_is_raised_after_cancel`]
/// - Failure symptom: A drain marks everything dirty, then applies the old run's results and clears the new dirt again.
pub(crate) const RESTART_FLAG_AFTER_CANCEL: () = ();

/// Must only be driven from the thread that built the scheduler.
///
/// - Enforced in: `Scheduler::assert_interactive`, [`crate::scheduler::SchedulerHandle::run_main_passes`]
/// - Tested by: [`crate::scheduler::invariants::test_interactive_calls_from_other_thread_panic`]
/// - Failure symptom: `apply` races with the host's own document mutations.
pub(crate) const INTERACTIVE_THREAD_ONLY: () = ();
