//! Incremental, cancellable multi-pass background analysis.
//!
//! Edits mark per-pass dirty scopes on documents. After a debounce delay the
//! [`Scheduler`] starts a run under a fresh [`ProgressToken`]: it instantiates
//! the registered passes into a [`PassGraph`] ordered by dependencies and
//! priority, runs their read-only `collect` phase on a bounded worker pool,
//! and applies the results on the interactive thread in graph order. Any new
//! edit cancels the run and schedules the next one.
//!
//! # Threading
//!
//! The thread that builds the [`Scheduler`] is the interactive thread. Every
//! `Scheduler` method must be called on it; other threads use a
//! [`SchedulerHandle`].
//!
//! # Configuration
//!
//! ```toml
//! autoreparse_delay_ms = 300
//! updates_enabled = true
//! max_workers = 2
//! analysis_profile = "default"
//! ```
//!
//! Parsed with [`DaemonConfig::from_toml_str`]; hosts that change settings at
//! runtime share a [`SharedConfig`] and call [`Scheduler::settings_changed`].

mod config;
mod dirty;
mod error;
mod events;
mod executor;
mod graph;
mod hints;
mod host;
mod pass;
mod progress;
mod range;
mod registry;
mod scheduler;
#[cfg(test)]
mod testing;
mod types;

pub use config::{ConfigError, ConfigSource, DEFAULT_AUTOREPARSE_DELAY_MS, DEFAULT_MAX_WORKERS, DaemonConfig, SharedConfig};
pub use dirty::{Coverage, DirtyScope, DirtyScopeTracker, Invalidation};
pub use error::{Canceled, DaemonError, PassError};
pub use events::{ChannelListener, DaemonEvent, DaemonListener, channel};
pub use executor::{CANCEL_WAIT, CommitFn, DrainReport, Executor, FinishedRun, PASS_CANCELED, RunEnd, RunResult, SubmittedPass};
pub use graph::{BuildOptions, BuildTarget, DocumentPasses, PassGraph, PassInstance};
pub use hints::HintsState;
pub use host::{EditorSource, HeavyActivityProbe, NoHeavyActivity};
pub use pass::{
	Artifact, FnPassFactory, HighlightingPass, PassBatch, PassBinding, PassContext, PassDescriptor, PassFactory, PassState, PassTarget,
	Severity,
};
pub use progress::ProgressToken;
pub use range::{TextEdit, TextRange};
pub use registry::{FactoryRegistry, PassRegistry};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerHandle, SchedulerState, TickOutcome, UpdateSuspension};
pub use types::{DocumentEdit, DocumentHandle, DocumentId, EditorHandle, EditorId, FileKind, PassId};
