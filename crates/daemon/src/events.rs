//! Daemon lifecycle notifications.
//!
//! Listeners are always invoked on the interactive thread. Cancellations
//! requested from other threads are queued and delivered on the next
//! interactive-thread call into the scheduler.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::DaemonError;
use crate::types::EditorId;

pub trait DaemonListener: Send + Sync {
	/// A run started for `editors`.
	fn daemon_starting(&self, _editors: &[EditorId]) {}

	/// The current run was canceled (or a cancel was requested while idle).
	fn daemon_cancel_event_occurred(&self, _reason: &str) {}

	/// A run ended, whether it completed or was canceled. Always paired with
	/// one earlier [`Self::daemon_starting`].
	fn daemon_finished(&self, _editors: &[EditorId]) {}

	/// A pass failed to instantiate or execute, or a synchronous run timed out.
	fn daemon_error(&self, _error: &DaemonError) {}
}

/// Owned form of a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
	Starting(Vec<EditorId>),
	CancelEventOccurred(String),
	Finished(Vec<EditorId>),
	Error(DaemonError),
}

/// Listener that forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
	tx: mpsc::UnboundedSender<DaemonEvent>,
}

impl ChannelListener {
	fn send(&self, event: DaemonEvent) {
		// A dropped receiver only means nobody is watching anymore.
		let _ = self.tx.send(event);
	}
}

impl DaemonListener for ChannelListener {
	fn daemon_starting(&self, editors: &[EditorId]) {
		self.send(DaemonEvent::Starting(editors.to_vec()));
	}

	fn daemon_cancel_event_occurred(&self, reason: &str) {
		self.send(DaemonEvent::CancelEventOccurred(reason.to_string()));
	}

	fn daemon_finished(&self, editors: &[EditorId]) {
		self.send(DaemonEvent::Finished(editors.to_vec()));
	}

	fn daemon_error(&self, error: &DaemonError) {
		self.send(DaemonEvent::Error(error.clone()));
	}
}

/// Creates a channel-backed listener and the receiving end of its events.
pub fn channel() -> (ChannelListener, mpsc::UnboundedReceiver<DaemonEvent>) {
	let (tx, rx) = mpsc::unbounded_channel();
	(ChannelListener { tx }, rx)
}

/// Fan-out over registered listeners.
#[derive(Default, Clone)]
pub(crate) struct Listeners {
	inner: Vec<Arc<dyn DaemonListener>>,
}

impl Listeners {
	pub(crate) fn push(&mut self, listener: Arc<dyn DaemonListener>) {
		self.inner.push(listener);
	}

	pub(crate) fn starting(&self, editors: &[EditorId]) {
		tracing::debug!(editors = editors.len(), "daemon.event.starting");
		self.inner.iter().for_each(|l| l.daemon_starting(editors));
	}

	pub(crate) fn cancel_event(&self, reason: &str) {
		self.inner.iter().for_each(|l| l.daemon_cancel_event_occurred(reason));
	}

	pub(crate) fn finished(&self, editors: &[EditorId]) {
		tracing::debug!(editors = editors.len(), "daemon.event.finished");
		self.inner.iter().for_each(|l| l.daemon_finished(editors));
	}

	pub(crate) fn error(&self, error: &DaemonError) {
		self.inner.iter().for_each(|l| l.daemon_error(error));
	}
}
