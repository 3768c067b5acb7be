use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// Monotonic generation clock for run lifecycles.
///
/// Clones share the same counter, so every token minted from one clock (or
/// any of its clones) gets a distinct, increasing generation.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	next: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Creates a new generation clock starting at generation 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next generation ID.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Returns the most recently issued generation, or 0 if none was issued.
	pub fn current(&self) -> u64 {
		self.next.load(Ordering::Acquire)
	}
}

#[derive(Debug)]
struct TokenState {
	generation: u64,
	cancel: CancellationToken,
	running: AtomicBool,
	/// Guards condvar wakeups for blocking waiters; the flag mirrors `cancel`.
	parked: Mutex<bool>,
	wake: Condvar,
}

/// Generation-scoped cancellation token for one unit of supervised work.
///
/// Cancellation is one-way: once [`GenerationToken::cancel`] returns, the
/// token reports cancelled forever. The running flag is independent: a token
/// can be cancelled while still running, and only the caller that flips it
/// off in [`GenerationToken::stop_if_running`] observes `true`.
#[derive(Debug, Clone)]
pub struct GenerationToken {
	state: Arc<TokenState>,
}

impl GenerationToken {
	/// Creates a new, not yet started, token.
	pub fn new(generation: u64) -> Self {
		Self {
			state: Arc::new(TokenState {
				generation,
				cancel: CancellationToken::new(),
				running: AtomicBool::new(false),
				parked: Mutex::new(false),
				wake: Condvar::new(),
			}),
		}
	}

	/// Creates a token that is already cancelled and not running.
	pub fn cancelled_sentinel() -> Self {
		let token = Self::new(0);
		token.cancel();
		token
	}

	/// Returns generation ID.
	pub fn generation(&self) -> u64 {
		self.state.generation
	}

	/// Marks the token running.
	///
	/// Returns false if it was already running.
	pub fn start(&self) -> bool {
		!self.state.running.swap(true, Ordering::AcqRel)
	}

	/// Returns true between [`Self::start`] and the first successful [`Self::stop_if_running`].
	pub fn is_running(&self) -> bool {
		self.state.running.load(Ordering::Acquire)
	}

	/// Flips running → stopped.
	///
	/// Returns true only for the single caller that performed the transition.
	pub fn stop_if_running(&self) -> bool {
		self.state
			.running
			.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.state.cancel.is_cancelled()
	}

	/// Requests cancellation and wakes every waiter.
	///
	/// Returns true if this call performed the transition.
	pub fn cancel(&self) -> bool {
		let mut parked = self.state.parked.lock();
		if *parked {
			return false;
		}
		*parked = true;
		self.state.cancel.cancel();
		self.state.wake.notify_all();
		true
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.state.cancel.cancelled().await;
	}

	/// Blocks the calling thread until cancellation or timeout.
	///
	/// Returns true if the token is cancelled on return.
	pub fn wait_cancelled(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut parked = self.state.parked.lock();
		while !*parked {
			if self.state.wake.wait_until(&mut parked, deadline).timed_out() {
				break;
			}
		}
		*parked
	}

	/// Returns a child cancellation signal for `select!`-style waits.
	///
	/// The child is cancelled with this token but cancelling the child does not
	/// affect this token.
	pub fn child_signal(&self) -> CancellationToken {
		self.state.cancel.child_token()
	}

	/// Returns true if both handles refer to the same token.
	pub fn same_token(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.state, &other.state)
	}
}
