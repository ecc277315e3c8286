//! One-shot completion signals.
//!
//! A [`Signal`] is owned by whoever decides when something is done
//! (hydration, a phase, a portal). Any number of [`Completion`] futures and
//! callbacks can wait on it; waiters registered after completion resolve
//! immediately.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;

use super::HydrationError;

type Outcome = Result<(), HydrationError>;

/// Callback queued on a [`Signal`].
pub type SignalCallback = Box<dyn FnOnce()>;

/// Future resolving when its [`Signal`] completes.
///
/// Resolves to [`HydrationError::Cancelled`] if the signal is dropped
/// without completing.
#[must_use = "futures do nothing unless polled"]
pub struct Completion {
	state: CompletionState,
}

enum CompletionState {
	Ready(Option<Outcome>),
	Waiting(oneshot::Receiver<Outcome>),
}

impl Completion {
	/// An already resolved completion.
	pub fn ready(outcome: Outcome) -> Self {
		Self {
			state: CompletionState::Ready(Some(outcome)),
		}
	}

	/// A completion that fails with `error`.
	pub fn failed(error: HydrationError) -> Self {
		Self::ready(Err(error))
	}

	/// Whether the outcome is available without waiting.
	pub fn is_ready(&self) -> bool {
		matches!(self.state, CompletionState::Ready(Some(_)))
	}
}

impl Future for Completion {
	type Output = Outcome;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match &mut self.state {
			CompletionState::Ready(outcome) => {
				Poll::Ready(outcome.take().unwrap_or(Err(HydrationError::Cancelled)))
			}
			CompletionState::Waiting(rx) => match rx.poll_unpin(cx) {
				Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
				Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(HydrationError::Cancelled)),
				Poll::Pending => Poll::Pending,
			},
		}
	}
}

impl fmt::Debug for Completion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Completion")
			.field("ready", &self.is_ready())
			.finish()
	}
}

/// Completion point satisfied exactly once.
#[derive(Default)]
pub struct Signal {
	outcome: Option<Outcome>,
	waiters: Vec<oneshot::Sender<Outcome>>,
	callbacks: Vec<SignalCallback>,
}

impl Signal {
	/// Creates a pending signal.
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether the signal has completed.
	pub fn is_complete(&self) -> bool {
		self.outcome.is_some()
	}

	/// Future for the outcome.
	pub fn wait(&mut self) -> Completion {
		if let Some(outcome) = &self.outcome {
			return Completion::ready(outcome.clone());
		}
		let (tx, rx) = oneshot::channel();
		self.waiters.push(tx);
		Completion {
			state: CompletionState::Waiting(rx),
		}
	}

	/// Queues `callback` for completion.
	///
	/// Returns the callback back when the signal already completed; the
	/// caller runs it once its own borrows are released.
	pub fn on_complete(&mut self, callback: SignalCallback) -> Option<SignalCallback> {
		if self.is_complete() {
			return Some(callback);
		}
		self.callbacks.push(callback);
		None
	}

	/// Completes the signal. Only the first call has an effect.
	///
	/// Waiting futures resolve right away; the queued callbacks are
	/// returned for the caller to run.
	pub fn complete(&mut self, outcome: Outcome) -> Vec<SignalCallback> {
		if self.is_complete() {
			return Vec::new();
		}
		for tx in self.waiters.drain(..) {
			let _ = tx.send(outcome.clone());
		}
		let callbacks = if outcome.is_ok() {
			std::mem::take(&mut self.callbacks)
		} else {
			self.callbacks.clear();
			Vec::new()
		};
		self.outcome = Some(outcome);
		callbacks
	}
}

impl fmt::Debug for Signal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Signal")
			.field("outcome", &self.outcome)
			.field("waiters", &self.waiters.len())
			.field("callbacks", &self.callbacks.len())
			.finish()
	}
}
