//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a clonable flag: any clone can fire it, every
//! clone observes it. Long-running work checks the flag at chunk
//! boundaries; async waiters can `await` the signal to race it against
//! I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
	cancelled: AtomicBool,
	notify: Notify,
}

/// A shared cancellation flag.
///
/// Cancellation is level-triggered and permanent: once fired, the token
/// stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<Inner>);

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fires the token and wakes every waiter.
	pub fn cancel(&self) {
		self.0.cancelled.store(true, Ordering::SeqCst);
		self.0.notify.notify_waiters();
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves once the token is cancelled; never resolves otherwise.
	pub async fn cancelled(&self) {
		loop {
			if self.is_cancelled() {
				return;
			}
			let notified = self.0.notify.notified();
			// Re-check: cancel() may have fired between the check above
			// and registration of the waiter.
			if self.is_cancelled() {
				return;
			}
			notified.await;
		}
	}

	/// Early-out helper for loops on the read path.
	pub fn check(&self) -> crate::Result<()> {
		if self.is_cancelled() {
			Err(crate::EngineError::Cancelled)
		} else {
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn starts_uncancelled() {
		let token = CancelToken::new();
		assert!(!token.is_cancelled());
		assert!(token.check().is_ok());
	}

	#[test]
	fn clones_share_state() {
		let token = CancelToken::new();
		let clone = token.clone();
		clone.cancel();
		assert!(token.is_cancelled());
		assert!(token.check().is_err());
	}

	#[tokio::test]
	async fn waiters_wake_on_cancel() {
		let token = CancelToken::new();
		let waiter = token.clone();

		let handle = tokio::spawn(async move {
			waiter.cancelled().await;
			true
		});

		tokio::time::sleep(Duration::from_millis(5)).await;
		token.cancel();

		let woke = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
		assert!(woke);
	}

	#[tokio::test]
	async fn cancelled_resolves_immediately_when_already_fired() {
		let token = CancelToken::new();
		token.cancel();
		tokio::time::timeout(Duration::from_millis(10), token.cancelled())
			.await
			.unwrap();
	}
}
