// Copyright 2018-2019 Parity Technologies (UK) Ltd.
// This file is part of latchqueue.

// latchqueue is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// latchqueue is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with latchqueue. If not, see <http://www.gnu.org/licenses/>.

//! A Redlock-style distributed lock over [`crate::kv::KvCluster`]: quorum
//! acquisition with a fresh nonce per attempt, clock-drift-corrected
//! validity windows, and an auto-renew loop that signals loss through a
//! channel rather than unwinding the holder's stack.

use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex as StdMutex,
	},
	time::{Duration, Instant},
};

use async_std::sync::Mutex as AsyncMutex;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{stream::FuturesUnordered, StreamExt};

use crate::{
	config::RuntimeConfig,
	error::LockError,
	kv::{KvCluster, KvNode},
};

pub(crate) const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

pub(crate) const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) ~= ARGV[1] then
  return 0
else
  if redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2]) ~= nil then
    return 1
  else
    return 0
  end
end
"#;

/// Matches the reference Redlock algorithm's compensation for clock drift
/// between nodes: `1%` of the requested ttl, plus a fixed 2ms pad for
/// Redis's own expiry rounding.
const CLOCK_DRIFT_FACTOR: f64 = 0.01;
const CLOCK_DRIFT_PAD: Duration = Duration::from_millis(2);

fn random_token() -> String {
	let bytes: [u8; 32] = rand::random();
	BASE64.encode(bytes)
}

fn compute_validity(ttl: Duration, elapsed: Duration) -> Option<Duration> {
	let drift = Duration::from_secs_f64(ttl.as_secs_f64() * CLOCK_DRIFT_FACTOR) + CLOCK_DRIFT_PAD;
	ttl.checked_sub(elapsed)?.checked_sub(drift)
}

struct AutoRenewHandle {
	stop_tx: flume::Sender<()>,
	done_rx: flume::Receiver<()>,
}

enum AutoRenewState {
	Off,
	Running(AutoRenewHandle),
}

/// Owns the KV fan-out and the retry policy; hands out [`Lock`]s.
pub struct LockManager<N> {
	cluster: Arc<KvCluster<N>>,
	runtime: Arc<RuntimeConfig>,
	attempts: u32,
	retry_delay: Duration,
}

impl<N> Clone for LockManager<N> {
	fn clone(&self) -> Self {
		Self {
			cluster: Arc::clone(&self.cluster),
			runtime: Arc::clone(&self.runtime),
			attempts: self.attempts,
			retry_delay: self.retry_delay,
		}
	}
}

impl<N: KvNode> LockManager<N> {
	pub fn new(cluster: KvCluster<N>, runtime: RuntimeConfig) -> Self {
		Self { cluster: Arc::new(cluster), runtime: Arc::new(runtime), attempts: 16, retry_delay: Duration::from_millis(512) }
	}

	/// Direct access to the underlying KV fan-out, for callers that need to
	/// close it alongside the queue cluster.
	pub fn cluster(&self) -> &KvCluster<N> {
		&self.cluster
	}

	pub fn with_attempts(mut self, attempts: u32) -> Self {
		self.attempts = attempts.max(1);
		self
	}

	pub fn with_retry_delay(mut self, delay: Duration) -> Self {
		self.retry_delay = delay;
		self
	}

	fn jittered_delay(&self) -> Duration {
		let span_ms = self.retry_delay.as_millis() as u64 + 1;
		let jitter_ms = rand::random::<u64>() % span_ms;
		self.retry_delay + Duration::from_millis(jitter_ms)
	}

	/// A single attempt: fresh nonce, quorum scan with early stop (polling
	/// stops the moment quorum is reached; nodes not yet polled are simply
	/// never asked).
	async fn try_acquire_once(&self, key: &str, value: &str, ttl: Duration) -> Option<Duration> {
		let start = Instant::now();
		let quorum = self.cluster.quorum();
		let mut pending: FuturesUnordered<_> =
			self.cluster.nodes().iter().map(|node| node.set_nx_px(key, value, ttl)).collect();

		let mut granted = 0usize;
		while granted < quorum {
			match pending.next().await {
				Some(Ok(true)) => granted += 1,
				Some(_) => {}
				None => break,
			}
		}
		drop(pending);

		if granted < quorum {
			return None;
		}
		compute_validity(ttl, start.elapsed())
	}

	/// Acquires `resource`, retrying up to `attempts` times with a jittered
	/// delay and a best-effort unwind (release script fan-out) between
	/// rounds. On success, returns a [`Lock`] good for `ttl`'s
	/// drift-corrected validity window.
	pub async fn acquire(self: &Arc<Self>, resource: &str, ttl: Duration) -> Result<Arc<Lock<N>>, LockError> {
		let key = self.runtime.lock_key(resource);
		for attempt in 0..self.attempts {
			let value = random_token();
			if let Some(validity) = self.try_acquire_once(&key, &value, ttl).await {
				let (lost_tx, lost_rx) = flume::bounded(1);
				return Ok(Arc::new(Lock {
					manager: Arc::clone(self),
					resource: resource.to_string(),
					key,
					value,
					ttl,
					validity: StdMutex::new(validity),
					released: AtomicBool::new(false),
					auto_renew: AsyncMutex::new(AutoRenewState::Off),
					lost_tx,
					lost_rx,
				}));
			}
			let _ = self.cluster.eval_all(UNLOCK_SCRIPT, &key, &[value.as_str()]).await;
			if attempt + 1 < self.attempts {
				async_std::task::sleep(self.jittered_delay()).await;
			}
		}
		Err(LockError::FailedAfterMaxAttempts)
	}
}

/// A held lock on one resource. Exclusivity holds for [`Lock::validity`]
/// from the moment [`LockManager::acquire`] returned, not for the full
/// `ttl` requested -- callers that need longer must either request a
/// generous ttl or run [`Lock::start_auto_renew`].
pub struct Lock<N> {
	manager: Arc<LockManager<N>>,
	resource: String,
	key: String,
	value: String,
	ttl: Duration,
	validity: StdMutex<Duration>,
	released: AtomicBool,
	auto_renew: AsyncMutex<AutoRenewState>,
	/// Fires exactly once, the moment auto-renew fails to extend in time.
	lost_tx: flume::Sender<()>,
	lost_rx: flume::Receiver<()>,
}

impl<N: KvNode> Lock<N> {
	pub fn resource(&self) -> &str {
		&self.resource
	}

	pub fn validity(&self) -> Duration {
		*self.validity.lock().unwrap()
	}

	fn set_validity(&self, validity: Duration) {
		*self.validity.lock().unwrap() = validity;
	}

	/// A clone of the channel that fires when auto-renew loses the lock.
	/// Race this against your critical section (`futures::select!` or
	/// similar) to stop touching shared state the moment exclusivity can no
	/// longer be guaranteed.
	pub fn lost(&self) -> flume::Receiver<()> {
		self.lost_rx.clone()
	}

	async fn extend_once(&self, ttl: Duration) -> Result<Duration, LockError> {
		let start = Instant::now();
		let quorum = self.manager.cluster.quorum();
		let ttl_ms = ttl.as_millis().to_string();
		let results = self.manager.cluster.eval_all(EXTEND_SCRIPT, &self.key, &[self.value.as_str(), ttl_ms.as_str()]).await;
		let granted = results.iter().filter(|r| matches!(r, Ok(1))).count();
		if granted < quorum {
			return Err(LockError::ExtensionFailed);
		}
		compute_validity(ttl, start.elapsed()).ok_or(LockError::ExtensionFailed)
	}

	/// Manually extends the lease. Refused while auto-renew is running --
	/// the two would race to decide the current validity.
	pub async fn extend(&self, ttl: Duration) -> Result<(), LockError> {
		if self.released.load(Ordering::Acquire) {
			return Err(LockError::EmptyLock);
		}
		if matches!(*self.auto_renew.lock().await, AutoRenewState::Running(_)) {
			return Err(LockError::ExtendWhileAutoRenew);
		}
		let validity = self.extend_once(ttl).await?;
		self.set_validity(validity);
		Ok(())
	}

	/// Starts a background task that re-extends the lease at half its ttl,
	/// repeatedly, until `stop_auto_renew` is called or an extend round
	/// fails to reach quorum -- at which point `lost()` fires once and the
	/// task exits. State machine: Off -> Running -> (stopped) -> Off.
	pub async fn start_auto_renew(self: &Arc<Self>) -> Result<(), LockError> {
		if self.released.load(Ordering::Acquire) {
			return Err(LockError::EmptyLock);
		}
		let mut state = self.auto_renew.lock().await;
		if matches!(*state, AutoRenewState::Running(_)) {
			return Ok(());
		}
		let (stop_tx, stop_rx) = flume::bounded::<()>(1);
		let (done_tx, done_rx) = flume::bounded::<()>(1);
		let lock = Arc::clone(self);
		async_std::task::spawn(async move {
			loop {
				if stop_rx.try_recv().is_ok() {
					break;
				}
				async_std::task::sleep(lock.ttl / 2).await;
				match lock.extend_once(lock.ttl).await {
					Ok(validity) => lock.set_validity(validity),
					Err(_) => {
						let _ = lock.lost_tx.send(());
						break;
					}
				}
			}
			let _ = done_tx.send(());
		});
		*state = AutoRenewState::Running(AutoRenewHandle { stop_tx, done_rx });
		Ok(())
	}

	/// Stops auto-renew if running and waits for the background task to
	/// actually exit, so a caller that immediately calls `release()` after
	/// this never races the renew task's last extend against the unlock.
	pub async fn stop_auto_renew(&self) {
		let handle = {
			let mut state = self.auto_renew.lock().await;
			match std::mem::replace(&mut *state, AutoRenewState::Off) {
				AutoRenewState::Running(handle) => Some(handle),
				AutoRenewState::Off => None,
			}
		};
		if let Some(handle) = handle {
			let _ = handle.stop_tx.send(());
			let _ = handle.done_rx.recv_async().await;
		}
	}

	/// Releases the lock: stops auto-renew, then fans the release script out
	/// to every node regardless of quorum (a partial release still frees the
	/// resource from the next acquirer's perspective). Idempotent only in
	/// the sense that a second call returns `EmptyLock` rather than
	/// double-running the script.
	pub async fn release(&self) -> Result<(), LockError> {
		if self.released.swap(true, Ordering::AcqRel) {
			return Err(LockError::EmptyLock);
		}
		self.stop_auto_renew().await;
		let _ = self.manager.cluster.eval_all(UNLOCK_SCRIPT, &self.key, &[self.value.as_str()]).await;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kv::InMemoryKvNode;

	fn manager(n: usize) -> Arc<LockManager<InMemoryKvNode>> {
		let cluster = KvCluster::new((0..n).map(|_| InMemoryKvNode::new()).collect());
		Arc::new(LockManager::new(cluster, RuntimeConfig::default()).with_retry_delay(Duration::from_millis(5)))
	}

	#[async_std::test]
	async fn acquire_then_release_frees_the_resource() {
		let manager = manager(3);
		let lock = manager.acquire("r1", Duration::from_secs(5)).await.unwrap();
		assert!(lock.validity() > Duration::from_millis(0));
		lock.release().await.unwrap();

		// a second acquire on the same resource must now succeed.
		let lock2 = manager.acquire("r1", Duration::from_secs(5)).await.unwrap();
		lock2.release().await.unwrap();
	}

	#[async_std::test]
	async fn concurrent_acquire_is_mutually_exclusive() {
		let manager = manager(3);
		let first = manager.acquire("shared", Duration::from_secs(5)).await.unwrap();
		let second = manager.acquire("shared", Duration::from_millis(50)).await;
		assert!(second.is_err());
		first.release().await.unwrap();
	}

	#[async_std::test]
	async fn release_twice_is_rejected() {
		let manager = manager(3);
		let lock = manager.acquire("r2", Duration::from_secs(5)).await.unwrap();
		lock.release().await.unwrap();
		assert!(matches!(lock.release().await.unwrap_err(), LockError::EmptyLock));
	}

	#[async_std::test]
	async fn extend_while_auto_renew_running_is_refused() {
		let manager = manager(3);
		let lock = manager.acquire("r3", Duration::from_secs(5)).await.unwrap();
		lock.start_auto_renew().await.unwrap();
		let err = lock.extend(Duration::from_secs(5)).await.unwrap_err();
		assert!(matches!(err, LockError::ExtendWhileAutoRenew));
		lock.release().await.unwrap();
	}

	#[async_std::test]
	async fn auto_renew_survives_past_the_original_ttl() {
		let manager = manager(3);
		let lock = manager.acquire("r4", Duration::from_millis(120)).await.unwrap();
		lock.start_auto_renew().await.unwrap();
		async_std::task::sleep(Duration::from_millis(250)).await;
		// a competing acquire must still fail: auto-renew kept the lease alive
		// well past the original 120ms ttl.
		let competitor = manager.acquire("r4", Duration::from_millis(50)).await;
		assert!(competitor.is_err());
		lock.release().await.unwrap();
	}
}
