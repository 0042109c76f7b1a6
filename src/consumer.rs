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

//! The consumer runtime: registers per-queue [`Processor`]s and runs the
//! fetch/lock/process/ack/release loop against a pinned queue connection.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_std::sync::Mutex as AsyncMutex;
use async_trait::async_trait;
use futures::{select, FutureExt};

use crate::{
	config::RuntimeConfig,
	error::QueueError,
	job::{self, Job},
	kv::KvNode,
	lock::LockManager,
	queue::{Pinned, Queue, QueueCluster},
};

pub type ProcessError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Implemented once per queue name, registered with a [`Consumer`].
#[async_trait]
pub trait Processor: Send + Sync + 'static {
	/// Runs the user's work for a single job. Returning `Err` still acks the
	/// job in the broker -- retries of application-level failures are the
	/// user's responsibility (e.g. re-enqueue from within `process`).
	async fn process(&self, job: &Job) -> Result<(), ProcessError>;

	/// How long the initial lock lease should last. Defaults to the
	/// algorithm's own default ttl (8s).
	fn lock_ttl(&self) -> Duration {
		Duration::from_secs(8)
	}

	/// Whether the lock should be kept alive past `lock_ttl` via
	/// auto-renewal for the duration of `process`. Defaults to yes; a
	/// processor confident its work always finishes well inside `lock_ttl`
	/// may opt out.
	fn should_auto_renew(&self, _job: &Job) -> bool {
		true
	}
}

enum Outcome {
	Completed(Result<(), ProcessError>),
	Lost,
}

/// Registers processors and runs the fetch/lock/process/ack/release loop.
/// A single `Consumer` may run `process()` concurrently for distinct queue
/// names; running it twice for the *same* queue name races the queue
/// cluster's pinning state (single-writer, unsynchronized by design).
pub struct Consumer<Q: Queue, N: KvNode> {
	queue_cluster: Arc<QueueCluster<Q>>,
	lock_manager: Arc<LockManager<N>>,
	processors: AsyncMutex<HashMap<String, Arc<dyn Processor>>>,
	stop_tx: flume::Sender<()>,
	stop_rx: flume::Receiver<()>,
}

impl<Q: Queue, N: KvNode> Consumer<Q, N> {
	pub fn new(queue_cluster: impl Into<Arc<QueueCluster<Q>>>, lock_manager: Arc<LockManager<N>>) -> Self {
		let (stop_tx, stop_rx) = flume::bounded(1);
		Self {
			queue_cluster: queue_cluster.into(),
			lock_manager,
			processors: AsyncMutex::new(HashMap::new()),
			stop_tx,
			stop_rx,
		}
	}

	/// Shares the queue cluster this consumer drains, so a caller (a
	/// `Producer`, or a test) can enqueue into the exact same cluster.
	pub fn queue_cluster(&self) -> &Arc<QueueCluster<Q>> {
		&self.queue_cluster
	}

	/// Registers (or overwrites) the processor for `queue_name`.
	pub async fn register(&self, queue_name: impl Into<String>, processor: Arc<dyn Processor>) {
		self.processors.lock().await.insert(queue_name.into(), processor);
	}

	/// Runs the fetch/lock/process/ack/release loop against `queue_name`
	/// until `close()` is called. Never returns early on a transient
	/// error -- it warn-logs and backs off, capped at ~1s between attempts.
	pub async fn process(&self, queue_name: &str) {
		let mut consecutive_errors: u32 = 0;
		loop {
			if self.stop_rx.try_recv().is_ok() {
				return;
			}

			let pinned = self.queue_cluster.chain();
			match pinned.fetch(queue_name, &Default::default()).await {
				Ok((id, fetched_queue, raw)) => {
					consecutive_errors = 0;
					self.handle_job(&pinned, id, fetched_queue, raw).await;
				}
				Err(QueueError::Empty) => {
					consecutive_errors = 0;
					async_std::task::yield_now().await;
				}
				Err(err) => {
					tracing::warn!(queue = %queue_name, error = %err, "fetch failed");
					consecutive_errors = consecutive_errors.saturating_add(1);
					async_std::task::sleep(backoff(consecutive_errors)).await;
				}
			}
		}
	}

	async fn handle_job(&self, pinned: &Pinned<'_, Q>, id: String, queue_name: String, raw: Vec<u8>) {
		let processor = {
			let processors = self.processors.lock().await;
			match processors.get(&queue_name) {
				Some(processor) => Arc::clone(processor),
				None => {
					tracing::warn!(job_id = %id, queue = %queue_name, "no processor registered, leaving for redelivery");
					return;
				}
			}
		};

		let job = match job::from_details(&id, &queue_name, &raw) {
			Ok(job) => job,
			Err(err) => {
				tracing::warn!(job_id = %id, error = %err, "malformed job envelope, nacking");
				let _ = pinned.nack(&id).await;
				return;
			}
		};

		// No timeout wraps this: the lock's own Attempts/Delay retry budget
		// (up to ~8s at the defaults) is the acquisition deadline. A caller
		// wrapping this in something shorter would abandon jobs to
		// redelivery before that budget is exhausted.
		let lock = match self.lock_manager.acquire(&id, processor.lock_ttl()).await {
			Ok(lock) => lock,
			Err(err) => {
				tracing::warn!(job_id = %id, error = %err, "failed to acquire lock, leaving for redelivery");
				return;
			}
		};

		if processor.should_auto_renew(&job) {
			if let Err(err) = lock.start_auto_renew().await {
				tracing::warn!(job_id = %id, error = %err, "failed to start auto-renew");
			}
		}

		let lost = lock.lost();
		let outcome = select! {
			result = processor.process(&job).fuse() => Outcome::Completed(result),
			_ = lost.recv_async().fuse() => Outcome::Lost,
		};

		match outcome {
			Outcome::Lost => {
				tracing::error!(job_id = %id, "lock lost mid-processing, abandoning result");
				let _ = lock.release().await;
			}
			Outcome::Completed(Ok(())) => {
				if let Err(err) = pinned.ack(&id).await {
					tracing::warn!(job_id = %id, error = %err, "ack failed, lock will self-expire");
					return;
				}
				tracing::debug!(job_id = %id, "job processed");
				let _ = lock.release().await;
			}
			Outcome::Completed(Err(err)) => {
				tracing::warn!(job_id = %id, error = %err, "processor returned error");
				if let Err(err) = pinned.ack(&id).await {
					tracing::warn!(job_id = %id, error = %err, "ack failed, lock will self-expire");
					return;
				}
				let _ = lock.release().await;
			}
		}
	}

	/// Signals `process()` to stop at its next loop iteration and closes
	/// both clusters. Does not wait for an in-flight job.
	pub async fn close(&self) {
		let _ = self.stop_tx.try_send(());
		self.queue_cluster.close().await;
		self.lock_manager.cluster().close().await;
	}
}

fn backoff(consecutive_errors: u32) -> Duration {
	let capped_exponent = consecutive_errors.min(5);
	let millis = 50u64.saturating_mul(1u64 << capped_exponent);
	Duration::from_millis(millis.min(1000))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{kv::InMemoryKvNode, kv::KvCluster, queue::InMemoryQueue};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex as StdMutex;

	struct CountingProcessor {
		seen: AtomicUsize,
		bodies: StdMutex<Vec<String>>,
	}

	#[async_trait]
	impl Processor for CountingProcessor {
		async fn process(&self, job: &Job) -> Result<(), ProcessError> {
			self.seen.fetch_add(1, Ordering::SeqCst);
			self.bodies.lock().unwrap().push(job.body.clone());
			Ok(())
		}

		fn should_auto_renew(&self, _job: &Job) -> bool {
			false
		}
	}

	fn lock_manager(n: usize) -> Arc<LockManager<InMemoryKvNode>> {
		let cluster = KvCluster::new((0..n).map(|_| InMemoryKvNode::new()).collect());
		Arc::new(LockManager::new(cluster, RuntimeConfig::default()).with_retry_delay(Duration::from_millis(5)))
	}

	#[async_std::test]
	async fn processes_a_job_and_acks_it() {
		let queue_cluster = QueueCluster::new(vec![InMemoryQueue::new()]);
		let consumer = Consumer::new(queue_cluster, lock_manager(3));
		let processor = Arc::new(CountingProcessor { seen: AtomicUsize::new(0), bodies: StdMutex::new(Vec::new()) });
		consumer.register("jobs", processor.clone()).await;

		job::add(&consumer.queue_cluster, "jobs", "hello", chrono::Utc::now(), None).await.unwrap();

		let pinned = consumer.queue_cluster.chain();
		let (id, queue_name, raw) = pinned.fetch("jobs", &Default::default()).await.unwrap();
		consumer.handle_job(&pinned, id, queue_name, raw).await;

		assert_eq!(processor.seen.load(Ordering::SeqCst), 1);
		assert_eq!(processor.bodies.lock().unwrap().as_slice(), ["hello"]);
	}

	#[async_std::test]
	async fn missing_processor_leaves_job_for_redelivery() {
		let queue_cluster = QueueCluster::new(vec![InMemoryQueue::new()]);
		let consumer = Consumer::new(queue_cluster, lock_manager(3));
		job::add(&consumer.queue_cluster, "unregistered", "x", chrono::Utc::now(), None).await.unwrap();

		let pinned = consumer.queue_cluster.chain();
		let (id, queue_name, raw) = pinned.fetch("unregistered", &Default::default()).await.unwrap();
		consumer.handle_job(&pinned, id.clone(), queue_name, raw).await;

		// never acked: still fetchable as a fresh broker redelivery would be
		// after the producer's own nack/retry path.
		let (_, _, payload) = pinned.get(&id).await.unwrap();
		assert!(!payload.is_empty());
	}
}
