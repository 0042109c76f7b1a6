//! Shared scaffolding for the integration tests: a `TracingGuard` that
//! installs the global `tracing` subscriber exactly once per process, and a
//! `Barrier` for coordinating concurrent job handlers in race scenarios.
//!
//! Unlike the teacher's `integration_tests/tests/test_guard.rs`, which holds
//! a process-wide mutex for the test's lifetime to serialize access to one
//! shared real Postgres database, nothing here needs serializing: every test
//! builds its own independent in-memory `KvNode`/`Queue` fakes, so there is
//! no shared external resource to take turns on.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Once,
};

use latchqueue::{InMemoryKvNode, InMemoryQueue, KvCluster, LockManager, QueueCluster, RuntimeConfig};

static TRACING_INIT: Once = Once::new();

/// Call at the top of any test that wants log output on failure
/// (`RUST_LOG=latchqueue=debug cargo test -- --nocapture`). Safe to call
/// from every test; the subscriber is installed exactly once per process.
pub struct TracingGuard;

impl TracingGuard {
	pub fn install() -> Self {
		TRACING_INIT.call_once(|| {
			let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
		});
		TracingGuard
	}
}

pub fn kv_cluster(n: usize) -> KvCluster<InMemoryKvNode> {
	KvCluster::new((0..n).map(|_| InMemoryKvNode::new()).collect())
}

pub fn queue_cluster(n: usize) -> QueueCluster<InMemoryQueue> {
	QueueCluster::new((0..n).map(|_| InMemoryQueue::new()).collect())
}

pub fn lock_manager(n: usize) -> std::sync::Arc<LockManager<InMemoryKvNode>> {
	std::sync::Arc::new(
		LockManager::new(kv_cluster(n), RuntimeConfig::default())
			.with_retry_delay(std::time::Duration::from_millis(5)),
	)
}

/// A simple countdown latch: `n` holders call `arrive_and_wait()`, none of
/// which return until all `n` have called it. Used to force genuine
/// concurrency in race scenarios instead of hoping task scheduling overlaps.
pub struct Barrier {
	remaining: AtomicUsize,
}

impl Barrier {
	pub fn new(n: usize) -> Self {
		Self { remaining: AtomicUsize::new(n) }
	}

	pub async fn arrive_and_wait(&self) {
		self.remaining.fetch_sub(1, Ordering::SeqCst);
		loop {
			if self.remaining.load(Ordering::SeqCst) == 0 {
				return;
			}
			async_std::task::yield_now().await;
		}
	}
}
