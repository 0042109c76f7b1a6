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

//! Multi-node queue cluster: round-robin load balancing across pools plus
//! pinning, so a `chain()`ed caller's fetch/ack pair lands on the same
//! broker node without having to track pool indices itself.

use std::{
	sync::atomic::{AtomicUsize, Ordering},
	time::Duration,
};

use async_std::future::timeout;

use super::Queue;
use crate::{config::OpConfig, error::QueueError};

/// The read timeout the distilled spec mandates regardless of whatever a
/// caller's `OpConfig::timeout` says: `fetch()` never blocks longer than
/// this, full stop.
const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// A pinned handle into a `QueueCluster`: every operation through it targets
/// the same pool index it was created with, until dropped.
pub struct Pinned<'a, Q> {
	cluster: &'a QueueCluster<Q>,
	pool_index: usize,
}

impl<'a, Q: Queue> Pinned<'a, Q> {
	pub async fn add(&self, queue_name: &str, payload: Vec<u8>, opts: &OpConfig) -> Result<String, QueueError> {
		self.cluster.pools[self.pool_index].add(queue_name, payload, opts).await
	}

	pub async fn get(&self, id: &str) -> Result<(String, Vec<u8>), QueueError> {
		self.cluster.pools[self.pool_index].get(id).await
	}

	pub async fn ack(&self, id: &str) -> Result<(), QueueError> {
		self.cluster.pools[self.pool_index].ack(id).await
	}

	pub async fn nack(&self, id: &str) -> Result<(), QueueError> {
		self.cluster.pools[self.pool_index].nack(id).await
	}

	pub async fn fetch(&self, queue_name: &str, opts: &OpConfig) -> Result<(String, String, Vec<u8>), QueueError> {
		fetch_with_timeout(&self.cluster.pools[self.pool_index], queue_name, opts).await
	}
}

async fn fetch_with_timeout<Q: Queue>(
	pool: &Q,
	queue_name: &str,
	opts: &OpConfig,
) -> Result<(String, String, Vec<u8>), QueueError> {
	match timeout(FETCH_TIMEOUT, pool.fetch(queue_name, opts)).await {
		Ok(result) => result,
		Err(_) => Err(QueueError::Timeout),
	}
}

/// Owns a fan-out of broker connections and hands out round-robin or pinned
/// access to them. Unlike the KV cluster, a queue op always targets exactly
/// one pool -- there is no quorum here, only load balancing.
pub struct QueueCluster<Q> {
	pools: Vec<Q>,
	next: AtomicUsize,
}

impl<Q: Queue> QueueCluster<Q> {
	pub fn new(pools: Vec<Q>) -> Self {
		assert!(!pools.is_empty(), "a queue cluster needs at least one pool");
		Self { pools, next: AtomicUsize::new(0) }
	}

	fn next_pool_index(&self) -> usize {
		self.next.fetch_add(1, Ordering::Relaxed) % self.pools.len()
	}

	fn get_pool(&self) -> &Q {
		&self.pools[self.next_pool_index()]
	}

	/// Pins subsequent `fetch`/`ack`/`nack` calls through the returned handle
	/// to a single, freshly round-robin-selected pool.
	pub fn chain(&self) -> Pinned<'_, Q> {
		Pinned { cluster: self, pool_index: self.next_pool_index() }
	}

	pub async fn add(&self, queue_name: &str, payload: Vec<u8>, opts: &OpConfig) -> Result<String, QueueError> {
		self.get_pool().add(queue_name, payload, opts).await
	}

	pub async fn get(&self, id: &str) -> Result<(String, Vec<u8>), QueueError> {
		self.get_pool().get(id).await
	}

	pub async fn ack(&self, id: &str) -> Result<(), QueueError> {
		self.get_pool().ack(id).await
	}

	pub async fn nack(&self, id: &str) -> Result<(), QueueError> {
		self.get_pool().nack(id).await
	}

	/// Round-robin fetch, bounded by the mandatory 2s read timeout.
	pub async fn fetch(&self, queue_name: &str, opts: &OpConfig) -> Result<(String, String, Vec<u8>), QueueError> {
		fetch_with_timeout(self.get_pool(), queue_name, opts).await
	}

	pub fn pool_count(&self) -> usize {
		self.pools.len()
	}

	pub async fn close(&self) {
		futures::future::join_all(self.pools.iter().map(|pool| pool.close())).await;
	}
}
