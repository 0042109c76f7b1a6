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

//! Fans every lock operation out to all configured KV nodes (no sharding:
//! every node sees every key) and leaves quorum counting to the caller,
//! since the right thing to do on a non-quorum round differs between
//! acquire (unwind via the release script) and release/extend (best effort).

use std::time::Duration;

use futures::future::join_all;

use super::KvNode;
use crate::error::KvError;

pub struct KvCluster<N> {
	nodes: Vec<N>,
}

impl<N: KvNode> KvCluster<N> {
	pub fn new(nodes: Vec<N>) -> Self {
		assert!(!nodes.is_empty(), "a kv cluster needs at least one node");
		Self { nodes }
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// Direct access to the node set, for callers (the lock algorithm) that
	/// need to scan with early stop rather than wait on the whole fan-out.
	pub fn nodes(&self) -> &[N] {
		&self.nodes
	}

	/// `floor(N/2) + 1`, the minimum number of nodes that must agree for an
	/// operation to be considered successful.
	pub fn quorum(&self) -> usize {
		self.nodes.len() / 2 + 1
	}

	/// Attempts `SET key value NX PX ttl` on every node concurrently.
	pub async fn try_acquire_all(&self, key: &str, value: &str, ttl: Duration) -> Vec<Result<bool, KvError>> {
		join_all(self.nodes.iter().map(|node| node.set_nx_px(key, value, ttl))).await
	}

	/// Runs `script` with `ARGV = args` against every node concurrently,
	/// returning each node's integer reply (or error).
	pub async fn eval_all(&self, script: &'static str, key: &str, args: &[&str]) -> Vec<Result<i64, KvError>> {
		join_all(self.nodes.iter().map(|node| node.eval_int(script, key, args))).await
	}

	pub async fn close(&self) {
		join_all(self.nodes.iter().map(|node| node.close())).await;
	}
}
