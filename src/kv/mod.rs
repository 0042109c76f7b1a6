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

//! The key/value side of the lock algorithm: a single `KvNode` is one
//! physical server; `KvCluster` fans every operation out to all of them
//! (there is no sharding, unlike the queue cluster) and lets [`crate::lock`]
//! count quorum itself.

mod cluster;
mod mock;
mod node;

pub use cluster::KvCluster;
pub use mock::InMemoryKvNode;
pub use node::RedisKvNode;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

/// `SET key value NX PX ttl`. The Lua scripts used for release/extend are
/// owned by [`crate::lock`] -- only `eval_int` is needed to run them, since
/// both return a plain integer.
#[async_trait]
pub trait KvNode: Send + Sync + 'static {
	/// Attempts to set `key` to `value` only if it does not already exist,
	/// with an expiry of `ttl`. Returns whether the set happened.
	async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

	/// Evaluates a Lua script using the `KEYS[1]`/`ARGV[..]` convention,
	/// returning the integer it replies with. Used for both the release and
	/// extend scripts -- they differ only in source, not shape.
	async fn eval_int(&self, script: &str, key: &str, args: &[&str]) -> Result<i64, KvError>;

	/// Releases any pooled connections. A no-op for fakes that hold none.
	async fn close(&self) {}
}
