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

//! A single Redis-backed KV node: a bounded idle connection pool plus the
//! AUTH/SELECT dial sequence a `HostDescriptor` may ask for.

use std::time::{Duration, Instant};

use async_std::sync::Mutex;
use async_trait::async_trait;
use redis::{aio::Connection, Client};

use super::KvNode;
use crate::{config::HostDescriptor, error::KvError};

fn to_kv_error(err: redis::RedisError) -> KvError {
	KvError::Transport(err.to_string())
}

/// How many idle connections a single node keeps warm. Beyond this, dialing
/// a fresh connection is preferred to growing the pool unbounded.
const MAX_IDLE: usize = 8;

/// Default span an idle connection may sit unused before the reaper drops
/// it, for callers that construct a node directly rather than through a
/// `KvClusterConfig`.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A lazily-dialed, pool-backed connection to one Redis host, carrying out
/// the `HostDescriptor`'s `AUTH`/`SELECT` sequence on every fresh dial.
pub struct RedisKvNode {
	client: Client,
	descriptor: HostDescriptor,
	idle: Mutex<Vec<(Connection, Instant)>>,
	idle_timeout: Duration,
}

impl RedisKvNode {
	pub fn new(descriptor: HostDescriptor) -> Result<Self, KvError> {
		Self::with_idle_timeout(descriptor, DEFAULT_IDLE_TIMEOUT)
	}

	pub fn with_idle_timeout(descriptor: HostDescriptor, idle_timeout: Duration) -> Result<Self, KvError> {
		let client = Client::open(descriptor.address.as_str()).map_err(to_kv_error)?;
		Ok(Self { client, descriptor, idle: Mutex::new(Vec::new()), idle_timeout })
	}

	async fn dial(&self) -> Result<Connection, KvError> {
		let mut conn = self.client.get_async_connection().await.map_err(to_kv_error)?;
		if let Some(auth) = &self.descriptor.auth {
			redis::cmd("AUTH").arg(auth).query_async::<_, ()>(&mut conn).await.map_err(to_kv_error)?;
		}
		if let Some(db) = &self.descriptor.db {
			redis::cmd("SELECT").arg(db).query_async::<_, ()>(&mut conn).await.map_err(to_kv_error)?;
		}
		Ok(conn)
	}

	/// Drops any idle connection that has sat longer than `idle_timeout`.
	/// Called on both checkout and checkin so a stale connection is never
	/// handed back out and the idle set never grows unboundedly with dead
	/// weight between bursts of traffic.
	fn reap_stale(&self, idle: &mut Vec<(Connection, Instant)>) {
		let now = Instant::now();
		idle.retain(|(_, checked_in_at)| now.duration_since(*checked_in_at) < self.idle_timeout);
	}

	async fn checkout(&self) -> Result<Connection, KvError> {
		let mut idle = self.idle.lock().await;
		self.reap_stale(&mut idle);
		if let Some((conn, _)) = idle.pop() {
			return Ok(conn);
		}
		drop(idle);
		self.dial().await
	}

	async fn checkin(&self, conn: Connection) {
		let mut idle = self.idle.lock().await;
		self.reap_stale(&mut idle);
		if idle.len() < MAX_IDLE {
			idle.push((conn, Instant::now()));
		}
	}
}

#[async_trait]
impl KvNode for RedisKvNode {
	async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
		let mut conn = self.checkout().await?;
		let result: redis::RedisResult<Option<String>> = redis::cmd("SET")
			.arg(key)
			.arg(value)
			.arg("NX")
			.arg("PX")
			.arg(ttl.as_millis() as u64)
			.query_async(&mut conn)
			.await;
		let acquired = match result {
			Ok(reply) => reply.is_some(),
			Err(err) => {
				// a stale pooled connection is dropped rather than recycled
				return Err(to_kv_error(err));
			}
		};
		self.checkin(conn).await;
		Ok(acquired)
	}

	async fn eval_int(&self, script: &str, key: &str, args: &[&str]) -> Result<i64, KvError> {
		let mut conn = self.checkout().await?;
		let script = redis::Script::new(script);
		let mut invocation = script.key(key);
		for arg in args {
			invocation = invocation.arg(*arg);
		}
		let result: redis::RedisResult<i64> = invocation.invoke_async(&mut conn).await;
		match result {
			Ok(value) => {
				self.checkin(conn).await;
				Ok(value)
			}
			Err(err) => Err(to_kv_error(err)),
		}
	}

	async fn close(&self) {
		self.idle.lock().await.clear();
	}
}
