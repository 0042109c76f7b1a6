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

//! An in-process `KvNode` reproducing just enough of Redis's `SET NX PX`
//! and scripting semantics to exercise the lock algorithm without a live
//! server: expiry is checked lazily, on every read, rather than by a
//! background sweep.

use std::{
	collections::HashMap,
	sync::Mutex,
	time::{Duration, Instant},
};

use async_trait::async_trait;

use super::KvNode;
use crate::error::KvError;

struct Entry {
	value: String,
	expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryKvNode {
	entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKvNode {
	pub fn new() -> Self {
		Self::default()
	}

	/// Test-only hook: drops `key` immediately, as if an operator had run
	/// `DEL` directly or the entry had already expired. Used to force a
	/// lock-loss scenario deterministically instead of racing real ttls.
	pub fn force_delete(&self, key: &str) {
		self.entries.lock().unwrap().remove(key);
	}

	fn live(entries: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
		match entries.get(key) {
			Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
			Some(_) => {
				entries.remove(key);
				None
			}
			None => None,
		}
	}
}

#[async_trait]
impl KvNode for InMemoryKvNode {
	async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
		let mut entries = self.entries.lock().unwrap();
		if Self::live(&mut entries, key).is_some() {
			return Ok(false);
		}
		entries.insert(key.to_string(), Entry { value: value.to_string(), expires_at: Instant::now() + ttl });
		Ok(true)
	}

	/// Interprets exactly the two scripts `crate::lock` actually uses,
	/// matched by source text rather than by running a real Lua VM.
	async fn eval_int(&self, script: &str, key: &str, args: &[&str]) -> Result<i64, KvError> {
		let mut entries = self.entries.lock().unwrap();
		let current = Self::live(&mut entries, key);

		if script.contains("\"DEL\"") {
			// release script: delete iff the value still matches.
			return match current {
				Some(ref v) if v == args[0] => {
					entries.remove(key);
					Ok(1)
				}
				_ => Ok(0),
			};
		}

		if script.contains("\"PX\"") {
			// extend script: reset the ttl iff the value still matches.
			return match current {
				Some(ref v) if v == args[0] => {
					let ttl_ms: u64 = args[1].parse().unwrap_or(0);
					entries.insert(
						key.to_string(),
						Entry { value: v.clone(), expires_at: Instant::now() + Duration::from_millis(ttl_ms) },
					);
					Ok(1)
				}
				_ => Ok(0),
			};
		}

		Err(KvError::Transport(format!("unrecognized script: {script}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lock::{EXTEND_SCRIPT, UNLOCK_SCRIPT};

	#[async_std::test]
	async fn set_nx_px_refuses_second_writer() {
		let node = InMemoryKvNode::new();
		assert!(node.set_nx_px("k", "a", Duration::from_millis(500)).await.unwrap());
		assert!(!node.set_nx_px("k", "b", Duration::from_millis(500)).await.unwrap());
	}

	#[async_std::test]
	async fn release_script_only_deletes_matching_value() {
		let node = InMemoryKvNode::new();
		node.set_nx_px("k", "token", Duration::from_secs(5)).await.unwrap();
		assert_eq!(node.eval_int(UNLOCK_SCRIPT, "k", &["wrong-token"]).await.unwrap(), 0);
		assert_eq!(node.eval_int(UNLOCK_SCRIPT, "k", &["token"]).await.unwrap(), 1);
	}

	#[async_std::test]
	async fn extend_script_resets_ttl_only_for_matching_value() {
		let node = InMemoryKvNode::new();
		node.set_nx_px("k", "token", Duration::from_millis(50)).await.unwrap();
		assert_eq!(node.eval_int(EXTEND_SCRIPT, "k", &["token", "5000"]).await.unwrap(), 1);
		async_std::task::sleep(Duration::from_millis(100)).await;
		// still alive: the extend above pushed expiry out to +5s.
		assert!(!node.set_nx_px("k", "other", Duration::from_millis(10)).await.unwrap());
	}
}
