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

//! An in-process `Queue` implementation used by the fast test suite and by
//! anyone exercising the cluster/consumer engineering without a live
//! broker. Reproduces the broker's at-least-once / empty-queue-sentinel
//! contract faithfully.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		atomic::{AtomicU64, Ordering},
		Mutex,
	},
};

use async_trait::async_trait;

use super::Queue;
use crate::{config::OpConfig, error::QueueError};

struct Entry {
	queue_name: String,
	payload: Vec<u8>,
}

#[derive(Default)]
struct State {
	/// FIFO of ids per queue name, at-least-once: an id is removed from
	/// here when fetched, but stays in `entries` until acked.
	queues: HashMap<String, VecDeque<String>>,
	entries: HashMap<String, Entry>,
}

/// A trivial in-memory broker shared by every pool in a `QueueCluster` that
/// wants to simulate a single physical node.
pub struct InMemoryQueue {
	state: Mutex<State>,
	next_id: AtomicU64,
	label: String,
}

impl InMemoryQueue {
	pub fn new() -> Self {
		static COUNTER: AtomicU64 = AtomicU64::new(0);
		let label = format!("node-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
		Self { state: Mutex::new(State::default()), next_id: AtomicU64::new(0), label }
	}

	/// Human-readable node label, useful for pinning assertions in tests.
	pub fn label(&self) -> &str {
		&self.label
	}

	/// Number of jobs currently fetchable (not yet fetched) on a queue.
	pub fn pending_count(&self, queue_name: &str) -> usize {
		self.state.lock().unwrap().queues.get(queue_name).map(|q| q.len()).unwrap_or(0)
	}
}

impl Default for InMemoryQueue {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Queue for InMemoryQueue {
	async fn add(&self, queue_name: &str, payload: Vec<u8>, _opts: &OpConfig) -> Result<String, QueueError> {
		let id = format!("{}-{}", self.label, self.next_id.fetch_add(1, Ordering::Relaxed));
		let mut state = self.state.lock().unwrap();
		state.entries.insert(id.clone(), Entry { queue_name: queue_name.to_string(), payload });
		state.queues.entry(queue_name.to_string()).or_default().push_back(id.clone());
		Ok(id)
	}

	async fn get(&self, id: &str) -> Result<(String, Vec<u8>), QueueError> {
		let state = self.state.lock().unwrap();
		let entry = state.entries.get(id).ok_or_else(|| QueueError::Transport(format!("unknown job {id}")))?;
		Ok((entry.queue_name.clone(), entry.payload.clone()))
	}

	async fn ack(&self, id: &str) -> Result<(), QueueError> {
		let mut state = self.state.lock().unwrap();
		state.entries.remove(id);
		Ok(())
	}

	async fn nack(&self, id: &str) -> Result<(), QueueError> {
		let mut state = self.state.lock().unwrap();
		let queue_name = state.entries.get(id).map(|e| e.queue_name.clone());
		if let Some(queue_name) = queue_name {
			state.queues.entry(queue_name).or_default().push_back(id.to_string());
		}
		Ok(())
	}

	async fn fetch(&self, queue_name: &str, _opts: &OpConfig) -> Result<(String, String, Vec<u8>), QueueError> {
		let mut state = self.state.lock().unwrap();
		let id = state.queues.get_mut(queue_name).and_then(|q| q.pop_front());
		match id {
			Some(id) => {
				let payload = state.entries.get(&id).map(|e| e.payload.clone()).unwrap_or_default();
				Ok((id, queue_name.to_string(), payload))
			}
			None => Err(QueueError::Empty),
		}
	}
}
