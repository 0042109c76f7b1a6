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

//! The broker protocol itself is out of scope for this crate (it is
//! specified only at its interface -- see [`Queue`]); what belongs here is
//! the cluster-management engineering around it: connection-pool fan-out,
//! round-robin load balancing, and pool *pinning* so a fetch/ack pair
//! traverses the same broker node.

mod cluster;
mod mock;

pub use cluster::{Pinned, QueueCluster};
pub use mock::InMemoryQueue;

use async_trait::async_trait;

use crate::{config::OpConfig, error::QueueError};

/// A single broker node's worth of connectivity. Implementors own whatever
/// pooling/transport is appropriate for their broker; this crate never
/// speaks a wire protocol itself.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
	/// Adds `payload` to `queue_name`, returning the broker-assigned id.
	async fn add(&self, queue_name: &str, payload: Vec<u8>, opts: &OpConfig) -> Result<String, QueueError>;
	/// Fetches full details for a previously-added job by id.
	async fn get(&self, id: &str) -> Result<(String, Vec<u8>), QueueError>;
	/// Acknowledges successful processing; the broker may discard the job.
	async fn ack(&self, id: &str) -> Result<(), QueueError>;
	/// Explicitly requeues a job for redelivery.
	async fn nack(&self, id: &str) -> Result<(), QueueError>;
	/// Fetches the next available job from `queue_name`, or
	/// `QueueError::Empty` if none is available right now. Callers (the
	/// cluster) apply the mandatory 2s bound around this; implementations
	/// need not impose their own.
	async fn fetch(&self, queue_name: &str, opts: &OpConfig) -> Result<(String, String, Vec<u8>), QueueError>;
	/// Releases any pooled connections. A no-op for fakes that hold none.
	async fn close(&self) {}
}
