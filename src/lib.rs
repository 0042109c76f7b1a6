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

//! Distributed job-processing middleware: at-least-once delivery from a
//! pluggable broker (see [`queue::Queue`]) plus Redlock-style mutual
//! exclusion over a pluggable key-value fleet (see [`kv::KvNode`]), combined
//! by the [`consumer::Consumer`] runtime into effectively at-most-once
//! processing per successfully acknowledged job.

pub mod config;
pub mod consumer;
pub mod error;
pub mod job;
pub mod kv;
pub mod lock;
pub mod producer;
pub mod queue;

pub use config::{HostDescriptor, KvClusterConfig, OpConfig, QueueClusterConfig, RuntimeConfig};
pub use consumer::{Consumer, ProcessError, Processor};
pub use error::{ConsumerError, Error, JobError, KvError, LockError, QueueError, Result};
pub use job::Job;
pub use kv::{InMemoryKvNode, KvCluster, KvNode, RedisKvNode};
pub use lock::{Lock, LockManager};
pub use producer::{GetJobError, Producer};
pub use queue::{InMemoryQueue, Queue, QueueCluster};
