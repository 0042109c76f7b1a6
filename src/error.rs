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

use thiserror::Error;

/// Errors surfaced by the Redlock-style distributed lock.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
	/// Quorum was never reached (or the validity window was already negative)
	/// across `Attempts` rounds.
	#[error("failed to acquire lock after max attempts")]
	FailedAfterMaxAttempts,
	/// `extend()` did not reach quorum.
	#[error("failed to extend lock")]
	ExtensionFailed,
	/// `release()`/`extend()` called on a `Lock` that was never acquired.
	#[error("lock is empty (never acquired)")]
	EmptyLock,
	/// Manual `extend()` called while auto-renew is running.
	#[error("cannot manually extend a lock while auto-renew is active")]
	ExtendWhileAutoRenew,
	/// Auto-renew failed to extend the lease in time; exclusivity can no
	/// longer be guaranteed. The holder must stop touching shared state.
	#[error("lock lost: auto-renew failed to extend the lease")]
	Lost,
}

/// Errors around job envelope encode/decode.
#[derive(Debug, Error)]
pub enum JobError {
	/// The broker payload was not a parseable job envelope. Always job-fatal:
	/// the consumer nacks and logs, it never panics or silently drops it.
	#[error("malformed job envelope: {0}")]
	Malformed(#[from] serde_json::Error),
}

/// Errors from a single queue-cluster operation.
#[derive(Debug, Error)]
pub enum QueueError {
	/// Transport/connection error talking to a specific broker node.
	#[error("queue transport error: {0}")]
	Transport(String),
	/// The broker's "no data available" sentinel. Not a fault; squelched by
	/// the consumer loop.
	#[error("no data available")]
	Empty,
	/// The mandatory 2s `fetch` bound elapsed.
	#[error("timed out waiting for a job")]
	Timeout,
}

/// Errors from a single KV-cluster operation.
#[derive(Debug, Error)]
pub enum KvError {
	/// Transport/connection error talking to a specific KV node.
	#[error("kv transport error: {0}")]
	Transport(String),
}

/// Consumer-fatal errors: surfaced directly to the caller of `Consumer::new`.
#[derive(Debug, Error)]
pub enum ConsumerError {
	#[error("invalid configuration: {0}")]
	Config(String),
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error(transparent)]
	Kv(#[from] KvError),
}

/// Top level error type aggregating every other error enum in the crate.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Lock(#[from] LockError),
	#[error(transparent)]
	Job(#[from] JobError),
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error(transparent)]
	Kv(#[from] KvError),
	#[error(transparent)]
	Consumer(#[from] ConsumerError),
	#[error("{0}")]
	Msg(String),
}

impl From<String> for Error {
	fn from(err: String) -> Error {
		Error::Msg(err)
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
