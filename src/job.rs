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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
	config::OpConfig,
	error::{JobError, QueueError},
	queue::{Queue, QueueCluster},
};

/// A job as understood by this crate: the broker-assigned identity plus the
/// envelope fields we control.
#[derive(Debug, Clone)]
pub struct Job {
	pub id: String,
	pub queue_name: String,
	pub body: String,
	pub eta: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	/// The broker-native payload this job was decoded from, if any.
	pub raw: Option<Vec<u8>>,
}

/// The wire shape stored as the broker's opaque payload. Forward
/// compatible: unknown keys are ignored on decode.
#[derive(Debug, Serialize, Deserialize)]
struct JobData {
	#[serde(rename = "Body")]
	body: String,
	#[serde(rename = "ETA")]
	eta: DateTime<Utc>,
	#[serde(rename = "CreatedAt")]
	created_at: DateTime<Utc>,
	#[serde(rename = "UpdatedAt")]
	updated_at: DateTime<Utc>,
}

/// Adds a job to the queue cluster, computing `delay = max(0, eta - now)`
/// and stamping `created_at`/`updated_at` to `now`.
pub async fn add<Q: Queue>(
	cluster: &QueueCluster<Q>,
	queue_name: &str,
	body: &str,
	eta: DateTime<Utc>,
	op_cfg: Option<OpConfig>,
) -> Result<Job, QueueError> {
	let now = Utc::now();
	let mut op_cfg = op_cfg.unwrap_or_default();
	let delay = eta.signed_duration_since(now);
	if delay.num_milliseconds() > 0 {
		op_cfg.delay = Some(delay.to_std().expect("positive chrono::Duration always converts"));
	}
	let data =
		JobData { body: body.to_string(), eta, created_at: now, updated_at: now };
	let payload = serde_json::to_vec(&data).expect("JobData always serializes");
	let id = cluster.add(queue_name, payload, &op_cfg).await?;
	Ok(Job {
		id,
		queue_name: queue_name.to_string(),
		body: body.to_string(),
		eta,
		created_at: now,
		updated_at: now,
		raw: None,
	})
}

/// Reconstructs a `Job` from the broker's raw details. A parse failure is
/// always job-fatal: callers must nack the job and log, never silently
/// drop it or panic (this is an open question in the distilled spec that
/// earlier iterations resolved inconsistently; we resolve it uniformly).
pub fn from_details(id: &str, queue_name: &str, raw: &[u8]) -> Result<Job, JobError> {
	let data: JobData = serde_json::from_slice(raw)?;
	Ok(Job {
		id: id.to_string(),
		queue_name: queue_name.to_string(),
		body: data.body,
		eta: data.eta,
		created_at: data.created_at,
		updated_at: data.updated_at,
		raw: Some(raw.to_vec()),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::queue::InMemoryQueue;
	use chrono::Duration as ChronoDuration;

	fn cluster() -> QueueCluster<InMemoryQueue> {
		QueueCluster::new(vec![InMemoryQueue::new(), InMemoryQueue::new(), InMemoryQueue::new()])
	}

	#[async_std::test]
	async fn add_then_fetch_round_trips_body_and_eta() {
		let cluster = cluster();
		let eta = Utc::now() + ChronoDuration::seconds(10);
		let job = add(&cluster, "q", "job1", eta, None).await.unwrap();
		assert_eq!(job.body, "job1");
		assert!((job.eta - eta).num_milliseconds().abs() < 1);
		assert!(!job.id.is_empty());
	}

	#[test]
	fn from_details_rejects_garbage() {
		let err = from_details("id", "q", b"not json").unwrap_err();
		assert!(matches!(err, JobError::Malformed(_)));
	}

	#[test]
	fn from_details_round_trips_known_shape() {
		let now = Utc::now();
		let data = JobData { body: "hello".into(), eta: now, created_at: now, updated_at: now };
		let raw = serde_json::to_vec(&data).unwrap();
		let job = from_details("abc", "q", &raw).unwrap();
		assert_eq!(job.body, "hello");
		assert_eq!(job.id, "abc");
	}
}
