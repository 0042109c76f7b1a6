mod support;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use latchqueue::{Consumer, Job, ProcessError, Processor};

struct RecordingProcessor {
	done_tx: flume::Sender<String>,
}

#[async_trait]
impl Processor for RecordingProcessor {
	async fn process(&self, job: &Job) -> Result<(), ProcessError> {
		let _ = self.done_tx.send_async(job.body.clone()).await;
		Ok(())
	}

	fn should_auto_renew(&self, _job: &Job) -> bool {
		false
	}
}

#[async_std::test]
async fn every_enqueued_job_is_delivered_and_processed_exactly_once() {
	let _guard = support::TracingGuard::install();
	const JOB_COUNT: usize = 200;

	let queue_cluster = support::queue_cluster(3);
	let consumer = Consumer::new(queue_cluster, support::lock_manager(3));

	let (done_tx, done_rx) = flume::unbounded();
	consumer.register("work", Arc::new(RecordingProcessor { done_tx })).await;

	for i in 0..JOB_COUNT {
		latchqueue::job::add(consumer.queue_cluster(), "work", &format!("job-{i}"), Utc::now(), None).await.unwrap();
	}

	let consumer = Arc::new(consumer);
	let runner = {
		let consumer = Arc::clone(&consumer);
		async_std::task::spawn(async move { consumer.process("work").await })
	};

	let mut seen = Vec::with_capacity(JOB_COUNT);
	for _ in 0..JOB_COUNT {
		let body = async_std::future::timeout(std::time::Duration::from_secs(10), done_rx.recv_async())
			.await
			.expect("timed out waiting for a job to be processed")
			.unwrap();
		seen.push(body);
	}

	consumer.close().await;
	runner.await;

	seen.sort();
	let mut expected: Vec<String> = (0..JOB_COUNT).map(|i| format!("job-{i}")).collect();
	expected.sort();
	assert_eq!(seen, expected);
}
