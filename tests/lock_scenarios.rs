mod support;

use std::time::Duration;

#[async_std::test]
async fn mutual_exclusion_duo() {
	let _guard = support::TracingGuard::install();
	let manager = support::lock_manager(3);

	let first = manager.acquire("duo", Duration::from_secs(2)).await.unwrap();
	let second = manager.acquire("duo", Duration::from_millis(50)).await;
	assert!(second.is_err(), "a second acquirer must not see the same resource as free");

	first.release().await.unwrap();
	let third = manager.acquire("duo", Duration::from_secs(2)).await.unwrap();
	third.release().await.unwrap();
}

#[async_std::test]
async fn lock_expires_and_becomes_acquirable_without_release() {
	let _guard = support::TracingGuard::install();
	let manager = support::lock_manager(3);

	let lock = manager.acquire("expiring", Duration::from_millis(80)).await.unwrap();
	// deliberately never released -- simulates a holder that crashed.
	std::mem::forget(lock);

	async_std::task::sleep(Duration::from_millis(150)).await;
	let reacquired = manager.acquire("expiring", Duration::from_secs(1)).await.unwrap();
	reacquired.release().await.unwrap();
}

#[async_std::test]
async fn auto_renew_keeps_a_lock_alive_past_its_original_ttl() {
	let _guard = support::TracingGuard::install();
	let manager = support::lock_manager(3);

	let lock = manager.acquire("renewed", Duration::from_millis(100)).await.unwrap();
	lock.start_auto_renew().await.unwrap();

	async_std::task::sleep(Duration::from_millis(350)).await;
	let competitor = manager.acquire("renewed", Duration::from_millis(50)).await;
	assert!(competitor.is_err(), "auto-renew should have kept the lease well past the original 100ms ttl");

	let lost = lock.lost();
	assert!(lost.try_recv().is_err(), "no extend round should have failed while the kv cluster is healthy");

	lock.release().await.unwrap();
}

#[async_std::test]
async fn auto_renew_reports_loss_once_the_key_is_stolen_out_from_under_it() {
	let _guard = support::TracingGuard::install();
	let manager = support::lock_manager(1);
	let lock = manager.acquire("stealable", Duration::from_millis(100)).await.unwrap();
	lock.start_auto_renew().await.unwrap();

	let key = latchqueue::RuntimeConfig::default().lock_key("stealable");
	manager.cluster().nodes()[0].force_delete(&key);

	let lost = lock.lost();
	async_std::future::timeout(Duration::from_secs(2), lost.recv_async())
		.await
		.expect("auto-renew should have noticed the missing key within one renew interval")
		.expect("the lost channel should fire, not close, on loss");
}
