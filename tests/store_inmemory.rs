// std
use std::sync::Arc;
// crates.io
use time::macros;
// self
use atlassian_token_broker::{
	auth::{CacheKey, RefreshTokenPayload, TokenSecret},
	store::{MemoryStore, RefreshTokenStore, SaveOutcome},
};

fn key(user: &str, site: &str) -> CacheKey {
	CacheKey::parse(user, site).expect("Failed to build cache key for memory store tests.")
}

fn payload(refresh: &str) -> RefreshTokenPayload {
	RefreshTokenPayload::new(
		"access",
		refresh,
		3600,
		Some("read:jira-work".into()),
		macros::datetime!(2025-11-10 12:00 UTC),
	)
}

#[tokio::test]
async fn save_requires_matching_refresh_token() {
	let store = MemoryStore::default();
	let key = key("user-1", "site-1");

	assert_eq!(
		store.save(&key, "refresh-1", payload("refresh-2")).await.expect("Save should not fail."),
		SaveOutcome::Conflict,
		"Saving over a missing record must conflict."
	);

	store.put(&key, payload("refresh-1")).await.expect("Put should succeed.");

	assert_eq!(
		store.save(&key, "stale", payload("refresh-2")).await.expect("Save should not fail."),
		SaveOutcome::Conflict
	);
	assert_eq!(
		store.save(&key, "refresh-1", payload("refresh-2")).await.expect("Save should not fail."),
		SaveOutcome::Updated
	);

	let stored = store.load(&key).await.expect("Load should succeed.").expect("Payload present.");

	assert_eq!(stored.refresh_token, TokenSecret::new("refresh-2"));
	assert_eq!(stored.rotation_counter, 1);
}

#[tokio::test]
async fn keys_with_and_without_site_are_distinct() {
	let store = MemoryStore::default();

	store.put(&key("user-1", ""), payload("refresh-none")).await.expect("Put should succeed.");
	store
		.put(&key("user-1", "site-1"), payload("refresh-site"))
		.await
		.expect("Put should succeed.");

	assert_eq!(store.len(), 2);

	let removed =
		store.remove(&key("user-1", "")).await.expect("Remove should succeed.").expect("Removed.");

	assert_eq!(removed.refresh_token.expose(), "refresh-none");
	assert_eq!(store.len(), 1);
	assert!(store.load(&key("user-1", "")).await.expect("Load should succeed.").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_with_same_expectation_update_once() {
	let store = Arc::new(MemoryStore::default());
	let key = key("user-race", "site-1");

	store.put(&key, payload("refresh-0")).await.expect("Put should succeed.");

	let tasks = (0..16)
		.map(|i| {
			let store = store.clone();
			let key = key.clone();

			tokio::spawn(async move {
				store.save(&key, "refresh-0", payload(&format!("refresh-{}", i + 1))).await
			})
		})
		.collect::<Vec<_>>();
	let mut updated = 0;

	for task in tasks {
		let outcome =
			task.await.expect("Save task should not panic.").expect("Save should not fail.");

		if outcome == SaveOutcome::Updated {
			updated += 1;
		}
	}

	assert_eq!(updated, 1, "Exactly one writer may win the compare-and-swap.");

	let stored = store.load(&key).await.expect("Load should succeed.").expect("Payload present.");

	assert_eq!(stored.rotation_counter, 1);
	assert_ne!(stored.refresh_token.expose(), "refresh-0");
}
