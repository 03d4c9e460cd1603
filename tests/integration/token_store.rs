//! Token cache hooks shared across simulated requests.

// std
use std::collections::BTreeMap;
// crates.io
use policy_oidc_cache::{Result, SessionTokenStore, TokenCacheSerializer, UserTokenCache};

#[derive(Debug, Default)]
struct AccountCache {
	accounts: BTreeMap<String, String>,
	changed: bool,
}
impl AccountCache {
	fn add(&mut self, scope: &str, token: &str) {
		self.accounts.insert(scope.into(), token.into());
		self.changed = true;
	}
}
impl TokenCacheSerializer for AccountCache {
	fn serialize(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(&self.accounts)?)
	}

	fn deserialize(&mut self, blob: &[u8]) -> Result<()> {
		self.accounts = serde_json::from_slice(blob)?;
		self.changed = false;

		Ok(())
	}
}

async fn request(
	store: &SessionTokenStore,
	user_id: &str,
	acquire: Option<(&str, &str)>,
) -> Result<AccountCache> {
	let hooks = UserTokenCache::new(store.clone(), user_id);
	let mut cache = AccountCache::default();

	hooks.before_access(&mut cache).await?;

	if let Some((scope, token)) = acquire {
		cache.add(scope, token);
	}

	hooks.after_access(&cache, cache.changed).await?;

	Ok(cache)
}

#[tokio::test]
async fn tokens_survive_across_requests_per_user() -> Result<()> {
	let store = SessionTokenStore::new();

	request(&store, "alice-sub", Some(("api.read", "token-a"))).await?;
	request(&store, "bob-sub", Some(("api.write", "token-b"))).await?;

	let alice = request(&store, "alice-sub", None).await?;
	let bob = request(&store, "bob-sub", None).await?;

	assert_eq!(alice.accounts.get("api.read").map(String::as_str), Some("token-a"));
	assert!(!alice.accounts.contains_key("api.write"));
	assert_eq!(bob.accounts.get("api.write").map(String::as_str), Some("token-b"));
	assert_eq!(store.len().await, 2);

	Ok(())
}

#[tokio::test]
async fn parallel_requests_for_one_user_complete() -> Result<()> {
	let store = SessionTokenStore::new();

	request(&store, "alice-sub", Some(("api.read", "token-a"))).await?;

	let handles: Vec<_> = (0..50)
		.map(|i| {
			let store = store.clone();

			tokio::spawn(async move {
				let acquire = (i % 10 == 0).then_some(("api.read", "token-a"));

				request(&store, "alice-sub", acquire).await
			})
		})
		.collect();

	for handle in handles {
		let cache = handle.await.expect("join")?;

		assert_eq!(cache.accounts.get("api.read").map(String::as_str), Some("token-a"));
	}

	Ok(())
}
