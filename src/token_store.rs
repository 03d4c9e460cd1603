//! Per-user token cache persistence.
//!
//! A token-cache component is typically rebuilt for every request. [`UserTokenCache`] gives it
//! cross-request memory: it reloads the user's serialized cache from a shared
//! [`SessionTokenStore`] right before the component reads its state, and writes the state back
//! right after an access that changed it. The store only ever sees opaque bytes.
//!
//! Entries are never evicted; the store grows with the number of distinct users for the life of
//! the process.

// std
use std::{collections::HashMap, fmt::Debug, ops::Deref};
// crates.io
use tokio::sync::RwLock;
// self
use crate::_prelude::*;

const CACHE_KEY_SUFFIX: &str = "_TokenCache";

/// Serialized token cache for one user.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenCacheBlob(Arc<[u8]>);
impl TokenCacheBlob {
	/// Raw serialized bytes.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}
impl Debug for TokenCacheBlob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "TokenCacheBlob({} bytes)", self.0.len())
	}
}
impl Deref for TokenCacheBlob {
	type Target = [u8];

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl From<Vec<u8>> for TokenCacheBlob {
	fn from(bytes: Vec<u8>) -> Self {
		Self(bytes.into())
	}
}
impl From<&[u8]> for TokenCacheBlob {
	fn from(bytes: &[u8]) -> Self {
		Self(bytes.into())
	}
}

/// Keyed store of serialized token caches shared by every request in the process.
///
/// Any number of loads proceed together; a persist excludes all loads and persists while it
/// writes. Clones share the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct SessionTokenStore {
	inner: Arc<RwLock<HashMap<String, TokenCacheBlob>>>,
}
impl SessionTokenStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Storage key for a user's token cache.
	pub fn cache_key(user_id: &str) -> String {
		format!("{user_id}{CACHE_KEY_SUFFIX}")
	}

	/// Stored blob for `user_id`, or `None` when nothing was persisted yet.
	pub async fn load(&self, user_id: &str) -> Option<TokenCacheBlob> {
		let key = Self::cache_key(user_id);

		self.inner.read().await.get(&key).cloned()
	}

	/// Overwrite the stored blob for `user_id`.
	pub async fn persist(&self, user_id: &str, blob: impl Into<TokenCacheBlob>) {
		let key = Self::cache_key(user_id);
		let blob = blob.into();

		tracing::trace!(%key, bytes = blob.len(), "persisting token cache");

		self.inner.write().await.insert(key, blob);
	}

	/// Drop the stored blob for `user_id`, e.g. on sign-out.
	pub async fn remove(&self, user_id: &str) -> Option<TokenCacheBlob> {
		let key = Self::cache_key(user_id);

		self.inner.write().await.remove(&key)
	}

	/// Number of users with a stored cache.
	pub async fn len(&self) -> usize {
		self.inner.read().await.len()
	}

	/// Whether no user has a stored cache.
	pub async fn is_empty(&self) -> bool {
		self.inner.read().await.is_empty()
	}
}

/// Token-cache component whose in-memory state can be exported and restored.
pub trait TokenCacheSerializer {
	/// Export the current state.
	fn serialize(&self) -> Result<Vec<u8>>;

	/// Replace the current state with a previously exported one.
	fn deserialize(&mut self, blob: &[u8]) -> Result<()>;
}

/// Load/persist hooks binding one user's token cache to a [`SessionTokenStore`].
#[derive(Clone, Debug)]
pub struct UserTokenCache {
	store: SessionTokenStore,
	user_id: Arc<str>,
}
impl UserTokenCache {
	/// Bind `user_id` (the subject identifier, not the object identifier) to `store`.
	pub fn new(store: SessionTokenStore, user_id: impl Into<Arc<str>>) -> Self {
		Self { store, user_id: user_id.into() }
	}

	/// User whose cache this binding persists.
	pub fn user_id(&self) -> &str {
		&self.user_id
	}

	/// Reload the stored state into `cache` before the component reads it.
	///
	/// When nothing was persisted yet the cache is left as is.
	pub async fn before_access<C>(&self, cache: &mut C) -> Result<()>
	where
		C: TokenCacheSerializer,
	{
		if let Some(blob) = self.store.load(&self.user_id).await {
			cache.deserialize(blob.as_bytes())?;
		}

		Ok(())
	}

	/// Write the component's state back after an access, but only if the access changed it.
	pub async fn after_access<C>(&self, cache: &C, has_state_changed: bool) -> Result<()>
	where
		C: TokenCacheSerializer,
	{
		if !has_state_changed {
			return Ok(());
		}

		let blob = cache.serialize()?;

		self.store.persist(&self.user_id, blob).await;

		Ok(())
	}
}
