//! Per-policy cache state and refresh bookkeeping.

// self
use crate::{_prelude::*, config::document::ProviderConfiguration};

/// Whether a policy's configuration has ever been fetched.
#[derive(Clone, Debug, Default)]
pub enum PolicyConfig {
	/// No fetch has succeeded yet.
	#[default]
	Unfetched,
	/// Last successfully fetched configuration.
	Fetched(Arc<ProviderConfiguration>),
}
impl PolicyConfig {
	/// Retrieve the configuration if one has been fetched.
	pub fn configuration(&self) -> Option<&Arc<ProviderConfiguration>> {
		match self {
			Self::Fetched(configuration) => Some(configuration),
			Self::Unfetched => None,
		}
	}
}

/// Refresh timing for one policy.
#[derive(Clone, Debug, Default)]
pub struct RefreshState {
	/// Monotonic time of the last successful fetch.
	pub last_refresh: Option<Instant>,
	/// Wall-clock time of the last successful fetch.
	pub last_refresh_at: Option<DateTime<Utc>>,
	/// Time after which the next access must attempt a refresh; absent means immediately.
	pub sync_after: Option<Instant>,
	/// Count of consecutive refresh failures.
	pub error_count: u32,
	/// Message of the most recent refresh failure.
	pub last_error: Option<String>,
}
impl RefreshState {
	/// Whether a refresh is due at `now`.
	pub fn is_due(&self, now: Instant) -> bool {
		self.sync_after.is_none_or(|sync_after| sync_after <= now)
	}

	/// Record a successful fetch and schedule the next automatic refresh.
	pub fn record_success(&mut self, now: Instant, automatic_refresh_interval: Duration) {
		self.last_refresh = Some(now);
		self.last_refresh_at = Some(Utc::now());
		self.sync_after = Some(now + automatic_refresh_interval);
		self.error_count = 0;
		self.last_error = None;
	}

	/// Record a failed fetch and schedule the retry.
	pub fn record_failure(&mut self, now: Instant, backoff: Duration, error: &Error) {
		self.sync_after = Some(now + backoff);
		self.error_count = self.error_count.saturating_add(1);
		self.last_error = Some(error.to_string());
	}

	/// Whether a caller may force a refresh, given the minimum spacing since the last fetch.
	pub fn can_request_refresh(&self, now: Instant, refresh_interval: Duration) -> bool {
		self.last_refresh.is_none_or(|last| now >= last + refresh_interval)
	}

	/// Force the next access to refresh.
	pub fn force_due(&mut self, now: Instant) {
		self.sync_after = Some(now);
	}
}

/// Cached configuration and bookkeeping for one policy.
#[derive(Clone, Debug)]
pub struct PolicyEntry {
	policy: Arc<str>,
	config: PolicyConfig,
	refresh: RefreshState,
}
impl PolicyEntry {
	/// Create an entry that has never been fetched.
	pub fn new(policy: impl Into<Arc<str>>) -> Self {
		Self { policy: policy.into(), config: PolicyConfig::Unfetched, refresh: RefreshState::default() }
	}

	/// Policy identifier for this entry.
	pub fn policy(&self) -> &str {
		&self.policy
	}

	/// Cached configuration state.
	pub fn config(&self) -> &PolicyConfig {
		&self.config
	}

	/// Refresh bookkeeping.
	pub fn refresh(&self) -> &RefreshState {
		&self.refresh
	}

	/// Cached configuration when present and not yet due for refresh.
	pub fn fresh(&self, now: Instant) -> Option<Arc<ProviderConfiguration>> {
		if self.refresh.is_due(now) {
			return None;
		}

		self.config.configuration().cloned()
	}

	/// Cached configuration regardless of freshness.
	pub fn current(&self) -> Option<Arc<ProviderConfiguration>> {
		self.config.configuration().cloned()
	}

	/// Store a newly fetched configuration.
	pub fn fetch_success(
		&mut self,
		configuration: Arc<ProviderConfiguration>,
		now: Instant,
		automatic_refresh_interval: Duration,
	) {
		self.config = PolicyConfig::Fetched(configuration);
		self.refresh.record_success(now, automatic_refresh_interval);
	}

	/// Record a failed fetch without touching the cached configuration.
	pub fn fetch_failure(&mut self, now: Instant, backoff: Duration, error: &Error) {
		self.refresh.record_failure(now, backoff, error);
	}

	/// Force a refresh on next access when the spacing rule allows it.
	///
	/// Returns whether the refresh was scheduled.
	pub fn request_refresh(&mut self, now: Instant, refresh_interval: Duration) -> bool {
		if self.refresh.can_request_refresh(now, refresh_interval) {
			self.refresh.force_due(now);

			true
		} else {
			false
		}
	}
}
