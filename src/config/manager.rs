//! Policy configuration manager handling metadata retrieval and refresh timing.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	config::{
		document::{ProviderConfiguration, retrieve_configuration},
		state::{PolicyConfig, PolicyEntry},
		union::union_of,
	},
	http::client::{DocumentRetriever, HttpDocumentRetriever},
	metrics::{self, PolicyMetrics, PolicyMetricsSnapshot},
	options::ManagerOptions,
};

/// Resolves provider configuration for a fixed set of policies.
///
/// Cached configurations are served without locking beyond a per-policy read lock while they
/// are fresh. Every refresh, whatever its policy, runs behind one single-flight lock so at most
/// one metadata fetch per manager is in flight.
#[derive(Clone, Debug)]
pub struct PolicyConfigurationManager {
	options: Arc<ManagerOptions>,
	retriever: Arc<dyn DocumentRetriever>,
	slots: Arc<[PolicySlot]>,
	index: Arc<HashMap<Arc<str>, usize>>,
	single_flight: Arc<Mutex<()>>,
}
impl PolicyConfigurationManager {
	/// Build a manager that retrieves metadata over HTTPS with the default client.
	pub fn new(options: ManagerOptions) -> Result<Self> {
		options.validate()?;

		let retriever = HttpDocumentRetriever::new(&options)?;

		Self::with_parts(options, Arc::new(retriever))
	}

	/// Build a manager using the supplied document retriever.
	pub fn with_retriever(
		options: ManagerOptions,
		retriever: Arc<dyn DocumentRetriever>,
	) -> Result<Self> {
		options.validate()?;

		Self::with_parts(options, retriever)
	}

	fn with_parts(
		mut options: ManagerOptions,
		retriever: Arc<dyn DocumentRetriever>,
	) -> Result<Self> {
		options.normalize_allowed_domains();

		let mut slots = Vec::with_capacity(options.policies.len());
		let mut index = HashMap::with_capacity(options.policies.len());

		for (position, policy) in options.policies.iter().enumerate() {
			let policy: Arc<str> = Arc::from(policy.as_str());

			slots.push(PolicySlot {
				url: options.policy_metadata_url(&policy)?,
				entry: RwLock::new(PolicyEntry::new(policy.clone())),
				metrics: PolicyMetrics::new(),
				policy: policy.clone(),
			});
			index.insert(policy, position);
		}

		tracing::debug!(
			metadata_address = %options.metadata_address,
			policies = slots.len(),
			"policy configuration manager constructed"
		);

		Ok(Self {
			options: Arc::new(options),
			retriever,
			slots: slots.into(),
			index: Arc::new(index),
			single_flight: Arc::new(Mutex::new(())),
		})
	}

	/// Options the manager was constructed with.
	pub fn options(&self) -> &ManagerOptions {
		&self.options
	}

	/// Managed policy identifiers in construction order.
	pub fn policies(&self) -> impl Iterator<Item = &str> {
		self.slots.iter().map(|slot| slot.policy.as_ref())
	}

	/// Resolve the configuration for one policy, refreshing it when due.
	///
	/// A failed refresh keeps serving the previous configuration and retries after the shorter
	/// of the two refresh intervals. Only a policy that has never been fetched successfully
	/// surfaces [`Error::Retrieval`].
	#[tracing::instrument(skip(self, policy, cancel), fields(policy = %policy))]
	pub async fn configuration(
		&self,
		policy: &str,
		cancel: &CancellationToken,
	) -> Result<Arc<ProviderConfiguration>> {
		let slot = self.slot(policy)?;

		if let Some(configuration) = slot.entry.read().await.fresh(Instant::now()) {
			self.observe_hit(slot, false);

			return Ok(configuration);
		}

		let _guard = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			guard = self.single_flight.lock() => guard,
		};
		let now = Instant::now();
		let (current, due) = {
			let entry = slot.entry.read().await;

			(entry.current(), entry.refresh().is_due(now))
		};

		if !due {
			return match current {
				Some(configuration) => {
					self.observe_hit(slot, false);

					Ok(configuration)
				},
				None => Err(self.backoff_error(slot).await),
			};
		}

		tracing::debug!(url = %slot.url, "refreshing policy configuration");

		let started = Instant::now();
		let fetched = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			fetched = retrieve_configuration(self.retriever.as_ref(), &slot.url) => fetched,
		};

		match fetched {
			Ok(configuration) => {
				let configuration = Arc::new(configuration);

				slot.entry.write().await.fetch_success(
					configuration.clone(),
					now,
					self.options.automatic_refresh_interval,
				);
				self.observe_miss(slot);
				self.observe_refresh_success(slot, started.elapsed());

				Ok(configuration)
			},
			Err(err) => {
				let backoff = self.options.failure_backoff();

				slot.entry.write().await.fetch_failure(now, backoff, &err);
				self.observe_refresh_error(slot);

				match current {
					Some(configuration) => {
						tracing::warn!(
							error = %err,
							retry_in = ?backoff,
							"refresh failed, serving previous configuration"
						);

						self.observe_hit(slot, true);

						Ok(configuration)
					},
					None => {
						tracing::warn!(error = %err, retry_in = ?backoff, "initial retrieval failed");

						Err(Error::Retrieval {
							metadata_address: self.options.metadata_address.clone(),
							source: Box::new(err),
						})
					},
				}
			},
		}
	}

	/// Resolve every policy in construction order and fold them into one configuration.
	///
	/// Signing keys from all policies are collected; scalar endpoints come from whichever
	/// policy was folded last.
	#[tracing::instrument(skip(self, cancel))]
	pub async fn union_configuration(
		&self,
		cancel: &CancellationToken,
	) -> Result<ProviderConfiguration> {
		let mut configurations = Vec::with_capacity(self.slots.len());

		for slot in self.slots.iter() {
			configurations.push(self.configuration(&slot.policy, cancel).await?);
		}

		Ok(union_of(configurations.iter().map(Arc::as_ref)))
	}

	/// Authorization endpoint for sign-in redirects under `policy`.
	pub async fn authorization_endpoint(
		&self,
		policy: &str,
		cancel: &CancellationToken,
	) -> Result<String> {
		self.configuration(policy, cancel).await?.authorization_endpoint.clone().ok_or_else(|| {
			Error::Validation {
				field: "authorization_endpoint",
				reason: format!("Policy '{policy}' does not advertise an authorization endpoint."),
			}
		})
	}

	/// End-session endpoint for logout redirects under `policy`.
	pub async fn end_session_endpoint(
		&self,
		policy: &str,
		cancel: &CancellationToken,
	) -> Result<String> {
		self.configuration(policy, cancel).await?.end_session_endpoint.clone().ok_or_else(|| {
			Error::Validation {
				field: "end_session_endpoint",
				reason: format!("Policy '{policy}' does not advertise an end-session endpoint."),
			}
		})
	}

	/// Make the next lookup for `policy` refresh, unless it was fetched within the refresh
	/// interval.
	///
	/// Returns whether a refresh was scheduled.
	#[tracing::instrument(skip(self, policy), fields(policy = %policy))]
	pub async fn request_refresh(&self, policy: &str) -> Result<bool> {
		let slot = self.slot(policy)?;
		let scheduled =
			slot.entry.write().await.request_refresh(Instant::now(), self.options.refresh_interval);

		tracing::debug!(scheduled, "refresh requested");

		Ok(scheduled)
	}

	/// Apply [`request_refresh`](Self::request_refresh) to every policy.
	///
	/// Returns how many policies were scheduled.
	pub async fn request_refresh_all(&self) -> usize {
		let mut scheduled = 0;

		for slot in self.slots.iter() {
			let now = Instant::now();

			if slot.entry.write().await.request_refresh(now, self.options.refresh_interval) {
				scheduled += 1;
			}
		}

		tracing::debug!(scheduled, "refresh requested for all policies");

		scheduled
	}

	/// Status for every policy in construction order.
	pub async fn status(&self) -> Vec<PolicyStatus> {
		let captured_at = Instant::now();
		let captured_at_wallclock = Utc::now();
		let mut statuses = Vec::with_capacity(self.slots.len());

		for slot in self.slots.iter() {
			let entry = slot.entry.read().await.clone();

			statuses.push(PolicyStatus::from_components(
				&entry,
				slot.metrics.snapshot(),
				captured_at,
				captured_at_wallclock,
			));
		}

		statuses
	}

	fn slot(&self, policy: &str) -> Result<&PolicySlot> {
		self.index
			.get(policy)
			.map(|position| &self.slots[*position])
			.ok_or_else(|| Error::UnknownPolicy { policy: policy.to_owned() })
	}

	async fn backoff_error(&self, slot: &PolicySlot) -> Error {
		let last_error = slot.entry.read().await.refresh().last_error.clone();
		let reason = match last_error {
			Some(last_error) => format!(
				"Policy '{}' is waiting to retry after a failed retrieval: {last_error}",
				slot.policy
			),
			None => format!("Policy '{}' has no configuration available.", slot.policy),
		};

		Error::Retrieval {
			metadata_address: self.options.metadata_address.clone(),
			source: Box::new(Error::Cache(reason)),
		}
	}

	fn observe_hit(&self, slot: &PolicySlot, stale: bool) {
		metrics::record_resolve_hit(&slot.policy, stale);

		slot.metrics.record_hit(stale);
	}

	fn observe_miss(&self, slot: &PolicySlot) {
		metrics::record_resolve_miss(&slot.policy);

		slot.metrics.record_miss();
	}

	fn observe_refresh_success(&self, slot: &PolicySlot, duration: Duration) {
		metrics::record_refresh_success(&slot.policy, duration);

		slot.metrics.record_refresh_success(duration);
	}

	fn observe_refresh_error(&self, slot: &PolicySlot) {
		metrics::record_refresh_error(&slot.policy);

		slot.metrics.record_refresh_error();
	}
}

/// Public representation of a policy's cache state.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PolicyState {
	/// No configuration has been fetched yet.
	Empty,
	/// The last refresh succeeded.
	Ready,
	/// The last refresh failed and the previous configuration is being served.
	Stale,
}

/// Status projection for one policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyStatus {
	/// Policy identifier.
	pub policy: String,
	/// Cache state.
	pub state: PolicyState,
	/// Timestamp of the most recent successful refresh.
	pub last_refresh: Option<DateTime<Utc>>,
	/// Earliest time the next lookup will attempt a refresh.
	pub next_refresh: Option<DateTime<Utc>>,
	/// Consecutive refresh failures.
	pub error_count: u32,
	/// Message of the most recent refresh failure.
	pub last_error: Option<String>,
	/// Ratio of cache hits to total lookups.
	pub hit_rate: f64,
	/// Ratio of lookups served a previous configuration after a failure.
	pub stale_serve_ratio: f64,
}
impl PolicyStatus {
	fn from_components(
		entry: &PolicyEntry,
		metrics: PolicyMetricsSnapshot,
		captured_at: Instant,
		captured_at_wallclock: DateTime<Utc>,
	) -> Self {
		let refresh = entry.refresh();
		let state = match entry.config() {
			PolicyConfig::Unfetched => PolicyState::Empty,
			PolicyConfig::Fetched(_) if refresh.error_count > 0 => PolicyState::Stale,
			PolicyConfig::Fetched(_) => PolicyState::Ready,
		};
		let next_refresh = match refresh.sync_after {
			Some(sync_after) => to_datetime(captured_at, captured_at_wallclock, sync_after),
			None => Some(captured_at_wallclock),
		};

		Self {
			policy: entry.policy().to_owned(),
			state,
			last_refresh: refresh.last_refresh_at,
			next_refresh,
			error_count: refresh.error_count,
			last_error: refresh.last_error.clone(),
			hit_rate: metrics.hit_rate(),
			stale_serve_ratio: metrics.stale_ratio(),
		}
	}
}

#[derive(Debug)]
struct PolicySlot {
	policy: Arc<str>,
	url: Url,
	entry: RwLock<PolicyEntry>,
	metrics: Arc<PolicyMetrics>,
}

fn to_datetime(
	captured_at: Instant,
	captured_at_wallclock: DateTime<Utc>,
	instant: Instant,
) -> Option<DateTime<Utc>> {
	if let Some(delta) = instant.checked_duration_since(captured_at) {
		captured_at_wallclock.checked_add_signed(TimeDelta::from_std(delta).ok()?)
	} else {
		let delta = captured_at.checked_duration_since(instant)?;

		captured_at_wallclock.checked_sub_signed(TimeDelta::from_std(delta).ok()?)
	}
}
