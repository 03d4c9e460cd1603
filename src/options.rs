//! Manager options, refresh interval bounds, and B2C tenant settings.
//!
//! [`ManagerOptions`] carries everything the configuration manager needs at construction; the
//! policy set it names is fixed for the manager's lifetime. [`B2cOptions`] mirrors the tenant
//! settings a web front end loads from its configuration file and derives manager options,
//! authority URLs, and per-policy redirect addresses from them.

// std
use std::{
	collections::{HashMap, HashSet},
	mem,
};
// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, security};

/// Default cadence for refreshing a successfully fetched configuration (5 days).
pub const DEFAULT_AUTOMATIC_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 24 * 60 * 60);
/// Default retry cadence after a failed refresh.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Smallest accepted automatic refresh interval.
pub const MIN_AUTOMATIC_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Smallest accepted failure retry interval.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
/// Query parameter carrying the policy identifier on metadata requests.
pub const POLICY_QUERY_PARAMETER: &str = "p";
/// Default size guard (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Default per-request timeout for metadata retrieval.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default B2C instance base URL.
pub const DEFAULT_B2C_INSTANCE: &str = "https://login.microsoftonline.com/tfp";
/// Authentication property naming the policy requested by the web layer.
pub const POLICY_AUTHENTICATION_PROPERTY: &str = "Policy";

/// Construction options for [`PolicyConfigurationManager`](crate::PolicyConfigurationManager).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerOptions {
	/// Discovery document address; the policy is appended as a query parameter.
	pub metadata_address: String,
	/// Fixed set of policy identifiers managed by the instance.
	///
	/// Identifiers must be non-empty, unique, at most 128 characters, and limited to ASCII
	/// letters, digits, `-`, and `_`. B2C policy names such as `B2C_1_SiUpIn` fit these rules.
	pub policies: Vec<String>,
	/// Refresh cadence after a successful fetch.
	#[serde(default = "default_automatic_refresh_interval")]
	pub automatic_refresh_interval: Duration,
	/// Retry cadence after a failed fetch.
	#[serde(default = "default_refresh_interval")]
	pub refresh_interval: Duration,
	/// Whether HTTPS is required for metadata retrieval.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Optional allowlist of hosts permitted to serve metadata.
	#[serde(default, deserialize_with = "crate::security::deserialize_allowed_domains")]
	pub allowed_domains: Vec<String>,
	/// Maximum size allowed for a fetched document in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Timeout applied to each metadata request by the default retriever.
	#[serde(default = "default_request_timeout")]
	pub request_timeout: Duration,
}
impl ManagerOptions {
	/// Construct options with default intervals and transport guards.
	pub fn new<I, S>(metadata_address: impl Into<String>, policies: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			metadata_address: metadata_address.into(),
			policies: policies.into_iter().map(Into::into).collect(),
			automatic_refresh_interval: DEFAULT_AUTOMATIC_REFRESH_INTERVAL,
			refresh_interval: DEFAULT_REFRESH_INTERVAL,
			require_https: true,
			allowed_domains: Vec::new(),
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}

	/// Override the success-case refresh cadence.
	pub fn with_automatic_refresh_interval(mut self, interval: Duration) -> Self {
		self.automatic_refresh_interval = interval;

		self
	}

	/// Override the failure-case retry cadence.
	pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
		self.refresh_interval = interval;

		self
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Replace the host allowlist.
	pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.allowed_domains = domains.into_iter().map(Into::into).collect();
		self.normalize_allowed_domains();

		self
	}

	/// Canonicalise the domain allowlist in-place.
	pub fn normalize_allowed_domains(&mut self) {
		let domains = mem::take(&mut self.allowed_domains);

		self.allowed_domains = security::normalize_allowlist(domains);
	}

	/// Delay before the next attempt after a failed refresh.
	pub fn failure_backoff(&self) -> Duration {
		self.automatic_refresh_interval.min(self.refresh_interval)
	}

	/// Parse the metadata address template.
	pub fn metadata_url(&self) -> Result<Url> {
		if self.metadata_address.trim().is_empty() {
			return Err(Error::Validation {
				field: "metadata_address",
				reason: "Must not be empty.".into(),
			});
		}

		Url::parse(self.metadata_address.trim()).map_err(|err| Error::Validation {
			field: "metadata_address",
			reason: format!("Invalid URL: {err}."),
		})
	}

	/// Build the metadata URL for one policy by appending the policy query parameter.
	pub fn policy_metadata_url(&self, policy: &str) -> Result<Url> {
		let mut url = self.metadata_url()?;

		url.query_pairs_mut().append_pair(POLICY_QUERY_PARAMETER, policy);

		Ok(url)
	}

	/// Validate the options against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		let url = self.metadata_url()?;

		if self.require_https {
			security::enforce_https(&url)?;
		}

		security::enforce_allowed_host(&url, &self.allowed_domains)?;

		if self.automatic_refresh_interval < MIN_AUTOMATIC_REFRESH_INTERVAL {
			return Err(Error::Validation {
				field: "automatic_refresh_interval",
				reason: format!(
					"Must be at least {MIN_AUTOMATIC_REFRESH_INTERVAL:?}, got {:?}.",
					self.automatic_refresh_interval
				),
			});
		}
		if self.refresh_interval < MIN_REFRESH_INTERVAL {
			return Err(Error::Validation {
				field: "refresh_interval",
				reason: format!(
					"Must be at least {MIN_REFRESH_INTERVAL:?}, got {:?}.",
					self.refresh_interval
				),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.request_timeout.is_zero() {
			return Err(Error::Validation {
				field: "request_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		let mut seen = HashSet::with_capacity(self.policies.len());

		for policy in &self.policies {
			validate_policy_id(policy)?;

			if !seen.insert(policy.as_str()) {
				return Err(Error::Validation {
					field: "policies",
					reason: format!("Policy '{policy}' is listed more than once."),
				});
			}
		}

		Ok(())
	}
}

/// Tenant settings for a multi-policy B2C identity provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct B2cOptions {
	/// Application (client) identifier registered with the tenant.
	pub client_id: String,
	/// Instance base URL, e.g. `https://login.microsoftonline.com/tfp`.
	#[serde(default = "default_b2c_instance")]
	pub instance: String,
	/// Tenant name, e.g. `contoso.onmicrosoft.com`.
	pub tenant: String,
	/// Combined sign-up/sign-in policy; also the default policy.
	pub sign_up_sign_in_policy_id: String,
	/// Password reset policy.
	#[serde(default)]
	pub reset_password_policy_id: Option<String>,
	/// Profile editing policy.
	#[serde(default)]
	pub edit_profile_policy_id: Option<String>,
	/// Optional downstream API identifier used to build scopes.
	#[serde(default)]
	pub api_uri: Option<String>,
	/// Space-separated downstream API scopes.
	#[serde(default)]
	pub api_scopes: Option<String>,
}
impl B2cOptions {
	/// Policy used when the request does not name one.
	pub fn default_policy(&self) -> &str {
		&self.sign_up_sign_in_policy_id
	}

	/// Authority URL for the default policy.
	pub fn authority(&self) -> String {
		format!("{}/{}/{}/v2.0", self.instance_base(), self.tenant, self.default_policy())
	}

	/// Policy-agnostic discovery address; the manager appends the policy parameter.
	pub fn metadata_address(&self) -> String {
		format!("{}/{}/v2.0/.well-known/openid-configuration", self.instance_base(), self.tenant)
	}

	/// Configured policy identifiers in declaration order.
	pub fn policies(&self) -> Vec<String> {
		[
			Some(&self.sign_up_sign_in_policy_id),
			self.reset_password_policy_id.as_ref(),
			self.edit_profile_policy_id.as_ref(),
		]
		.into_iter()
		.flatten()
		.filter(|policy| !policy.trim().is_empty())
		.fold(Vec::with_capacity(3), |mut policies, policy| {
			if !policies.contains(policy) {
				policies.push(policy.clone());
			}

			policies
		})
	}

	/// Policy requested through the [`POLICY_AUTHENTICATION_PROPERTY`] entry of a sign-in
	/// challenge's properties, falling back to the default policy when absent or blank.
	pub fn requested_policy<'a>(&'a self, properties: &'a HashMap<String, String>) -> &'a str {
		properties
			.get(POLICY_AUTHENTICATION_PROPERTY)
			.map(|policy| policy.trim())
			.filter(|policy| !policy.is_empty())
			.unwrap_or_else(|| self.default_policy())
	}

	/// Rewrite an issuer address built for the default policy so it targets `policy`.
	pub fn issuer_address_for(&self, issuer_address: &str, policy: &str) -> String {
		let default_policy = self.default_policy();

		if policy == default_policy || default_policy.is_empty() {
			issuer_address.to_owned()
		} else {
			issuer_address.replace(default_policy, policy)
		}
	}

	/// Scopes requested on the default sign-in flow.
	pub fn requested_scopes(&self) -> String {
		let mut scopes = String::from("openid profile");

		if let Some(api_uri) = self.api_uri.as_deref().filter(|uri| !uri.is_empty()) {
			let api_uri = api_uri.trim_end_matches('/');

			for scope in self.api_scopes.as_deref().unwrap_or_default().split_whitespace() {
				scopes.push(' ');
				scopes.push_str(&format!("{api_uri}/{scope}"));
			}
		}

		scopes
	}

	/// Manager options covering every configured policy.
	pub fn manager_options(&self) -> ManagerOptions {
		ManagerOptions::new(self.metadata_address(), self.policies())
	}

	fn instance_base(&self) -> &str {
		self.instance.trim_end_matches('/')
	}
}

fn default_true() -> bool {
	true
}

fn default_automatic_refresh_interval() -> Duration {
	DEFAULT_AUTOMATIC_REFRESH_INTERVAL
}

fn default_refresh_interval() -> Duration {
	DEFAULT_REFRESH_INTERVAL
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}

fn default_request_timeout() -> Duration {
	DEFAULT_REQUEST_TIMEOUT
}

fn default_b2c_instance() -> String {
	DEFAULT_B2C_INSTANCE.into()
}

fn validate_policy_id(value: &str) -> Result<()> {
	if value.is_empty() {
		return Err(Error::Validation { field: "policies", reason: "Must not be empty.".into() });
	}
	if value.len() > 128 {
		return Err(Error::Validation {
			field: "policies",
			reason: "Policy identifiers must be 128 characters or fewer.".into(),
		});
	}
	if !value.as_bytes().iter().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_')) {
		return Err(Error::Validation {
			field: "policies",
			reason: format!("Policy '{value}' may only contain ASCII letters, numbers, '-', or '_'."),
		});
	}

	Ok(())
}
