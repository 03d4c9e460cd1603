//! Transport guards for metadata retrieval: HTTPS enforcement and host allowlists.
//!
//! Discovery documents decide which endpoints users are redirected to and which keys validate
//! their tokens, so the retrieval pipeline refuses plaintext URLs and hosts outside the
//! configured allowlist before any request leaves the process.

// std
use std::collections::HashSet;
// crates.io
use serde::{Deserialize, de::Deserializer};
use url::Url;
// self
use crate::_prelude::*;

/// Canonicalise a DNS name by trimming whitespace, removing any trailing dot, and lowercasing.
pub fn canonicalize_dns_name(value: &str) -> Option<String> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return None;
	}

	let without_trailing_dot = trimmed.trim_end_matches('.');
	if without_trailing_dot.is_empty() {
		return None;
	}

	Some(without_trailing_dot.to_ascii_lowercase())
}

/// Normalise an allowlist by canonicalising entries and removing duplicates/empties.
pub fn normalize_allowlist(domains: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut normalized = Vec::with_capacity(domains.len());

	for domain in domains {
		if let Some(canonical) = canonicalize_dns_name(&domain)
			&& seen.insert(canonical.clone())
		{
			normalized.push(canonical);
		}
	}

	normalized
}

/// `serde` helper to normalise allowlist domains during deserialisation.
pub fn deserialize_allowed_domains<'de, D>(
	deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = Vec::<String>::deserialize(deserializer)?;

	Ok(normalize_allowlist(raw))
}

/// Ensure the provided URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Security(format!("Metadata URL {url} must use HTTPS.")))
	}
}

/// Ensure the URL carries a host accepted by the allowlist.
pub fn enforce_allowed_host(url: &Url, allowed_domains: &[String]) -> Result<()> {
	let Some(host) = url.host_str() else {
		return Err(Error::Security(format!("Metadata URL {url} must include a host.")));
	};

	if host_is_allowed(host, allowed_domains) {
		Ok(())
	} else {
		Err(Error::Security(format!("Host '{host}' is not in the metadata allowlist.")))
	}
}

#[inline]
fn matches_allowlist(host: &str, domain: &str) -> bool {
	if host == domain {
		return true;
	}

	host.strip_suffix(domain).and_then(|prefix| prefix.strip_suffix('.')).is_some()
}

/// Evaluate whether the given hostname is allowed by the provided suffix allowlist.
///
/// When the list is empty, all hosts are considered valid.
pub fn host_is_allowed(host: &str, allowed_domains: &[String]) -> bool {
	if allowed_domains.is_empty() {
		return true;
	}

	let Some(host) = canonicalize_dns_name(host) else {
		return false;
	};

	allowed_domains
		.iter()
		.filter_map(|domain| canonicalize_dns_name(domain))
		.any(|domain| matches_allowlist(&host, &domain))
}
