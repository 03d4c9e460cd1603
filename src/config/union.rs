//! Folding per-policy configurations into one composite view.
//!
//! The union exists so a single validator can accept tokens issued under any policy: every
//! policy's signing keys are collected, while scalar endpoints come from whichever policy was
//! applied last. Callers must not rely on which policy's scalars win.

// self
use crate::config::document::ProviderConfiguration;

/// Merge `source` into `target`.
///
/// Scalar fields are overwritten. Algorithm, response-type, and subject-type lists gain the
/// entries they lack, keeping first-insertion order. Signing keys are appended as-is; duplicate
/// key identifiers are kept since consumers select keys by identifier.
pub fn merge(target: &mut ProviderConfiguration, source: &ProviderConfiguration) {
	target.authorization_endpoint = source.authorization_endpoint.clone();
	target.check_session_iframe = source.check_session_iframe.clone();
	target.end_session_endpoint = source.end_session_endpoint.clone();
	target.issuer = source.issuer.clone();
	target.json_web_key_set = source.json_web_key_set.clone();
	target.jwks_uri = source.jwks_uri.clone();
	target.token_endpoint = source.token_endpoint.clone();
	target.userinfo_endpoint = source.userinfo_endpoint.clone();

	extend_unique(
		&mut target.id_token_signing_alg_values_supported,
		&source.id_token_signing_alg_values_supported,
	);
	extend_unique(&mut target.response_types_supported, &source.response_types_supported);
	extend_unique(&mut target.subject_types_supported, &source.subject_types_supported);

	target.signing_keys.extend(source.signing_keys.iter().cloned());
}

/// Fold configurations in iteration order into a fresh union.
pub fn union_of<'a, I>(configurations: I) -> ProviderConfiguration
where
	I: IntoIterator<Item = &'a ProviderConfiguration>,
{
	configurations.into_iter().fold(ProviderConfiguration::default(), |mut union, configuration| {
		merge(&mut union, configuration);

		union
	})
}

fn extend_unique(target: &mut Vec<String>, source: &[String]) {
	for value in source {
		if !target.contains(value) {
			target.push(value.clone());
		}
	}
}
