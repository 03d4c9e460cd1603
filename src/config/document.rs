//! Provider configuration records and discovery/JWKS parsing.

// crates.io
use jsonwebtoken::{
	DecodingKey,
	jwk::{Jwk, JwkSet},
};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, http::client::DocumentRetriever};

/// Public signing key advertised by a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningKey {
	jwk: Jwk,
}
impl SigningKey {
	/// Wrap a JSON web key.
	pub fn new(jwk: Jwk) -> Self {
		Self { jwk }
	}

	/// Key identifier, when the provider supplies one.
	pub fn kid(&self) -> Option<&str> {
		self.jwk.common.key_id.as_deref()
	}

	/// Underlying JSON web key.
	pub fn jwk(&self) -> &Jwk {
		&self.jwk
	}

	/// Build a verification key for token validation.
	pub fn decoding_key(&self) -> Result<DecodingKey> {
		Ok(DecodingKey::from_jwk(&self.jwk)?)
	}
}
impl From<Jwk> for SigningKey {
	fn from(jwk: Jwk) -> Self {
		Self::new(jwk)
	}
}

/// Resolved OpenID Connect provider configuration.
///
/// The default value is empty and serves as the seed for union folding.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
	/// Issuer identifier.
	pub issuer: Option<String>,
	/// Authorization endpoint used for sign-in redirects.
	pub authorization_endpoint: Option<String>,
	/// Token endpoint.
	pub token_endpoint: Option<String>,
	/// End-session endpoint used for logout redirects.
	pub end_session_endpoint: Option<String>,
	/// User-info endpoint.
	pub userinfo_endpoint: Option<String>,
	/// Check-session iframe URL.
	pub check_session_iframe: Option<String>,
	/// Location of the provider's JSON web key set.
	pub jwks_uri: Option<String>,
	/// Key set fetched from `jwks_uri`.
	pub json_web_key_set: Option<JwkSet>,
	/// Supported ID token signing algorithms, ordered and de-duplicated.
	pub id_token_signing_alg_values_supported: Vec<String>,
	/// Supported response types, ordered and de-duplicated.
	pub response_types_supported: Vec<String>,
	/// Supported subject types, ordered and de-duplicated.
	pub subject_types_supported: Vec<String>,
	/// Signing keys in advertised order.
	pub signing_keys: Vec<SigningKey>,
}
impl ProviderConfiguration {
	/// Attach a key set, replacing the signing keys with its contents.
	pub fn with_jwks(mut self, jwks: JwkSet) -> Self {
		self.signing_keys = jwks.keys.iter().cloned().map(SigningKey::new).collect();
		self.json_web_key_set = Some(jwks);

		self
	}

	/// Every signing key carrying the given key identifier.
	pub fn signing_keys_for<'a>(&'a self, kid: &'a str) -> impl Iterator<Item = &'a SigningKey> {
		self.signing_keys.iter().filter(move |key| key.kid() == Some(kid))
	}
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
	issuer: Option<String>,
	authorization_endpoint: Option<String>,
	token_endpoint: Option<String>,
	end_session_endpoint: Option<String>,
	userinfo_endpoint: Option<String>,
	check_session_iframe: Option<String>,
	jwks_uri: Option<String>,
	#[serde(default)]
	id_token_signing_alg_values_supported: Vec<String>,
	#[serde(default)]
	response_types_supported: Vec<String>,
	#[serde(default)]
	subject_types_supported: Vec<String>,
}

/// Parse an OpenID Connect discovery document.
///
/// `issuer` and `authorization_endpoint` are required; signing keys are attached separately.
pub fn parse_discovery(raw: &str) -> Result<ProviderConfiguration> {
	let document: DiscoveryDocument = serde_json::from_str(raw)?;
	let issuer = require(document.issuer, "issuer")?;
	let authorization_endpoint =
		require(document.authorization_endpoint, "authorization_endpoint")?;

	Ok(ProviderConfiguration {
		issuer: Some(issuer),
		authorization_endpoint: Some(authorization_endpoint),
		token_endpoint: document.token_endpoint,
		end_session_endpoint: document.end_session_endpoint,
		userinfo_endpoint: document.userinfo_endpoint,
		check_session_iframe: document.check_session_iframe,
		jwks_uri: document.jwks_uri,
		json_web_key_set: None,
		id_token_signing_alg_values_supported: dedup(document.id_token_signing_alg_values_supported),
		response_types_supported: dedup(document.response_types_supported),
		subject_types_supported: dedup(document.subject_types_supported),
		signing_keys: Vec::new(),
	})
}

/// Parse a JSON web key set document.
pub fn parse_jwks(raw: &str) -> Result<JwkSet> {
	Ok(serde_json::from_str(raw)?)
}

/// Fetch and parse the discovery document at `url`, then attach its advertised key set.
pub async fn retrieve_configuration(
	retriever: &dyn DocumentRetriever,
	url: &Url,
) -> Result<ProviderConfiguration> {
	let raw = retriever.fetch(url).await?;
	let configuration = parse_discovery(&raw)?;
	let Some(jwks_uri) = configuration.jwks_uri.as_deref() else {
		return Ok(configuration);
	};
	let jwks_url = url.join(jwks_uri)?;
	let jwks = parse_jwks(&retriever.fetch(&jwks_url).await?)?;

	tracing::debug!(%url, keys = jwks.keys.len(), "provider configuration retrieved");

	Ok(configuration.with_jwks(jwks))
}

fn require(value: Option<String>, field: &'static str) -> Result<String> {
	match value {
		Some(value) if !value.trim().is_empty() => Ok(value),
		_ => Err(Error::Validation {
			field,
			reason: "Discovery document is missing a required field.".into(),
		}),
	}
}

fn dedup(values: Vec<String>) -> Vec<String> {
	let mut unique = Vec::with_capacity(values.len());

	for value in values {
		if !unique.contains(&value) {
			unique.push(value);
		}
	}

	unique
}
