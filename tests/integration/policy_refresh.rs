//! Multi-policy discovery, union, and refresh flows over HTTP.

// std
use std::time::Duration;
// crates.io
use policy_oidc_cache::{
	CancellationToken, DocumentRetriever, Error, HttpDocumentRetriever, ManagerOptions,
	PolicyConfigurationManager, PolicyState, Result,
};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path, query_param},
};

const TENANT: &str = "contoso.onmicrosoft.com";
const RSA_N: &str = "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4_QEFCQ0RFRkdISUpLTE1OT1BRUlNUVVZXWFlaW1xdXl9gYWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1-f4A";

fn discovery_path() -> String {
	format!("/{TENANT}/v2.0/.well-known/openid-configuration")
}

fn keys_path() -> String {
	format!("/{TENANT}/discovery/v2.0/keys")
}

fn discovery(server: &MockServer, policy: &str) -> serde_json::Value {
	json!({
		"issuer": format!("{}/{TENANT}/{policy}/v2.0/", server.uri()),
		"authorization_endpoint": format!("{}/{TENANT}/oauth2/v2.0/authorize?p={policy}", server.uri()),
		"token_endpoint": format!("{}/{TENANT}/oauth2/v2.0/token?p={policy}", server.uri()),
		"end_session_endpoint": format!("{}/{TENANT}/oauth2/v2.0/logout?p={policy}", server.uri()),
		"jwks_uri": format!("{}{}?p={policy}", server.uri(), keys_path()),
		"response_types_supported": ["code", "id_token", "code id_token"],
		"subject_types_supported": ["pairwise"],
		"id_token_signing_alg_values_supported": ["RS256"],
	})
}

fn jwks(kids: &[&str]) -> serde_json::Value {
	let keys: Vec<_> = kids
		.iter()
		.map(|kid| json!({ "kty": "RSA", "alg": "RS256", "use": "sig", "kid": kid, "n": RSA_N, "e": "AQAB" }))
		.collect();

	json!({ "keys": keys })
}

async fn mount_policy(server: &MockServer, policy: &str, kids: &[&str], expected_fetches: u64) {
	Mock::given(method("GET"))
		.and(path(discovery_path()))
		.and(query_param("p", policy))
		.respond_with(ResponseTemplate::new(200).set_body_json(discovery(server, policy)))
		.expect(expected_fetches)
		.mount(server)
		.await;
	Mock::given(method("GET"))
		.and(path(keys_path()))
		.and(query_param("p", policy))
		.respond_with(ResponseTemplate::new(200).set_body_json(jwks(kids)))
		.expect(expected_fetches)
		.mount(server)
		.await;
}

fn options(server: &MockServer, policies: &[&str]) -> ManagerOptions {
	ManagerOptions::new(format!("{}{}", server.uri(), discovery_path()), policies.iter().copied())
		.with_require_https(false)
		.with_refresh_interval(Duration::from_secs(1))
}

#[tokio::test]
async fn cached_configuration_is_fetched_once() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let server = MockServer::start().await;

	mount_policy(&server, "b2c_1_signin", &["signin-key"], 1).await;

	let manager = PolicyConfigurationManager::new(options(&server, &["b2c_1_signin"]))?;
	let cancel = CancellationToken::new();
	let first = manager.configuration("b2c_1_signin", &cancel).await?;
	let second = manager.configuration("b2c_1_signin", &cancel).await?;

	assert_eq!(first, second);
	assert_eq!(first.signing_keys.len(), 1);
	assert_eq!(first.signing_keys[0].kid(), Some("signin-key"));
	assert!(first.signing_keys[0].decoding_key().is_ok());
	assert_eq!(
		manager.authorization_endpoint("b2c_1_signin", &cancel).await?,
		format!("{}/{TENANT}/oauth2/v2.0/authorize?p=b2c_1_signin", server.uri())
	);

	let status = manager.status().await;

	assert_eq!(status.len(), 1);
	assert_eq!(status[0].state, PolicyState::Ready);
	assert!(status[0].last_refresh.is_some());
	assert!(status[0].hit_rate > 0.0);

	Ok(())
}

#[tokio::test]
async fn union_spans_every_policy() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let server = MockServer::start().await;

	mount_policy(&server, "b2c_1_signin", &["shared", "signin-only"], 1).await;
	mount_policy(&server, "b2c_1_signup", &["shared", "signup-only"], 1).await;

	let manager =
		PolicyConfigurationManager::new(options(&server, &["b2c_1_signin", "b2c_1_signup"]))?;
	let union = manager.union_configuration(&CancellationToken::new()).await?;

	assert_eq!(union.signing_keys.len(), 4);
	assert_eq!(union.signing_keys_for("shared").count(), 2);
	assert_eq!(union.signing_keys_for("signin-only").count(), 1);
	assert_eq!(union.signing_keys_for("signup-only").count(), 1);
	assert_eq!(union.response_types_supported, vec!["code", "id_token", "code id_token"]);
	assert_eq!(union.subject_types_supported, vec!["pairwise"]);

	Ok(())
}

#[tokio::test]
async fn upstream_failure_without_previous_configuration_is_an_error() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(discovery_path()))
		.respond_with(ResponseTemplate::new(500).set_body_string("unavailable"))
		.expect(1)
		.mount(&server)
		.await;

	let manager = PolicyConfigurationManager::new(options(&server, &["b2c_1_signin"]))?;
	let err = manager.configuration("b2c_1_signin", &CancellationToken::new()).await.unwrap_err();

	match err {
		Error::Retrieval { metadata_address, source } => {
			assert_eq!(metadata_address, format!("{}{}", server.uri(), discovery_path()));
			assert!(matches!(*source, Error::HttpStatus { .. }));
		},
		other => panic!("expected retrieval error, got {other:?}"),
	}

	let status = manager.status().await;

	assert_eq!(status[0].state, PolicyState::Empty);
	assert_eq!(status[0].error_count, 1);

	Ok(())
}

async fn assert_rejected_document(
	server: &MockServer,
	options: ManagerOptions,
	field: &'static str,
) -> Result<()> {
	let retriever = HttpDocumentRetriever::new(&options)?;
	let url = options.policy_metadata_url("b2c_1_signin")?;

	match retriever.fetch(&url).await {
		Err(Error::Validation { field: rejected, .. }) => assert_eq!(rejected, field),
		other => panic!("expected {field} validation error, got {other:?}"),
	}

	let manager = PolicyConfigurationManager::new(options)?;

	match manager.configuration("b2c_1_signin", &CancellationToken::new()).await {
		Err(Error::Retrieval { metadata_address, source }) => {
			assert_eq!(metadata_address, format!("{}{}", server.uri(), discovery_path()));
			assert!(
				matches!(*source, Error::Validation { field: rejected, .. } if rejected == field)
			);
		},
		other => panic!("expected retrieval error, got {other:?}"),
	}

	Ok(())
}

#[tokio::test]
async fn oversized_document_is_rejected() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(discovery_path()))
		.respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
		.expect(2)
		.mount(&server)
		.await;

	let mut options = options(&server, &["b2c_1_signin"]);

	options.max_response_bytes = 10;

	assert_rejected_document(&server, options, "max_response_bytes").await
}

#[tokio::test]
async fn non_utf8_document_is_rejected() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(discovery_path()))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe]))
		.expect(2)
		.mount(&server)
		.await;

	assert_rejected_document(&server, options(&server, &["b2c_1_signin"]), "document").await
}

#[tokio::test]
async fn requested_refresh_fetches_again_after_refresh_interval() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let server = MockServer::start().await;

	mount_policy(&server, "b2c_1_signin", &["signin-key"], 2).await;

	let manager = PolicyConfigurationManager::new(options(&server, &["b2c_1_signin"]))?;
	let cancel = CancellationToken::new();

	manager.configuration("b2c_1_signin", &cancel).await?;

	assert!(!manager.request_refresh("b2c_1_signin").await?);

	tokio::time::sleep(Duration::from_millis(1_100)).await;

	assert!(manager.request_refresh("b2c_1_signin").await?);

	manager.configuration("b2c_1_signin", &cancel).await?;
	manager.configuration("b2c_1_signin", &cancel).await?;

	Ok(())
}

#[tokio::test]
async fn plain_http_is_rejected_when_https_is_required() {
	let server = MockServer::start().await;
	let options = options(&server, &["b2c_1_signin"]).with_require_https(true);

	assert!(matches!(PolicyConfigurationManager::new(options), Err(Error::Security(_))));
}
