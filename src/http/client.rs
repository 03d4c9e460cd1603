//! Document retrieval seam and its reqwest-backed implementation.

// std
use std::fmt::Debug;
// crates.io
use http::header::ACCEPT;
use reqwest::{Client, redirect::Policy};
use url::Url;
// self
use crate::{_prelude::*, options::ManagerOptions, security};

/// Maximum redirect depth followed by the default retriever.
pub const MAX_REDIRECTS: usize = 10;

/// Fetches raw document text for a URL.
///
/// Implementations report transport and HTTP failures as errors; parsing is left to the caller.
#[async_trait::async_trait]
pub trait DocumentRetriever: Debug + Send + Sync {
	/// Retrieve the document at `url` as text.
	async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Default retriever issuing HTTPS requests through `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpDocumentRetriever {
	client: Client,
	require_https: bool,
	allowed_domains: Arc<[String]>,
	max_response_bytes: u64,
	request_timeout: Duration,
}
impl HttpDocumentRetriever {
	/// Build a retriever honouring the transport guards in `options`.
	pub fn new(options: &ManagerOptions) -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::limited(MAX_REDIRECTS))
			.user_agent(format!("policy-oidc-cache/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(options, client))
	}

	/// Build a retriever using the supplied HTTP client (primarily for tests).
	pub fn with_client(options: &ManagerOptions, client: Client) -> Self {
		Self {
			client,
			require_https: options.require_https,
			allowed_domains: options.allowed_domains.clone().into(),
			max_response_bytes: options.max_response_bytes,
			request_timeout: options.request_timeout,
		}
	}

	fn oversized(&self, size: u64) -> Error {
		Error::Validation {
			field: "max_response_bytes",
			reason: format!(
				"Response size {size} bytes exceeds the configured guard of {limit} bytes.",
				limit = self.max_response_bytes
			),
		}
	}
}
#[async_trait::async_trait]
impl DocumentRetriever for HttpDocumentRetriever {
	async fn fetch(&self, url: &Url) -> Result<String> {
		if self.require_https {
			security::enforce_https(url)?;
		}

		security::enforce_allowed_host(url, &self.allowed_domains)?;

		let start = Instant::now();
		let mut response = self
			.client
			.get(url.clone())
			.header(ACCEPT, "application/json")
			.timeout(self.request_timeout)
			.send()
			.await?;
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus { status, url: url.clone(), body });
		}

		if let Some(length) = response.content_length()
			&& length > self.max_response_bytes
		{
			return Err(self.oversized(length));
		}

		let mut body = Vec::new();

		// Chunked responses carry no length; stop reading once the guard is crossed.
		while let Some(chunk) = response.chunk().await? {
			body.extend_from_slice(&chunk);

			if body.len() as u64 > self.max_response_bytes {
				return Err(self.oversized(body.len() as u64));
			}
		}

		let text = String::from_utf8(body).map_err(|err| Error::Validation {
			field: "document",
			reason: format!("Response from {url} is not valid UTF-8: {err}."),
		})?;

		tracing::debug!(%url, status = %status, elapsed = ?start.elapsed(), "document fetch complete");

		Ok(text)
	}
}
