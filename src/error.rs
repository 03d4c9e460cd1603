//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the policy configuration cache crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Operation was cancelled.")]
	Cancelled,
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Unable to obtain configuration from '{metadata_address}'.")]
	Retrieval {
		metadata_address: String,
		#[source]
		source: Box<Error>,
	},
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Policy '{policy}' is not registered with this manager.")]
	UnknownPolicy { policy: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether the error was produced by an external cancellation signal.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}
