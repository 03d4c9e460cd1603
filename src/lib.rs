//! Multi-policy OpenID Connect metadata cache with time-gated refresh and signing-key union,
//! plus a per-user token cache store driven by load/persist hooks.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod config;
pub mod http;
pub mod metrics;
pub mod options;
pub mod security;
pub mod token_store;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
#[cfg(test)]
mod _test {
	use tracing_subscriber as _;
	use wiremock as _;
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	config::{
		document::{ProviderConfiguration, SigningKey},
		manager::{PolicyConfigurationManager, PolicyState, PolicyStatus},
		union::{merge, union_of},
	},
	error::{Error, Result},
	http::client::{DocumentRetriever, HttpDocumentRetriever},
	options::{B2cOptions, ManagerOptions},
	token_store::{SessionTokenStore, TokenCacheBlob, TokenCacheSerializer, UserTokenCache},
};
pub use tokio_util::sync::CancellationToken;
