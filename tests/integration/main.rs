//! End-to-end coverage against a mock identity provider.

mod policy_refresh;
mod token_store;
