//! HTTP retrieval of discovery and key-set documents.

pub mod client;
