//! Per-policy provider configuration: discovery documents, refresh bookkeeping, the union
//! builder, and the manager tying them together.

pub mod document;
pub mod manager;
pub mod state;
pub mod union;
