//! HTTP retrieval and freshness-header semantics for key-set documents.

pub mod client;
pub mod semantics;
