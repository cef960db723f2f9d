//! Key-set document codec.

// crates.io
use jsonwebtoken::jwk::JwkSet;
// self
use crate::_prelude::*;

/// Decodes a fetched key-set document.
pub trait KeySetCodec: Send + Sync + std::fmt::Debug {
	/// Parse the raw response body into a key set.
	fn parse(&self, body: &[u8]) -> Result<JwkSet>;
}

/// JSON Web Key Set codec backed by `jsonwebtoken`'s JWK model.
#[derive(Clone, Copy, Debug, Default)]
pub struct JwkSetCodec;
impl KeySetCodec for JwkSetCodec {
	fn parse(&self, body: &[u8]) -> Result<JwkSet> {
		serde_json::from_slice(body).map_err(|err| Error::Parse { source: Box::new(err) })
	}
}
