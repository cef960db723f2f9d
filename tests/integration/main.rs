//! Integration tests against a mock key-set endpoint.

mod background;
mod jwks_refresh;
mod support;
