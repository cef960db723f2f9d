//! Shared mock-endpoint fixtures.

// std
use std::time::Duration;
// crates.io
use jwks_refresh::ClientConfig;
use wiremock::{MockServer, ResponseTemplate};

pub const JWKS_PATH: &str = "/.well-known/jwks.json";

pub fn jwks_body(kid: &str) -> String {
	format!(
		r#"{{
    "keys": [
        {{
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": "{kid}",
            "n": "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4_QEFCQ0RFRkdISUpLTE1OT1BRUlNUVVZXWFlaW1xdXl9gYWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1-f4A",
            "e": "AQAB"
        }}
    ]
}}"#
	)
}

pub fn jwks_response(kid: &str, cache_control: Option<&str>) -> ResponseTemplate {
	let response = ResponseTemplate::new(200)
		.set_body_string(jwks_body(kid))
		.insert_header("content-type", "application/json");

	match cache_control {
		Some(value) => response.insert_header("cache-control", value),
		None => response,
	}
}

/// Config pointing at `server` with every cache window collapsed.
pub fn eager_config(server: &MockServer) -> ClientConfig {
	let mut config = ClientConfig::new(format!("{}{}", server.uri(), JWKS_PATH));

	config.cache_min = Duration::ZERO;
	config.cache_errors = Duration::ZERO;
	config.tick_interval = Duration::from_millis(20);

	config
}
