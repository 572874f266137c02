pub mod bindings;

use axum::http::{HeaderMap, header};
use rand::Rng;
use subtle::ConstantTimeEq;

pub use bindings::{ApiKeyBinding, BindingStore, StaticBindingStore};

pub const KEY_PREFIX: &str = "sk-gw-";
pub const X_API_KEY: &str = "x-api-key";

/// Issues and checks gateway API keys. Stateless.
pub struct AuthManager;

impl AuthManager {
    /// `sk-gw-` + 256 random bits, hex encoded.
    pub fn generate_key() -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        format!("{}{}", KEY_PREFIX, hex::encode(bytes))
    }

    /// `Authorization: Bearer <key>` first, then `x-api-key`.
    pub fn extract_key(headers: &HeaderMap) -> Option<String> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| {
                s.strip_prefix("Bearer ")
                    .or_else(|| s.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(key) = bearer {
            return Some(key.to_string());
        }
        headers
            .get(X_API_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn validate_request(headers: &HeaderMap, expected_key: &str) -> bool {
        match Self::extract_key(headers) {
            Some(provided) => Self::keys_match(&provided, expected_key),
            None => false,
        }
    }

    /// Length-checked constant-time comparison.
    pub fn keys_match(provided: &str, expected: &str) -> bool {
        if provided.is_empty() || expected.is_empty() {
            return false;
        }
        let (a, b) = (provided.as_bytes(), expected.as_bytes());
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }
}
