use axum::body::Body;
use serde_json::Value;

use crate::error::GatewayError;

// HTTP helpers

/// Reads the whole body up to `limit` bytes and parses it as a JSON object.
pub async fn read_json_body(body: Body, limit: usize) -> Result<Value, GatewayError> {
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        // axum 在超过上限时返回 LengthLimitError
        if is_length_limit(&e) {
            GatewayError::PayloadTooLarge(limit)
        } else {
            GatewayError::BadRequest(format!("Failed to read request body: {}", e))
        }
    })?;
    if bytes.is_empty() {
        return Err(GatewayError::BadRequest("Request body is empty".into()));
    }
    let value: Value = serde_json::from_slice(&bytes)?;
    if !value.is_object() {
        return Err(GatewayError::BadRequest("Request body must be a JSON object".into()));
    }
    Ok(value)
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

// Key masking for diagnostics
pub fn mask_key(key: &str) -> String {
    if key.len() <= 12 || !key.is_ascii() {
        return "****".to_string();
    }
    let (start, end) = (&key[..8], &key[key.len() - 4..]);
    format!("{}****{}", start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_bodies_are_payload_too_large() {
        let err = read_json_body(Body::from(vec![b' '; 64]), 16).await.unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge(16)));
    }

    #[tokio::test]
    async fn malformed_and_non_object_bodies_are_bad_requests() {
        let err = read_json_body(Body::from("{"), 1024).await.unwrap_err();
        assert!(matches!(err, GatewayError::Json(_)));
        let err = read_json_body(Body::from("[1]"), 1024).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
        let ok = read_json_body(Body::from(r#"{"a":1}"#), 1024).await.unwrap();
        assert_eq!(ok["a"], 1);
    }

    #[test]
    fn mask_key_keeps_prefix_and_suffix() {
        assert_eq!(mask_key("sk-gw-0123456789abcdef"), "sk-gw-01****cdef");
        assert_eq!(mask_key("short"), "****");
    }
}
