//! BLAKE3 content hashing for the result store.

use serde_json::Value;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a JSON record in its compact serialized form.
///
/// Object keys serialize in sorted order, so equal records hash equal.
pub fn hash_record(record: &Value) -> String {
    hash_string(&record.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_string() {
        let h1 = hash_string("hello");
        let h2 = hash_string("hello");
        let h3 = hash_string("world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64); // "blake3:" + 64 hex chars
    }

    #[test]
    fn test_hash_record_key_order_independent() {
        let a = json!({"ip": "1.1.1.1", "port": 22});
        let b: Value = serde_json::from_str(r#"{"port": 22, "ip": "1.1.1.1"}"#).unwrap();
        assert_eq!(hash_record(&a), hash_record(&b));
        assert_ne!(hash_record(&a), hash_record(&json!({"ip": "1.1.1.1", "port": 23})));
    }
}
