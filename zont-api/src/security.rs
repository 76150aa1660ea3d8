//! Credential handling and PII redaction.
//!
//! API payloads describing devices carry owner logins, phone numbers, SIM
//! details and locations. [`redact_pii`] masks them so device data can be
//! logged safely.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secure string that automatically clears its contents when dropped.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct SecureString(String);

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureString(***)")
    }
}

impl SecureString {
    /// Create a new secure string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string value. Use carefully and avoid storing the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Convert to a regular string. The SecureString will be zeroized.
    pub fn into_string(mut self) -> String {
        let value = std::mem::take(&mut self.0);
        self.0.zeroize();
        value
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Scalar keys whose values are replaced with `"***"`.
static PII_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ip",
        "login",
        "netname",
        "operator",
        "owner_username",
        "pass",
        "password",
        "phone",
        "serial",
        "usbpassword",
        "user_id",
        "username",
    ]
    .into_iter()
    .collect()
});

/// Masks personally identifying fields in an API payload, in place.
///
/// Scalar PII fields become `"***"`, `sim_id` objects are replaced by a
/// masked stub and `loc` lists are emptied. Nested objects and arrays are
/// walked recursively.
pub fn redact_pii(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                match key.as_str() {
                    "sim_id" if field.is_object() => {
                        *field = json!({"operator": "***", "id": "***"});
                    }
                    "loc" if field.is_array() => {
                        *field = json!([]);
                    }
                    k if PII_KEYS.contains(k) && !field.is_object() && !field.is_array() => {
                        *field = Value::String("***".to_string());
                    }
                    _ => redact_pii(field),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_pii),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_string_debug_is_masked() {
        let secret = SecureString::new("token-123");
        assert_eq!(format!("{secret:?}"), "SecureString(***)");
        assert_eq!(secret.expose(), "token-123");
    }

    #[test]
    fn test_into_string() {
        let secret = SecureString::from("abc");
        assert_eq!(secret.into_string(), "abc");
    }

    #[test]
    fn test_redact_pii_nested() {
        let mut device = json!({
            "id": 42,
            "name": "boiler room",
            "serial": "ABC123",
            "owner_username": "someone",
            "sim_id": {"operator": "MTS", "id": "8970"},
            "loc": [55.7, 37.6],
            "z3k_config": {
                "users": [{"phone": "+70000000000", "name": "owner"}]
            }
        });

        redact_pii(&mut device);

        assert_eq!(device["id"], 42);
        assert_eq!(device["name"], "boiler room");
        assert_eq!(device["serial"], "***");
        assert_eq!(device["owner_username"], "***");
        assert_eq!(device["sim_id"]["operator"], "***");
        assert_eq!(device["loc"], json!([]));
        assert_eq!(device["z3k_config"]["users"][0]["phone"], "***");
        assert_eq!(device["z3k_config"]["users"][0]["name"], "owner");
    }

    #[test]
    fn test_redact_pii_leaves_scalars_alone() {
        let mut value = json!(17);
        redact_pii(&mut value);
        assert_eq!(value, json!(17));
    }
}
