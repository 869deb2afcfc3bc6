//! Cache key construction.
//!
//! Keys follow a `namespace:scope:params` naming convention so that coarse
//! invalidation by substring works: every entry scoped to a user carries
//! `:{user}:` in its key. Parameters are sorted before formatting, which
//! makes identical logical requests collide regardless of insertion order.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// How many leading characters of a free-form message identify it for
/// caching purposes. Matches the upstream request-memoization convention.
const MESSAGE_DIGEST_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a `namespace:scope:k=v|k=v` key from sorted parameters.
    pub fn scoped(namespace: &str, scope: &str, params: &BTreeMap<&str, String>) -> Self {
        let param_string = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("|");
        Self(format!("{namespace}:{scope}:{param_string}"))
    }

    /// Key for a memoized answer to a user's message. Only the first
    /// [`MESSAGE_DIGEST_CHARS`] characters of the message identify it.
    pub fn ai_response(user_id: &str, message: &str) -> Self {
        let digest: String = message.chars().take(MESSAGE_DIGEST_CHARS).collect();
        let mut params = BTreeMap::new();
        params.insert("message", digest);
        Self::scoped("ai_response", user_id, &params)
    }

    pub fn api_key(provider: &str) -> Self {
        Self::scoped("api_key", provider, &BTreeMap::new())
    }

    pub fn voice_preference(user_id: &str) -> Self {
        Self::scoped("voice_preference", user_id, &BTreeMap::new())
    }

    pub fn conversation_history(user_id: &str, conversation_id: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert("conversation", conversation_id.to_string());
        Self::scoped("conversation_history", user_id, &params)
    }

    pub fn common_response(template: &str) -> Self {
        Self::scoped("common_response", template, &BTreeMap::new())
    }

    /// Key for a store-query result: a digest of the normalized statement
    /// text plus its serialized parameters.
    pub fn query(normalized_sql: &str, params: &[Value]) -> Self {
        let param_string = serde_json::to_string(params).unwrap_or_default();
        Self(format!(
            "db_query:{}",
            hex_digest(&format!("{normalized_sql}{param_string}"))
        ))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Collapse whitespace and lowercase a statement so structurally identical
/// queries share one key regardless of formatting.
pub fn normalize_query(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub(crate) fn hex_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoped_keys_sort_params() {
        let mut a = BTreeMap::new();
        a.insert("b", "2".to_string());
        a.insert("a", "1".to_string());
        let key = CacheKey::scoped("t", "scope", &a);
        assert_eq!(key.as_str(), "t:scope:a=1|b=2");
    }

    #[test]
    fn ai_response_truncates_long_messages() {
        let long = "x".repeat(500);
        let key_a = CacheKey::ai_response("u1", &long);
        let key_b = CacheKey::ai_response("u1", &format!("{long}trailing difference"));
        assert_eq!(key_a, key_b);
        assert!(key_a.as_str().contains(":u1:"));
    }

    #[test]
    fn query_keys_ignore_formatting_but_not_params() {
        let a = CacheKey::query(&normalize_query("SELECT  *\n FROM users"), &[json!(1)]);
        let b = CacheKey::query(&normalize_query("select * from USERS"), &[json!(1)]);
        let c = CacheKey::query(&normalize_query("select * from users"), &[json!(2)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("db_query:"));
    }
}
