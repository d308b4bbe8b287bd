//! Policy lookup by routing signature.
//!
//! The registry is built once at startup and is read-only afterwards, so it can be
//! shared behind an `Arc` by every in-flight request without locking.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::policy::{Policy, PolicyDefinition};

/// Stable digest of a `(method, route template)` pair.
///
/// Hex-encoded SHA-256 of the method followed directly by the path.
pub fn routing_signature(method: &str, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compiled policies indexed by routing signature.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Policy>,
}

impl PolicyRegistry {
    /// Create an empty registry. Every request passes through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and compile every definition.
    ///
    /// Each policy's id is its position in `definitions`. The first invalid
    /// definition aborts the build; so does a second policy for a route that already
    /// has one.
    pub fn from_definitions<I>(definitions: I) -> Result<Self>
    where
        I: IntoIterator<Item = PolicyDefinition>,
    {
        let mut policies = HashMap::new();

        for (index, definition) in definitions.into_iter().enumerate() {
            let route = definition.route();
            let policy = Policy::from_definition(index, definition)?;
            let signature = routing_signature(policy.method().as_str(), policy.path());

            if policies.contains_key(&signature) {
                return Err(ConfigError::InvalidPolicy {
                    index,
                    route,
                    message: "route already has a policy".to_string(),
                }
                .into());
            }

            debug!(
                policy_id = index,
                route = %route,
                limit = policy.quota().max_requests(),
                window = %policy.quota().window(),
                source = policy.source().name(),
                "compiled rate limit policy"
            );
            policies.insert(signature, policy);
        }

        info!(policies = policies.len(), "rate limit policies loaded");

        Ok(Self { policies })
    }

    /// Policy for a request's method and matched route template, if any.
    pub fn lookup(&self, method: &str, path: &str) -> Option<&Policy> {
        self.policies.get(&routing_signature(method, path))
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no route is limited.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Iterate over the policies, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitError;

    #[test]
    fn test_routing_signature_is_stable() {
        let a = routing_signature("GET", "/users/{id}");
        assert_eq!(a, routing_signature("GET", "/users/{id}"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, routing_signature("POST", "/users/{id}"));
        assert_eq!(
            routing_signature("", ""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_lookup() {
        let registry = PolicyRegistry::from_definitions(vec![
            PolicyDefinition::new("POST", "/login", 3, "minute", "ip"),
            PolicyDefinition::new("GET", "/search", 10, "second", "query").with_field("q"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        let login = registry.lookup("POST", "/login").unwrap();
        assert_eq!(login.id(), 0);
        assert_eq!(registry.lookup("GET", "/search").unwrap().id(), 1);

        assert!(registry.lookup("GET", "/login").is_none());
        assert!(registry.lookup("POST", "/login/").is_none());
    }

    #[test]
    fn test_first_invalid_definition_aborts() {
        let result = PolicyRegistry::from_definitions(vec![
            PolicyDefinition::new("GET", "/a", 1, "second", "ip"),
            PolicyDefinition::new("GET", "/b", 0, "second", "ip"),
            PolicyDefinition::new("BREW", "/c", 1, "second", "ip"),
        ]);

        match result {
            Err(RateLimitError::Config(ConfigError::InvalidPolicy { index, message, .. })) => {
                assert_eq!(index, 1);
                assert_eq!(message, "limit must be greater than 0");
            }
            other => panic!("expected invalid policy, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let result = PolicyRegistry::from_definitions(vec![
            PolicyDefinition::new("GET", "/a", 1, "second", "ip"),
            PolicyDefinition::new("GET", "/a", 5, "minute", "header").with_field("x-user"),
        ]);
        assert!(matches!(
            result,
            Err(RateLimitError::Config(ConfigError::InvalidPolicy { index: 1, .. }))
        ));
    }

    #[test]
    fn test_empty_registry() {
        let registry = PolicyRegistry::from_definitions(Vec::new()).unwrap();
        assert!(registry.is_empty());
        assert!(registry.lookup("GET", "/").is_none());
    }
}
