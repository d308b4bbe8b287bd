//! Integration tests for policy configuration.

use route_quota::{
    ConfigError, KeySource, Method, PolicyDefinition, PolicyRegistry, Quota, RateLimitError,
    RateLimiterConfig, Window, routing_signature,
};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_minimal_definition_accepted() {
    let definition = PolicyDefinition::new("GET", "/", 1, "second", "ip");
    assert_ok!(definition.validate());
}

#[test]
fn test_each_invalid_field_rejected() {
    let cases = [
        (PolicyDefinition::new("OPTIONS", "/", 1, "second", "ip"), "method"),
        (PolicyDefinition::new("GET", "/", 0, "second", "ip"), "limit"),
        (PolicyDefinition::new("GET", "/", 1, "week", "ip"), "interval"),
        (PolicyDefinition::new("GET", "/", 1, "second", "cookie"), "type"),
    ];

    for (definition, field) in cases {
        let message = definition.validate().unwrap_err();
        assert!(message.starts_with(field), "{message} should mention {field}");
    }
}

#[test]
fn test_registry_compiles_policies() {
    let registry = PolicyRegistry::from_definitions(vec![
        PolicyDefinition::new("POST", "/login", 3, "minute", "ip"),
        PolicyDefinition::new("PUT", "/users/{id}", 10, "hour", "jwt").with_field("sub"),
    ])
    .unwrap();

    let policy = registry.lookup("PUT", "/users/{id}").unwrap();
    assert_eq!(policy.id(), 1);
    assert_eq!(policy.method(), Method::Put);
    assert_eq!(policy.quota(), &Quota::new(10, Window::Hour));
    assert_eq!(policy.source(), &KeySource::Claim("sub".into()));

    // Lookups use the route template, not a concrete path.
    assert!(registry.lookup("PUT", "/users/42").is_none());
}

#[test]
fn test_registry_build_fails_fast() {
    let err = assert_err!(PolicyRegistry::from_definitions(vec![
        PolicyDefinition::new("GET", "/ok", 1, "second", "ip"),
        PolicyDefinition::new("GET", "/bad", 1, "fortnight", "ip"),
    ]));

    match err {
        RateLimitError::Config(ConfigError::InvalidPolicy { index, route, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(route, "GET /bad");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_routing_signature_depends_on_both_parts() {
    assert_ne!(routing_signature("GET", "/a"), routing_signature("GET", "/b"));
    assert_ne!(routing_signature("GET", "/a"), routing_signature("PUT", "/a"));
}

#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("route-quota-{}.yaml", std::process::id()));
    std::fs::write(
        &path,
        concat!(
            "store_timeout_ms: 25\n",
            "policies:\n",
            "  - method: DELETE\n",
            "    path: /sessions\n",
            "    limit: 5\n",
            "    interval: hour\n",
            "    type: header\n",
            "    key_field: x-user\n",
        ),
    )
    .unwrap();

    let config = RateLimiterConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.store_timeout_ms, 25);
    let registry = config.registry().unwrap();
    let policy = registry.lookup("DELETE", "/sessions").unwrap();
    assert_eq!(policy.source(), &KeySource::Header("x-user".into()));
}
