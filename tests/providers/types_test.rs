//! Tests for provider types and utility functions.

use zulu::providers::{build, Message, ProviderError, Role, UsageStats};

// ---------------------------------------------------------------------------
// build()
// ---------------------------------------------------------------------------

#[test]
fn build_resolves_every_registered_provider() {
    assert!(build("anthropic", Some("key".to_owned()), None).is_some());
    assert!(build("openai", Some("key".to_owned()), None).is_some());
    assert!(build("ollama", None, None).is_some());
    assert!(build("gemini", Some("key".to_owned()), None).is_some());
    assert!(build("groq", Some("key".to_owned()), None).is_some());
}

#[test]
fn build_rejects_unknown_provider_name() {
    assert!(build("not-a-provider", Some("key".to_owned()), None).is_none());
}

#[test]
fn build_requires_an_api_key_for_hosted_providers() {
    assert!(build("anthropic", None, None).is_none());
    assert!(build("openai", None, None).is_none());
    assert!(build("gemini", None, None).is_none());
    assert!(build("groq", None, None).is_none());
}

#[test]
fn build_reports_its_registry_name() {
    let provider = build("anthropic", Some("key".to_owned()), None).expect("should build");
    assert_eq!(provider.name(), "anthropic");
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[test]
fn role_serialization_roundtrip() {
    let roles = [Role::System, Role::User, Role::Assistant];
    for role in roles {
        let json = serde_json::to_string(&role).expect("should serialize");
        let parsed: Role = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(parsed, role);
    }
}

#[test]
fn role_serializes_lowercase() {
    let json = serde_json::to_string(&Role::Assistant).expect("should serialize");
    assert_eq!(json, "\"assistant\"");
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[test]
fn message_user_helper_sets_role_and_content() {
    let msg = Message::user("hello");
    assert_eq!(msg.role, Role::User);
    assert_eq!(msg.content, "hello");
}

// ---------------------------------------------------------------------------
// UsageStats
// ---------------------------------------------------------------------------

#[test]
fn usage_stats_eq_and_hash() {
    let a = UsageStats { input_tokens: 10, output_tokens: 5 };
    let b = UsageStats { input_tokens: 10, output_tokens: 5 };
    assert_eq!(a, b);
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

#[test]
fn provider_error_http_status_display_includes_status_and_body() {
    let err = ProviderError::HttpStatus { status: 429, body: "rate limited".to_owned() };
    assert!(err.to_string().contains("429"));
    assert!(err.to_string().contains("rate limited"));
}

#[test]
fn provider_error_unavailable_display_includes_reason() {
    let err = ProviderError::Unavailable("missing ANTHROPIC_API_KEY".to_owned());
    assert!(err.to_string().contains("missing ANTHROPIC_API_KEY"));
}
