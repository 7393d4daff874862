//! Integration tests for configuration loading and validation.

use smsgraph::config::Config;

const MINIMAL_YAML: &str = "\
microsoft_client_id: cid
microsoft_client_secret: csecret
app_base_url: https://assistant.example.com
openrouter_api_key: sk-or-key
twilio_account_sid: ACxxxx
twilio_auth_token: ttoken
twilio_from_number: \"+15550001111\"
";

#[test]
fn test_yaml_parse_minimal() {
    let config: Config = serde_yaml::from_str(MINIMAL_YAML).unwrap();
    assert_eq!(config.microsoft_client_id, "cid");
    assert_eq!(config.twilio_from_number, "+15550001111");
    // Defaults
    assert_eq!(config.microsoft_tenant_id, "common");
    assert_eq!(config.model, "anthropic/claude-sonnet-4.5");
    assert_eq!(config.client_state, "sms-assistant");
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8080);
    assert_eq!(config.data_dir, "./smsgraph.data");
    assert_eq!(config.http_timeout_secs, 30);
    assert_eq!(config.subscription_ttl_minutes, 4200);
    assert_eq!(config.renewal_window_minutes, 60);
    assert_eq!(config.renewal_interval_minutes, 15);
    assert!(config.enforce_twilio_signature);
    assert!(config.graph_scopes.contains("offline_access"));
    assert!(config.login_base_url.is_none());
    assert!(config.alert_phone_number.is_none());
}

#[test]
fn test_yaml_parse_full() {
    let yaml = format!(
        "{MINIMAL_YAML}\
microsoft_tenant_id: my-tenant
model: openai/gpt-4o
alert_phone_number: \"+15559998888\"
enforce_twilio_signature: false
port: 9090
subscription_ttl_minutes: 1440
renewal_window_minutes: 120
"
    );
    let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
    config.post_deserialize().unwrap();
    assert_eq!(config.microsoft_tenant_id, "my-tenant");
    assert_eq!(config.model, "openai/gpt-4o");
    assert_eq!(config.alert_phone_number.as_deref(), Some("+15559998888"));
    assert!(!config.enforce_twilio_signature);
    assert_eq!(config.port, 9090);
    assert_eq!(config.subscription_ttl_minutes, 1440);
    assert_eq!(config.renewal_window().num_minutes(), 120);
}

#[test]
fn test_post_deserialize_applied_on_minimal() {
    let mut config: Config = serde_yaml::from_str(MINIMAL_YAML).unwrap();
    config.post_deserialize().unwrap();
    assert_eq!(
        config.redirect_uri(),
        "https://assistant.example.com/auth/callback"
    );
    assert_eq!(config.sms_callback_url(), "https://assistant.example.com/sms");
    assert_eq!(
        config.notification_url(),
        "https://assistant.example.com/webhooks/graph"
    );
}

#[test]
fn test_missing_required_field_fails_validation() {
    let yaml = MINIMAL_YAML.replace("openrouter_api_key: sk-or-key\n", "");
    let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
    let err = config.post_deserialize().unwrap_err();
    assert!(err.to_string().contains("openrouter_api_key"));
}

#[test]
fn test_trailing_slash_stripped_from_base_url() {
    let yaml = MINIMAL_YAML.replace(
        "app_base_url: https://assistant.example.com",
        "app_base_url: https://assistant.example.com/",
    );
    let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
    config.post_deserialize().unwrap();
    assert_eq!(config.sms_callback_url(), "https://assistant.example.com/sms");
}

#[test]
fn test_negative_renewal_window_rejected() {
    let yaml = format!("{MINIMAL_YAML}renewal_window_minutes: -5\n");
    let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
    assert!(config.post_deserialize().is_err());
}

#[test]
fn test_zero_values_fall_back_to_defaults() {
    let yaml = format!(
        "{MINIMAL_YAML}\
http_timeout_secs: 0
subscription_ttl_minutes: 0
renewal_interval_minutes: 0
"
    );
    let mut config: Config = serde_yaml::from_str(&yaml).unwrap();
    config.post_deserialize().unwrap();
    assert_eq!(config.http_timeout_secs, 30);
    assert_eq!(config.subscription_ttl_minutes, 4200);
    assert_eq!(config.renewal_interval_minutes, 15);
}
