use serde::{Deserialize, Serialize};

use crate::error::SmsGraphError;

fn default_microsoft_tenant_id() -> String {
    "common".into()
}
fn default_graph_scopes() -> String {
    "Calendars.ReadWrite Contacts.ReadWrite Mail.Read Mail.Send User.Read offline_access".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4.5".into()
}
fn default_client_state() -> String {
    "sms-assistant".into()
}
fn default_enforce_twilio_signature() -> bool {
    true
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_data_dir() -> String {
    "./smsgraph.data".into()
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_subscription_ttl_minutes() -> i64 {
    // Just under the Graph maximum for mail resources (4230 minutes)
    4200
}
fn default_renewal_window_minutes() -> i64 {
    60
}
fn default_renewal_interval_minutes() -> u64 {
    15
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    // Microsoft identity platform (delegated OAuth)
    #[serde(default)]
    pub microsoft_client_id: String,
    #[serde(default)]
    pub microsoft_client_secret: String,
    #[serde(default = "default_microsoft_tenant_id")]
    pub microsoft_tenant_id: String,
    #[serde(default = "default_graph_scopes")]
    pub graph_scopes: String,
    #[serde(default)]
    pub login_base_url: Option<String>,
    #[serde(default)]
    pub graph_base_url: Option<String>,

    /// Public base URL of this deployment (no trailing slash). Callback,
    /// webhook, and notification URLs are derived from it.
    #[serde(default)]
    pub app_base_url: String,

    // Completion API
    #[serde(default)]
    pub openrouter_api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub llm_base_url: Option<String>,

    // Twilio transport
    #[serde(default)]
    pub twilio_account_sid: String,
    #[serde(default)]
    pub twilio_auth_token: String,
    #[serde(default)]
    pub twilio_from_number: String,
    #[serde(default)]
    pub twilio_base_url: Option<String>,
    #[serde(default = "default_enforce_twilio_signature")]
    pub enforce_twilio_signature: bool,

    /// Destination for push-triggered new-mail alerts. Alerts are skipped
    /// with a warning when unset.
    #[serde(default)]
    pub alert_phone_number: Option<String>,
    #[serde(default = "default_client_state")]
    pub client_state: String,

    // Server and storage
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    // Subscription lifecycle
    #[serde(default = "default_subscription_ttl_minutes")]
    pub subscription_ttl_minutes: i64,
    #[serde(default = "default_renewal_window_minutes")]
    pub renewal_window_minutes: i64,
    #[serde(default = "default_renewal_interval_minutes")]
    pub renewal_interval_minutes: u64,
}

impl Config {
    pub fn resolve_config_path() -> Result<Option<std::path::PathBuf>, SmsGraphError> {
        if let Ok(custom) = std::env::var("SMSGRAPH_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(custom.into()));
            }
            return Err(SmsGraphError::Config(format!(
                "SMSGRAPH_CONFIG points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./smsgraph.config.yaml", "./smsgraph.config.yml"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(Some(candidate.into()));
            }
        }
        Ok(None)
    }

    /// Load config from YAML file.
    pub fn load() -> Result<Self, SmsGraphError> {
        let Some(path) = Self::resolve_config_path()? else {
            return Err(SmsGraphError::Config(
                "No smsgraph.config.yaml found in the working directory".into(),
            ));
        };
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SmsGraphError::Config(format!("Failed to read {path_str}: {e}")))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| SmsGraphError::Config(format!("Failed to parse {path_str}: {e}")))?;
        config.post_deserialize()?;
        Ok(config)
    }

    /// Apply post-deserialization normalization and validation.
    pub fn post_deserialize(&mut self) -> Result<(), SmsGraphError> {
        self.app_base_url = self.app_base_url.trim().trim_end_matches('/').to_string();

        for (name, value) in [
            ("microsoft_client_id", &self.microsoft_client_id),
            ("microsoft_client_secret", &self.microsoft_client_secret),
            ("app_base_url", &self.app_base_url),
            ("openrouter_api_key", &self.openrouter_api_key),
            ("twilio_account_sid", &self.twilio_account_sid),
            ("twilio_auth_token", &self.twilio_auth_token),
            ("twilio_from_number", &self.twilio_from_number),
        ] {
            if value.trim().is_empty() {
                return Err(SmsGraphError::Config(format!("{name} is required")));
            }
        }

        if !self.app_base_url.starts_with("http://") && !self.app_base_url.starts_with("https://") {
            return Err(SmsGraphError::Config(
                "app_base_url must be an absolute http(s) URL".into(),
            ));
        }

        for opt in [
            &mut self.login_base_url,
            &mut self.graph_base_url,
            &mut self.llm_base_url,
            &mut self.twilio_base_url,
            &mut self.alert_phone_number,
        ] {
            if let Some(v) = opt {
                if v.trim().is_empty() {
                    *opt = None;
                }
            }
        }

        if self.microsoft_tenant_id.trim().is_empty() {
            self.microsoft_tenant_id = default_microsoft_tenant_id();
        }
        if self.client_state.trim().is_empty() {
            self.client_state = default_client_state();
        }
        if self.model.trim().is_empty() {
            self.model = default_model();
        }
        if self.http_timeout_secs == 0 {
            self.http_timeout_secs = default_http_timeout_secs();
        }
        if self.subscription_ttl_minutes <= 0 {
            self.subscription_ttl_minutes = default_subscription_ttl_minutes();
        }
        if self.renewal_window_minutes < 0 {
            return Err(SmsGraphError::Config(
                "renewal_window_minutes must be >= 0".into(),
            ));
        }
        if self.renewal_interval_minutes == 0 {
            self.renewal_interval_minutes = default_renewal_interval_minutes();
        }

        Ok(())
    }

    /// OAuth redirect URI registered with the identity provider.
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.app_base_url)
    }

    /// Exact URL Twilio signs inbound webhook requests against.
    pub fn sms_callback_url(&self) -> String {
        format!("{}/sms", self.app_base_url)
    }

    /// Endpoint Graph delivers change notifications to.
    pub fn notification_url(&self) -> String {
        format!("{}/webhooks/graph", self.app_base_url)
    }

    pub fn renewal_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.renewal_window_minutes)
    }
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        microsoft_client_id: "client-id".into(),
        microsoft_client_secret: "client-secret".into(),
        microsoft_tenant_id: "common".into(),
        graph_scopes: default_graph_scopes(),
        login_base_url: None,
        graph_base_url: None,
        app_base_url: "https://assistant.example.com".into(),
        openrouter_api_key: "sk-or-test".into(),
        model: default_model(),
        llm_base_url: None,
        twilio_account_sid: "ACxxxxxxxx".into(),
        twilio_auth_token: "twilio-secret".into(),
        twilio_from_number: "+15550001111".into(),
        twilio_base_url: None,
        enforce_twilio_signature: true,
        alert_phone_number: Some("+15552223333".into()),
        client_state: default_client_state(),
        host: "127.0.0.1".into(),
        port: 8080,
        data_dir: "./smsgraph.data".into(),
        http_timeout_secs: 30,
        subscription_ttl_minutes: 4200,
        renewal_window_minutes: 60,
        renewal_interval_minutes: 15,
    }
}
