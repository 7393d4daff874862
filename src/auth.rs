use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::error::SmsGraphError;

const DEFAULT_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";

/// OAuth error codes that mean the grant itself is dead and the user must
/// redo the authorize flow. Anything else 4xx is a malformed/forbidden
/// request; 5xx and network failures are retryable.
const PERMANENT_REJECTIONS: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "consent_required",
    "unauthorized_client",
];

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Present on code exchange; refresh responses include it only when the
    /// upstream rotates the token.
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Client for the identity provider's authorize/token endpoints.
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    tenant_id: String,
    redirect_uri: String,
    scopes: String,
    login_base_url: String,
}

impl OAuthClient {
    pub fn new(config: &Config) -> Result<Self, SmsGraphError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| SmsGraphError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(OAuthClient {
            http,
            client_id: config.microsoft_client_id.clone(),
            client_secret: config.microsoft_client_secret.clone(),
            tenant_id: config.microsoft_tenant_id.clone(),
            redirect_uri: config.redirect_uri(),
            scopes: config.graph_scopes.clone(),
            login_base_url: config
                .login_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_LOGIN_BASE_URL.into()),
        })
    }

    /// URL the user is redirected to to grant delegated access.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}&response_mode=query",
            self.login_base_url,
            self.tenant_id,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scopes),
        )
    }

    fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base_url, self.tenant_id
        )
    }

    /// Exchange an authorization code for a token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, SmsGraphError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, SmsGraphError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", self.scopes.as_str()),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, SmsGraphError> {
        let response = self
            .http
            .post(self.token_endpoint())
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                SmsGraphError::Transient(format!("unparseable token response: {e}"))
            });
        }

        if status.is_server_error() {
            return Err(SmsGraphError::Transient(format!(
                "token endpoint HTTP {status}: {body}"
            )));
        }

        if let Ok(err) = serde_json::from_str::<TokenErrorBody>(&body) {
            if PERMANENT_REJECTIONS.contains(&err.error.as_str()) {
                warn!("token grant permanently rejected: {}", err.error);
                return Err(SmsGraphError::ReauthenticationRequired(
                    err.error_description.unwrap_or(err.error),
                ));
            }
        }

        Err(SmsGraphError::UpstreamRejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server_url: &str) -> OAuthClient {
        let mut cfg = test_config();
        cfg.login_base_url = Some(server_url.to_string());
        OAuthClient::new(&cfg).unwrap()
    }

    #[test]
    fn test_authorize_url_parameters() {
        let client = OAuthClient::new(&test_config()).unwrap();
        let url = client.authorize_url();
        assert!(url.starts_with("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("response_mode=query"));
        // redirect URI and space-joined scopes are percent-encoded
        assert!(url.contains("redirect_uri=https%3A%2F%2Fassistant.example.com%2Fauth%2Fcallback"));
        assert!(url.contains("scope=Calendars.ReadWrite%20Contacts.ReadWrite"));
        assert!(url.contains("offline_access"));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/common/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let tokens = client_for(&server.uri())
            .exchange_code("auth-code-1")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(tokens.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/common/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70000: grant revoked"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server.uri()).refresh("rt-dead").await.unwrap_err();
        match err {
            SmsGraphError::ReauthenticationRequired(desc) => {
                assert!(desc.contains("grant revoked"));
            }
            other => panic!("expected ReauthenticationRequired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/common/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server.uri()).refresh("rt-1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_refresh_other_4xx_is_upstream_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/common/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_request",
                "error_description": "missing parameter"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server.uri()).refresh("rt-1").await.unwrap_err();
        assert!(matches!(
            err,
            SmsGraphError::UpstreamRejected { status: 400, .. }
        ));
    }
}
