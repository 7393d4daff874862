use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use tracing::info;

use crate::config::Config;
use crate::error::SmsGraphError;

const DEFAULT_TWILIO_BASE_URL: &str = "https://api.twilio.com";

type HmacSha1 = Hmac<Sha1>;

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Sends one message and returns the provider's message SID.
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, SmsGraphError>;
}

pub struct TwilioClient {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

impl TwilioClient {
    pub fn new(config: &Config) -> Result<Self, SmsGraphError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| SmsGraphError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(TwilioClient {
            http,
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from_number: config.twilio_from_number.clone(),
            base_url: config
                .twilio_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_TWILIO_BASE_URL.into()),
        })
    }
}

#[async_trait]
impl SmsSender for TwilioClient {
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, SmsGraphError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid,
        );
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.from_number.as_str()),
                ("To", to),
                ("Body", body),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            if status.is_server_error() {
                return Err(SmsGraphError::Transient(format!(
                    "Twilio HTTP {status}: {text}"
                )));
            }
            return Err(SmsGraphError::UpstreamRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let message: MessageResponse = serde_json::from_str(&text)?;
        info!("SMS sent to {to}: {}", message.sid);
        Ok(message.sid)
    }
}

/// The signing payload is the full callback URL followed by every POST
/// parameter, sorted by key, appended as name then value with no separators.
fn signing_payload(url: &str, form_body: &str) -> Result<String, SmsGraphError> {
    let mut params: Vec<(String, String)> =
        serde_urlencoded::from_str(form_body).map_err(|_| SmsGraphError::SignatureInvalid)?;
    params.sort();
    let mut payload = url.to_string();
    for (key, value) in params {
        payload.push_str(&key);
        payload.push_str(&value);
    }
    Ok(payload)
}

fn mac_for(auth_token: &str, url: &str, form_body: &str) -> Result<HmacSha1, SmsGraphError> {
    let payload = signing_payload(url, form_body)?;
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .map_err(|_| SmsGraphError::SignatureInvalid)?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Base64 HMAC-SHA1 over the signing payload, as carried in
/// `X-Twilio-Signature`.
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    form_body: &str,
) -> Result<String, SmsGraphError> {
    let mac = mac_for(auth_token, url, form_body)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a presented signature against the expected one.
pub fn validate_signature(auth_token: &str, signature: &str, url: &str, form_body: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    let Ok(mac) = mac_for(auth_token, url, form_body) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}
