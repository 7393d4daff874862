use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::OAuthClient;
use crate::config::Config;
use crate::error::SmsGraphError;
use crate::store::{CredentialRecord, CredentialStore, SubscriptionRecord, SubscriptionStore};

const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Safety margin before the stored expiry at which a token is treated as
/// stale, covering clock drift and in-flight latency.
pub const TOKEN_REFRESH_SKEW_SECS: i64 = 5 * 60;

/// Single-tenant deployments key everything under this principal.
pub const DEFAULT_PRINCIPAL: &str = "default";

// --- Graph wire types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone", default)]
    pub time_zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: String,
    pub start: EventTime,
    pub end: EventTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEmail {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "emailAddresses", default)]
    pub email_addresses: Vec<ContactEmail>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub description: Option<String>,
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MailDraft {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub resource: String,
    pub notification_url: String,
    pub change_type: String,
    pub ttl_minutes: i64,
    pub client_state: String,
}

/// Subscription as reported by the upstream; `expiration_date_time` is the
/// value the upstream confirmed, never a locally computed one.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSubscription {
    pub id: String,
    #[serde(default)]
    pub resource: String,
    #[serde(rename = "changeType", default)]
    pub change_type: Option<String>,
    #[serde(rename = "notificationUrl", default)]
    pub notification_url: Option<String>,
    #[serde(rename = "expirationDateTime")]
    pub expiration_date_time: String,
    #[serde(rename = "clientState", default)]
    pub client_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

// --- API seam ---

#[async_trait]
pub trait GraphApi: Send + Sync {
    async fn list_upcoming_events(
        &self,
        days_ahead: i64,
    ) -> Result<Vec<CalendarEvent>, SmsGraphError>;
    async fn create_event(&self, event: NewEvent) -> Result<CalendarEvent, SmsGraphError>;
    async fn send_mail(&self, draft: MailDraft) -> Result<(), SmsGraphError>;
    async fn list_contacts(&self, limit: usize) -> Result<Vec<Contact>, SmsGraphError>;
    async fn create_subscription(
        &self,
        req: NewSubscription,
    ) -> Result<SubscriptionRecord, SmsGraphError>;
    async fn renew_subscription(
        &self,
        subscription_id: &str,
        ttl_minutes: i64,
    ) -> Result<SubscriptionRecord, SmsGraphError>;
    async fn list_subscriptions(&self) -> Result<Vec<GraphSubscription>, SmsGraphError>;
}

pub struct GraphClient {
    http: reqwest::Client,
    oauth: Arc<OAuthClient>,
    credentials: Arc<dyn CredentialStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    base_url: String,
    /// Serializes refresh attempts so concurrent callers near expiry do one
    /// refresh instead of racing. Held only for the duration of the refresh.
    refresh_lock: tokio::sync::Mutex<()>,
}

fn needs_refresh(record: &CredentialRecord, now: DateTime<Utc>) -> bool {
    now >= record.expires_at - Duration::seconds(TOKEN_REFRESH_SKEW_SECS)
}

fn bearer(record: &CredentialRecord) -> String {
    format!("Bearer {}", record.access_token)
}

impl GraphClient {
    pub fn new(
        config: &Config,
        oauth: Arc<OAuthClient>,
        credentials: Arc<dyn CredentialStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Result<Self, SmsGraphError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| SmsGraphError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(GraphClient {
            http,
            oauth,
            credentials,
            subscriptions,
            base_url: config
                .graph_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.into()),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Bearer value guaranteed fresh for at least the skew window. Refreshes
    /// through the token endpoint when the stored expiry is near; a failed
    /// refresh leaves the stored record untouched so the next call can retry
    /// with the same refresh token.
    pub async fn auth_header(&self, principal_id: &str) -> Result<String, SmsGraphError> {
        let record = self
            .credentials
            .get(principal_id)?
            .ok_or(SmsGraphError::Unauthenticated)?;

        if !needs_refresh(&record, Utc::now()) {
            return Ok(bearer(&record));
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited on the lock.
        let record = self
            .credentials
            .get(principal_id)?
            .ok_or(SmsGraphError::Unauthenticated)?;
        if !needs_refresh(&record, Utc::now()) {
            return Ok(bearer(&record));
        }

        info!("access token near expiry for {principal_id}, refreshing");
        let tokens = self.oauth.refresh(&record.refresh_token).await?;
        let updated = CredentialRecord {
            principal_id: record.principal_id.clone(),
            access_token: tokens.access_token,
            // The upstream rotates the refresh token on some responses only
            refresh_token: tokens.refresh_token.unwrap_or(record.refresh_token),
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in),
        };
        self.credentials.put(&updated)?;
        info!(
            "access token refreshed for {principal_id}, expires at {}",
            updated.expires_at
        );
        Ok(bearer(&updated))
    }

    async fn response_error(response: reqwest::Response) -> SmsGraphError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            SmsGraphError::Transient(format!("Graph HTTP {status}: {body}"))
        } else {
            SmsGraphError::UpstreamRejected {
                status: status.as_u16(),
                body,
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<T, SmsGraphError> {
        let auth = self.auth_header(DEFAULT_PRINCIPAL).await?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path_and_query))
            .header("Authorization", auth)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, SmsGraphError> {
        let auth = self.auth_header(DEFAULT_PRINCIPAL).await?;
        let response = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", auth)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        Ok(response)
    }

    fn confirmed_expiry(sub: &GraphSubscription) -> Result<DateTime<Utc>, SmsGraphError> {
        DateTime::parse_from_rfc3339(&sub.expiration_date_time)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                SmsGraphError::InvalidRecord(format!(
                    "unparseable expirationDateTime {:?}: {e}",
                    sub.expiration_date_time
                ))
            })
    }
}

#[async_trait]
impl GraphApi for GraphClient {
    async fn list_upcoming_events(
        &self,
        days_ahead: i64,
    ) -> Result<Vec<CalendarEvent>, SmsGraphError> {
        let now = Utc::now();
        let end = now + Duration::days(days_ahead.max(1));
        let path = format!(
            "/me/calendarview?startDateTime={}&endDateTime={}",
            urlencoding::encode(&now.to_rfc3339()),
            urlencoding::encode(&end.to_rfc3339()),
        );
        let list: GraphList<CalendarEvent> = self.get_json(&path).await?;
        info!("retrieved {} calendar events", list.value.len());
        Ok(list.value)
    }

    async fn create_event(&self, event: NewEvent) -> Result<CalendarEvent, SmsGraphError> {
        let attendees: Vec<serde_json::Value> = event
            .attendees
            .iter()
            .map(|email| json!({"emailAddress": {"address": email}, "type": "required"}))
            .collect();
        let body = json!({
            "subject": event.title,
            "start": {"dateTime": event.start_time, "timeZone": "UTC"},
            "end": {"dateTime": event.end_time, "timeZone": "UTC"},
            "body": {"contentType": "HTML", "content": event.description.unwrap_or_default()},
            "attendees": attendees,
        });
        let response = self
            .send_json(reqwest::Method::POST, "/me/events", &body)
            .await?;
        let text = response.text().await?;
        let created: CalendarEvent = serde_json::from_str(&text)?;
        info!("calendar event created: {:?}", created.id);
        Ok(created)
    }

    async fn send_mail(&self, draft: MailDraft) -> Result<(), SmsGraphError> {
        let recipients =
            |list: &[String]| -> Vec<serde_json::Value> {
                list.iter()
                    .map(|email| json!({"emailAddress": {"address": email}}))
                    .collect()
            };
        let body = json!({
            "message": {
                "subject": draft.subject,
                "body": {"contentType": "HTML", "content": draft.body},
                "toRecipients": recipients(&draft.to),
                "ccRecipients": recipients(&draft.cc),
                "bccRecipients": recipients(&draft.bcc),
            }
        });
        self.send_json(reqwest::Method::POST, "/me/sendMail", &body)
            .await?;
        info!("email sent to {}", draft.to.join(", "));
        Ok(())
    }

    async fn list_contacts(&self, limit: usize) -> Result<Vec<Contact>, SmsGraphError> {
        let list: GraphList<Contact> = self
            .get_json(&format!("/me/contacts?$top={limit}"))
            .await?;
        info!("retrieved {} contacts", list.value.len());
        Ok(list.value)
    }

    async fn create_subscription(
        &self,
        req: NewSubscription,
    ) -> Result<SubscriptionRecord, SmsGraphError> {
        let requested_expiry = Utc::now() + Duration::minutes(req.ttl_minutes);
        let body = json!({
            "changeType": req.change_type,
            "notificationUrl": req.notification_url,
            "resource": req.resource,
            "expirationDateTime": requested_expiry.to_rfc3339(),
            "clientState": req.client_state,
        });
        let response = self
            .send_json(reqwest::Method::POST, "/subscriptions", &body)
            .await?;
        let text = response.text().await?;
        let confirmed: GraphSubscription = serde_json::from_str(&text)?;

        let record = SubscriptionRecord {
            subscription_id: confirmed.id.clone(),
            resource: confirmed.resource.clone(),
            expires_at: Self::confirmed_expiry(&confirmed)?,
            created_at: Utc::now(),
        };
        self.subscriptions.save(&record)?;
        info!("subscription created: {}", record.subscription_id);
        Ok(record)
    }

    async fn renew_subscription(
        &self,
        subscription_id: &str,
        ttl_minutes: i64,
    ) -> Result<SubscriptionRecord, SmsGraphError> {
        let requested_expiry = Utc::now() + Duration::minutes(ttl_minutes);
        let body = json!({ "expirationDateTime": requested_expiry.to_rfc3339() });
        let response = self
            .send_json(
                reqwest::Method::PATCH,
                &format!("/subscriptions/{subscription_id}"),
                &body,
            )
            .await?;
        let text = response.text().await?;
        let confirmed: GraphSubscription = serde_json::from_str(&text)?;
        let expires_at = Self::confirmed_expiry(&confirmed)?;

        let record = match self.subscriptions.get(subscription_id)? {
            Some(mut existing) => {
                existing.expires_at = expires_at;
                self.subscriptions
                    .update_expiry(subscription_id, expires_at)?;
                existing
            }
            // Renewal of a subscription the store never saw (e.g. created
            // by a previous deployment); adopt it.
            None => {
                let record = SubscriptionRecord {
                    subscription_id: confirmed.id.clone(),
                    resource: confirmed.resource.clone(),
                    expires_at,
                    created_at: Utc::now(),
                };
                self.subscriptions.save(&record)?;
                record
            }
        };
        info!("subscription renewed: {subscription_id}");
        Ok(record)
    }

    async fn list_subscriptions(&self) -> Result<Vec<GraphSubscription>, SmsGraphError> {
        let list: GraphList<GraphSubscription> = self.get_json("/subscriptions").await?;
        info!("retrieved {} subscriptions", list.value.len());
        Ok(list.value)
    }
}
