use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::auth::OAuthClient;
use crate::config::Config;
use crate::error::SmsGraphError;
use crate::graph::{GraphApi, DEFAULT_PRINCIPAL};
use crate::orchestrator::Orchestrator;
use crate::store::{CredentialRecord, CredentialStore};
use crate::subscriptions::SubscriptionManager;
use crate::text::truncate_chars;
use crate::twilio::{validate_signature, SmsSender};

const EMPTY_TWIML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";
const APOLOGY_REPLY: &str =
    "Sorry, an error occurred processing your message. Please try again.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub oauth: Arc<OAuthClient>,
    pub graph: Arc<dyn GraphApi>,
    pub sms: Arc<dyn SmsSender>,
    pub orchestrator: Arc<Orchestrator>,
    pub credentials: Arc<dyn CredentialStore>,
    pub subscriptions: Arc<SubscriptionManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/microsoft", get(auth_redirect))
        .route("/auth/callback", get(auth_callback))
        .route("/sms", post(inbound_sms))
        .route("/webhooks/graph", post(graph_webhook))
        .route(
            "/webhooks/graph/subscribe",
            post(subscribe_create).get(subscribe_list).patch(subscribe_renew),
        )
        .with_state(state)
}

fn upstream_failure(e: SmsGraphError) -> (StatusCode, String) {
    match e {
        SmsGraphError::Unauthenticated => (StatusCode::UNAUTHORIZED, e.to_string()),
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

// --- OAuth flow ---

async fn auth_redirect(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.oauth.authorize_url())
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn auth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<String, (StatusCode, String)> {
    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or_default();
        return Err((
            StatusCode::BAD_REQUEST,
            format!("authorization failed: {error} {detail}"),
        ));
    }
    let code = query
        .code
        .ok_or((StatusCode::BAD_REQUEST, "missing code parameter".into()))?;

    let tokens = state.oauth.exchange_code(&code).await.map_err(upstream_failure)?;
    let refresh_token = tokens.refresh_token.ok_or((
        StatusCode::BAD_GATEWAY,
        "identity provider did not issue a refresh token; check offline_access scope".into(),
    ))?;

    state
        .credentials
        .put(&CredentialRecord {
            principal_id: DEFAULT_PRINCIPAL.into(),
            access_token: tokens.access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in),
        })
        .map_err(upstream_failure)?;

    info!("delegated credential stored for {DEFAULT_PRINCIPAL}");
    Ok("Authentication successful. You can close this window.".into())
}

// --- Inbound SMS ---

#[derive(Debug, Deserialize)]
struct InboundSms {
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "Body")]
    body: String,
    #[serde(rename = "MessageSid")]
    message_sid: String,
}

async fn inbound_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, (StatusCode, String)> {
    let signature = headers
        .get("X-Twilio-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let callback_url = state.config.sms_callback_url();
    if !validate_signature(&state.config.twilio_auth_token, signature, &callback_url, &body) {
        if state.config.enforce_twilio_signature {
            warn!("rejecting SMS webhook with invalid signature");
            return Err((StatusCode::FORBIDDEN, "invalid signature".into()));
        }
        warn!("SMS webhook signature invalid, continuing (enforcement disabled)");
    }

    let inbound: InboundSms = serde_urlencoded::from_str(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed form body: {e}")))?;
    info!("inbound SMS {} from {}", inbound.message_sid, inbound.from);

    // Ack the webhook immediately; the reply goes out over the REST API.
    tokio::spawn(async move {
        process_inbound(state, inbound.from, inbound.body).await;
    });

    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        EMPTY_TWIML,
    )
        .into_response())
}

async fn process_inbound(state: AppState, from: String, text: String) {
    let reply = match state.orchestrator.handle_message(&text).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("failed to process inbound SMS: {e}");
            APOLOGY_REPLY.to_string()
        }
    };
    if let Err(e) = state.sms.send_sms(&from, &reply).await {
        error!("failed to send SMS reply: {e}");
        if reply != APOLOGY_REPLY {
            if let Err(e) = state.sms.send_sms(&from, APOLOGY_REPLY).await {
                error!("failed to send apology SMS: {e}");
            }
        }
    }
}

// --- Graph change notifications ---

#[derive(Debug, Deserialize)]
struct GraphWebhookPayload {
    #[serde(rename = "validationTokens", default)]
    validation_tokens: Vec<String>,
    #[serde(default)]
    value: Vec<GraphNotification>,
}

#[derive(Debug, Deserialize)]
struct GraphNotification {
    #[serde(rename = "changeType", default)]
    change_type: String,
    #[serde(rename = "clientState", default)]
    client_state: String,
    #[serde(rename = "subscriptionId", default)]
    subscription_id: String,
    #[serde(default)]
    resource: String,
    #[serde(rename = "resourceData", default)]
    resource_data: Option<ResourceData>,
}

#[derive(Debug, Deserialize)]
struct ResourceData {
    #[serde(default)]
    subject: Option<String>,
}

async fn graph_webhook(
    State(state): State<AppState>,
    Json(payload): Json<GraphWebhookPayload>,
) -> Response {
    // Subscription handshake: echo the token back, nothing else.
    if let Some(token) = payload.validation_tokens.first() {
        info!("answering subscription validation handshake");
        return ([(header::CONTENT_TYPE, "text/plain")], token.clone()).into_response();
    }

    for notification in &payload.value {
        if notification.client_state != state.config.client_state {
            warn!(
                "dropping notification for {} with unexpected client state",
                notification.subscription_id
            );
            continue;
        }
        if let Err(e) = process_notification(&state, notification).await {
            error!(
                "error processing notification for {}: {e}",
                notification.subscription_id
            );
        }
    }

    StatusCode::ACCEPTED.into_response()
}

async fn process_notification(
    state: &AppState,
    notification: &GraphNotification,
) -> Result<(), SmsGraphError> {
    if notification.change_type != "created"
        || !notification.resource.to_lowercase().contains("messages")
    {
        return Ok(());
    }
    let Some(alert_number) = &state.config.alert_phone_number else {
        warn!("new mail notification received but no alert phone number configured");
        return Ok(());
    };

    let subject = notification
        .resource_data
        .as_ref()
        .and_then(|d| d.subject.clone())
        .unwrap_or_else(|| "New Email".into());
    let alert = format!("New email: {}", truncate_chars(&subject, 100));
    state.sms.send_sms(alert_number, &alert).await?;
    info!("new mail alert sent for {}", notification.subscription_id);
    Ok(())
}

// --- Subscription management ---

async fn subscribe_create(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let record = state.subscriptions.create().await.map_err(upstream_failure)?;
    Ok(Json(json!({
        "success": true,
        "subscriptionId": record.subscription_id,
        "resource": record.resource,
        "expirationDateTime": record.expires_at.to_rfc3339(),
        "message": "Successfully subscribed to email notifications",
    })))
}

async fn subscribe_list(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let upstream = state.graph.list_subscriptions().await.map_err(upstream_failure)?;
    let due = state.subscriptions.renew_due().map_err(upstream_failure)?;
    Ok(Json(json!({
        "subscriptions": upstream
            .iter()
            .map(|s| json!({
                "id": s.id,
                "resource": s.resource,
                "changeType": s.change_type,
                "notificationUrl": s.notification_url,
                "expirationDateTime": s.expiration_date_time,
                "clientState": s.client_state,
            }))
            .collect::<Vec<_>>(),
        "renewalRequired": !due.is_empty(),
        "renewalCount": due.len(),
    })))
}

async fn subscribe_renew(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let due = state.subscriptions.renew_due().map_err(upstream_failure)?;
    let mut renewed = Vec::new();
    for record in due {
        match state.subscriptions.renew(&record.subscription_id).await {
            Ok(_) => renewed.push(record.subscription_id),
            Err(e) => error!("failed to renew subscription {}: {e}", record.subscription_id),
        }
    }
    Ok(Json(json!({
        "success": true,
        "renewedCount": renewed.len(),
        "renewedIds": renewed,
        "message": format!("{} subscription(s) renewed", renewed.len()),
    })))
}
