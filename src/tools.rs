use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::json;

use crate::error::SmsGraphError;
use crate::graph::{CalendarEvent, Contact, GraphApi, MailDraft, NewEvent};
use crate::llm_types::ToolDefinition;
use crate::text::{join_first, truncate_chars};

const MAX_SUMMARY_ITEMS: usize = 3;
const MAX_SUMMARY_CHARS: usize = 400;

/// Schemas handed to the model on every completion.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_calendar_events".into(),
            description: "Get upcoming calendar events for the user".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "days_ahead": {
                        "type": "number",
                        "description": "Number of days ahead to look (default 7)"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "create_calendar_event".into(),
            description: "Create a new calendar event".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Event title"},
                    "startTime": {
                        "type": "string",
                        "description": "Start time in ISO format (e.g. 2026-08-27T14:00:00)"
                    },
                    "endTime": {
                        "type": "string",
                        "description": "End time in ISO format"
                    },
                    "description": {"type": "string", "description": "Event description"},
                    "attendees": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Attendee email addresses"
                    }
                },
                "required": ["title", "startTime", "endTime"]
            }),
        },
        ToolDefinition {
            name: "send_email".into(),
            description: "Send an email on behalf of the user".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Recipient email addresses"
                    },
                    "subject": {"type": "string", "description": "Email subject"},
                    "body": {"type": "string", "description": "Email body"},
                    "cc": {"type": "array", "items": {"type": "string"}},
                    "bcc": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["to", "subject", "body"]
            }),
        },
        ToolDefinition {
            name: "get_contacts".into(),
            description: "Get the user's contacts".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "number",
                        "description": "Maximum number of contacts to return (default 10)"
                    }
                }
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct GetEventsArgs {
    #[serde(default)]
    days_ahead: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateEventArgs {
    title: String,
    #[serde(rename = "startTime")]
    start_time: String,
    #[serde(rename = "endTime")]
    end_time: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    attendees: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SendEmailArgs {
    to: Vec<String>,
    subject: String,
    body: String,
    #[serde(default)]
    cc: Vec<String>,
    #[serde(default)]
    bcc: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GetContactsArgs {
    #[serde(default)]
    limit: Option<usize>,
}

fn parse_args<T: serde::de::DeserializeOwned>(
    name: &str,
    arguments: &str,
) -> Result<T, SmsGraphError> {
    serde_json::from_str(arguments)
        .map_err(|e| SmsGraphError::MalformedToolArguments(format!("{name}: {e}")))
}

/// The wire format carries events as local wall-clock with fractional
/// seconds; show just the clock time, or the raw string if unparseable.
fn format_event_time(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn summarize_events(events: &[CalendarEvent]) -> String {
    if events.is_empty() {
        return "No upcoming events found.".into();
    }
    let lines = events
        .iter()
        .map(|e| format!("{} at {}", e.subject, format_event_time(&e.start.date_time)));
    join_first(lines, MAX_SUMMARY_ITEMS, "; ")
}

fn summarize_contacts(contacts: &[Contact]) -> String {
    if contacts.is_empty() {
        return "No contacts found.".into();
    }
    let names = contacts.iter().map(|c| {
        c.display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                c.email_addresses
                    .first()
                    .and_then(|e| e.address.clone())
            })
            .unwrap_or_else(|| "(unnamed)".into())
    });
    join_first(names, MAX_SUMMARY_ITEMS, ", ")
}

/// Runs one tool call and renders its result as a short plain-text summary
/// suitable for feeding back into the conversation.
pub async fn dispatch(
    graph: &Arc<dyn GraphApi>,
    name: &str,
    arguments: &str,
) -> Result<String, SmsGraphError> {
    let summary = match name {
        "get_calendar_events" => {
            let args: GetEventsArgs = parse_args(name, arguments)?;
            let events = graph.list_upcoming_events(args.days_ahead.unwrap_or(7)).await?;
            summarize_events(&events)
        }
        "create_calendar_event" => {
            let args: CreateEventArgs = parse_args(name, arguments)?;
            let title = args.title.clone();
            graph
                .create_event(NewEvent {
                    title: args.title,
                    start_time: args.start_time,
                    end_time: args.end_time,
                    description: args.description,
                    attendees: args.attendees,
                })
                .await?;
            format!("Event \"{title}\" created successfully.")
        }
        "send_email" => {
            let args: SendEmailArgs = parse_args(name, arguments)?;
            let to = args.to.clone();
            graph
                .send_mail(MailDraft {
                    to: args.to,
                    subject: args.subject,
                    body: args.body,
                    cc: args.cc,
                    bcc: args.bcc,
                })
                .await?;
            format!("Email sent to {}.", to.join(", "))
        }
        "get_contacts" => {
            let args: GetContactsArgs = parse_args(name, arguments)?;
            let contacts = graph.list_contacts(args.limit.unwrap_or(10)).await?;
            summarize_contacts(&contacts)
        }
        other => format!("Unknown tool: {other}"),
    };
    Ok(truncate_chars(&summary, MAX_SUMMARY_CHARS))
}
