//! Alert sinks
//!
//! A sink is anything that can receive a rendered [`AlertEvent`]. Two HTTP
//! implementations ship with the hub: Discord embeds and a generic JSON
//! webhook. Each configured sink carries a filter deciding which alerts it
//! wants.

pub mod discord;
pub mod webhook;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{AlertEvent, EventType};

pub use discord::DiscordSink;
pub use webhook::WebhookSink;

/// Why a single delivery attempt failed
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Endpoint answered with a non-success status
    Status { code: u16, body: String },

    /// Request never got a response (DNS, connect, TLS, ...)
    Transport(String),

    /// Attempt exceeded the delivery timeout
    Timeout(Duration),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Status { code, body } if body.is_empty() => {
                write!(f, "delivery failed with status {code}")
            }
            DeliveryError::Status { code, body } => {
                write!(f, "delivery failed with status {code}: {body}")
            }
            DeliveryError::Transport(msg) => write!(f, "delivery failed: {msg}"),
            DeliveryError::Timeout(after) => write!(f, "delivery timed out after {after:?}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

/// Destination for alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Attempt one delivery. Never retried by the caller.
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Discord,
    #[default]
    Webhook,
}

/// Sink entry of the hub configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub name: String,
    pub url: String,

    #[serde(default)]
    pub kind: SinkKind,

    /// Discord user to mention in the message content
    pub user_id: Option<String>,

    #[serde(flatten)]
    pub filter: SinkFilter,
}

/// Which alerts a sink receives
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SinkFilter {
    /// Entity key patterns: `*` matches everything, a trailing `*` is a
    /// prefix match, anything else is exact. All comparisons ignore case.
    #[serde(default = "default_entities")]
    pub entities: Vec<String>,

    #[serde(default = "default_events")]
    pub events: Vec<EventType>,
}

impl Default for SinkFilter {
    fn default() -> Self {
        Self {
            entities: default_entities(),
            events: default_events(),
        }
    }
}

fn default_entities() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_events() -> Vec<EventType> {
    vec![EventType::Online, EventType::Offline, EventType::NewEntity]
}

impl SinkFilter {
    pub fn matches(&self, alert: &AlertEvent) -> bool {
        self.events.contains(&alert.event_type)
            && self
                .entities
                .iter()
                .any(|pattern| pattern_matches(pattern, &alert.entity_key))
    }
}

/// Match one entity key against one filter pattern
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let key = key.to_lowercase();
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(&prefix.to_lowercase()),
        None => key == pattern.to_lowercase(),
    }
}

/// A sink ready for the dispatcher
#[derive(Clone)]
pub struct RegisteredSink {
    pub name: String,
    pub filter: SinkFilter,
    pub sink: Arc<dyn AlertSink>,
}

impl fmt::Debug for RegisteredSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredSink")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl RegisteredSink {
    pub fn new(name: impl ToString, filter: SinkFilter, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            name: name.to_string(),
            filter,
            sink,
        }
    }

    /// Build the HTTP sink described by `config`
    pub fn from_config(config: &SinkConfig, client: Client) -> Self {
        let sink: Arc<dyn AlertSink> = match config.kind {
            SinkKind::Discord => Arc::new(DiscordSink::new(
                client,
                config.url.clone(),
                config.user_id.clone(),
            )),
            SinkKind::Webhook => Arc::new(WebhookSink::new(client, config.url.clone())),
        };

        Self::new(&config.name, config.filter.clone(), sink)
    }
}

/// Map a response to the delivery outcome
pub(crate) async fn check_response(response: reqwest::Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Status {
        code: status.as_u16(),
        body,
    })
}
