use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{AlertSink, DeliveryError, check_response};
use crate::{AlertEvent, EntityType, EventType};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

/// Discord webhook sink rendering alerts as embeds
#[derive(Debug, Clone)]
pub struct DiscordSink {
    client: Client,
    url: String,
    user_id: Option<String>,
}

impl DiscordSink {
    pub fn new(client: Client, url: String, user_id: Option<String>) -> Self {
        Self {
            client,
            url,
            user_id,
        }
    }

    pub fn build_message(&self, alert: &AlertEvent) -> Message {
        let mut builder = MessageBuilder::new().add_embed(build_embed(alert));
        if let Some(user_id) = &self.user_id {
            builder = builder.content(format!(
                "{} `{}` <@{user_id}>",
                event_emoji(alert.event_type),
                alert.entity_key
            ));
        }
        builder.build()
    }
}

fn event_emoji(event: EventType) -> &'static str {
    match event {
        EventType::Offline => "🔴",
        EventType::Online => "✅",
        EventType::NewEntity => "🆕",
    }
}

fn entity_label(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Device => "Device",
        EntityType::PingTarget => "Ping target",
        EntityType::Monitor => "Monitor",
        EntityType::UnifiClient => "LAN client",
    }
}

fn format_epoch(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|t| t.to_rfc3339())
}

pub fn build_embed(alert: &AlertEvent) -> Embed {
    let label = entity_label(alert.entity_type);
    let key = &alert.entity_key;

    let (title, description, color) = match alert.event_type {
        EventType::Offline => (
            format!("🔴 {label} Offline"),
            format!("{label} **{key}** stopped reporting"),
            RED,
        ),
        EventType::Online => (
            format!("✅ {label} Online"),
            format!("{label} **{key}** is reporting again"),
            GREEN,
        ),
        EventType::NewEntity => (
            format!("🆕 New {label}"),
            format!("First report from {} **{key}**", label.to_lowercase()),
            LIGHT_BLUE,
        ),
    };

    let mut fields = vec![EmbedField {
        name: "Type".to_string(),
        value: alert.entity_type.to_string(),
        inline: true,
    }];

    if let Some(last_seen) = alert.context.get("last_seen").and_then(|v| v.as_i64())
        && let Some(formatted) = format_epoch(last_seen)
    {
        fields.push(EmbedField {
            name: "Last seen".to_string(),
            value: formatted,
            inline: true,
        });
    }

    Embed {
        title: Some(title),
        description: Some(description),
        color: Some(color),
        fields,
        footer: Some(EmbedFooter {
            text: format!("{} | {}", key, alert.event_type),
        }),
        timestamp: format_epoch(alert.occurred_at),
    }
}

#[async_trait]
impl AlertSink for DiscordSink {
    #[instrument(skip_all, fields(entity = %alert.entity_key, event = %alert.event_type))]
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), DeliveryError> {
        let message = self.build_message(alert);
        let response = self.client.post(&self.url).json(&message).send().await?;
        check_response(response).await?;
        debug!("sent Discord message");
        Ok(())
    }
}
