use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{AlertSink, DeliveryError, check_response};
use crate::{AlertEvent, EventType};

/// Generic JSON webhook sink
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

fn format_message(alert: &AlertEvent) -> String {
    let key = &alert.entity_key;
    let entity_type = alert.entity_type;
    match alert.event_type {
        EventType::Offline => format!("🔴 **Offline**: {entity_type} `{key}` stopped reporting"),
        EventType::Online => format!("✅ **Online**: {entity_type} `{key}` is reporting again"),
        EventType::NewEntity => format!("🆕 **New**: first report from {entity_type} `{key}`"),
    }
}

/// JSON body posted for one alert
pub fn build_payload(alert: &AlertEvent) -> Value {
    json!({
        "message": format_message(alert),
        "entity_key": alert.entity_key,
        "entity_type": alert.entity_type,
        "event": alert.event_type,
        "occurred_at": alert.occurred_at,
        "context": alert.context,
        "timestamp": Utc::now().to_rfc3339()
    })
}

#[async_trait]
impl AlertSink for WebhookSink {
    #[instrument(skip_all, fields(entity = %alert.entity_key, event = %alert.event_type))]
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&build_payload(alert))
            .send()
            .await?;
        check_response(response).await?;
        debug!("sent webhook alert");
        Ok(())
    }
}
