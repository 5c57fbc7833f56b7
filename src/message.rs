//! Message validation and routing
//!
//! Decrypted plaintext is a JSON object. Every message carries a sender
//! `timestamp`; the optional `type` field selects the message kind and with it
//! the set of required fields. A missing `type` means a legacy heartbeat.
//!
//! ```text
//! plaintext → parse object → timestamp present → fresh → kind → required fields → RoutedMessage
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::EntityType;
use crate::error::{IngestError, IngestResult};

/// Default freshness window in seconds
pub const DEFAULT_MAX_MESSAGE_AGE: i64 = 300;

/// Cap on list-valued heartbeat fields (resource bound, not a validation rule)
pub const MAX_NETWORK_INTERFACES: usize = 5;

/// Kind of a validated message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Heartbeat,
    Ping,
    Monitoring,
    Unifi,
}

impl MessageKind {
    fn from_type_field(field: Option<&Value>) -> IngestResult<Self> {
        match field {
            None | Some(Value::Null) => Ok(MessageKind::Heartbeat),
            Some(Value::String(kind)) => match kind.as_str() {
                "heartbeat" => Ok(MessageKind::Heartbeat),
                "ping" => Ok(MessageKind::Ping),
                "monitoring" => Ok(MessageKind::Monitoring),
                "unifi" => Ok(MessageKind::Unifi),
                other => Err(IngestError::MalformedPayload(format!(
                    "unknown message type `{other}`"
                ))),
            },
            Some(_) => Err(IngestError::MalformedPayload(
                "`type` must be a string".to_string(),
            )),
        }
    }

    /// Required top-level fields and whether each must be a string or an array
    fn required_fields(self) -> &'static [(&'static str, FieldShape)] {
        match self {
            MessageKind::Heartbeat => &[("name", FieldShape::String)],
            MessageKind::Ping => &[("name", FieldShape::String), ("results", FieldShape::Array)],
            MessageKind::Monitoring => &[("results", FieldShape::Array)],
            MessageKind::Unifi => &[("clients", FieldShape::Array)],
        }
    }

    fn missing_fields(self, object: &Map<String, Value>) -> Vec<&'static str> {
        self.required_fields()
            .iter()
            .filter(|(field, shape)| !object.get(*field).is_some_and(|v| shape.matches(v)))
            .map(|(field, _)| *field)
            .collect()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Heartbeat => write!(f, "heartbeat"),
            MessageKind::Ping => write!(f, "ping"),
            MessageKind::Monitoring => write!(f, "monitoring"),
            MessageKind::Unifi => write!(f, "unifi"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldShape {
    String,
    Array,
}

impl FieldShape {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldShape::String => value.is_string(),
            FieldShape::Array => value.is_array(),
        }
    }
}

/// Legacy heartbeat sent by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub name: String,
    pub timestamp: i64,
    #[serde(default)]
    pub network_interfaces: Vec<Value>,

    /// Everything else the agent reported, kept for rendering
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a remote ping sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReport {
    /// Name of the prober that ran the sweep
    pub name: String,
    pub timestamp: i64,
    pub results: Vec<PingResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub ip: String,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Result of web/file checks run by a remote monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReport {
    #[serde(default)]
    pub name: Option<String>,
    pub timestamp: i64,
    pub results: Vec<MonitorResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub target: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Batch of LAN clients reported by a UniFi controller poller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiReport {
    #[serde(default)]
    pub name: Option<String>,
    pub timestamp: i64,
    pub clients: Vec<UnifiClient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiClient {
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A validated message, dispatched by kind
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedMessage {
    Heartbeat(Heartbeat),
    Ping(PingReport),
    Monitoring(MonitoringReport),
    Unifi(UnifiReport),
}

/// One liveness observation for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub entity_key: String,
    pub entity_type: EntityType,

    /// Timestamp claimed by the sender
    pub device_timestamp: i64,

    /// Local receive time
    pub received_at: i64,

    pub kind: MessageKind,

    /// Kind-specific body, opaque to the engine
    pub payload: Value,
}

impl RoutedMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            RoutedMessage::Heartbeat(_) => MessageKind::Heartbeat,
            RoutedMessage::Ping(_) => MessageKind::Ping,
            RoutedMessage::Monitoring(_) => MessageKind::Monitoring,
            RoutedMessage::Unifi(_) => MessageKind::Unifi,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            RoutedMessage::Heartbeat(m) => m.timestamp,
            RoutedMessage::Ping(m) => m.timestamp,
            RoutedMessage::Monitoring(m) => m.timestamp,
            RoutedMessage::Unifi(m) => m.timestamp,
        }
    }

    /// Fan the message out into per-entity samples
    ///
    /// Unreachable ping targets and failed checks are not liveness evidence
    /// and produce no sample.
    pub fn samples(&self, received_at: i64) -> Vec<Sample> {
        let kind = self.kind();
        let device_timestamp = self.timestamp();
        let sample = |entity_key: &str, entity_type: EntityType, payload: Value| Sample {
            entity_key: entity_key.to_string(),
            entity_type,
            device_timestamp,
            received_at,
            kind,
            payload,
        };

        match self {
            RoutedMessage::Heartbeat(heartbeat) => {
                let payload = serde_json::to_value(heartbeat).unwrap_or(Value::Null);
                vec![sample(&heartbeat.name, EntityType::Device, payload)]
            }
            RoutedMessage::Ping(report) => report
                .results
                .iter()
                .filter(|result| result.alive)
                .map(|result| {
                    let payload = json!({
                        "monitor": report.name,
                        "name": result.name,
                        "response_time_ms": result.response_time_ms,
                    });
                    sample(&result.ip, EntityType::PingTarget, payload)
                })
                .collect(),
            RoutedMessage::Monitoring(report) => report
                .results
                .iter()
                .filter(|result| result.ok)
                .map(|result| {
                    let payload = json!({
                        "monitor": report.name,
                        "response_time_ms": result.response_time_ms,
                        "message": result.message,
                    });
                    sample(&result.target, EntityType::Monitor, payload)
                })
                .collect(),
            RoutedMessage::Unifi(report) => report
                .clients
                .iter()
                .map(|client| {
                    let payload = json!({
                        "controller": report.name,
                        "hostname": client.hostname,
                        "ip": client.ip,
                    });
                    sample(&client.mac, EntityType::UnifiClient, payload)
                })
                .collect(),
        }
    }
}

/// Check a sender timestamp against the local clock
///
/// Accepted iff `|now - timestamp| < max_age`. The window is symmetric, so a
/// sender whose clock runs far ahead is rejected just like a stale replay.
pub fn check_freshness(timestamp: i64, now: i64, max_age: i64) -> IngestResult<()> {
    if now.abs_diff(timestamp) < max_age.unsigned_abs() {
        Ok(())
    } else {
        Err(IngestError::Stale { timestamp, now })
    }
}

/// Validate decrypted plaintext and dispatch it by kind
pub fn route(plaintext: &[u8], now: i64, max_age: i64) -> IngestResult<RoutedMessage> {
    let value: Value = serde_json::from_slice(plaintext)?;
    let Value::Object(object) = value else {
        return Err(IngestError::MalformedPayload(
            "expected a JSON object".to_string(),
        ));
    };

    let timestamp = match object.get("timestamp") {
        None | Some(Value::Null) => return Err(IngestError::MissingFields(vec!["timestamp"])),
        Some(value) => parse_timestamp(value)?,
    };

    check_freshness(timestamp, now, max_age)?;

    let kind = MessageKind::from_type_field(object.get("type"))?;

    let missing = kind.missing_fields(&object);
    if !missing.is_empty() {
        return Err(IngestError::MissingFields(missing));
    }

    let mut object = object;
    object.remove("type");
    // Normalize fractional timestamps so typed decoding sees an integer.
    object.insert("timestamp".to_string(), Value::from(timestamp));
    let value = Value::Object(object);

    let message = match kind {
        MessageKind::Heartbeat => {
            let mut heartbeat: Heartbeat = serde_json::from_value(value)?;
            heartbeat.network_interfaces.truncate(MAX_NETWORK_INTERFACES);
            RoutedMessage::Heartbeat(heartbeat)
        }
        MessageKind::Ping => RoutedMessage::Ping(serde_json::from_value(value)?),
        MessageKind::Monitoring => RoutedMessage::Monitoring(serde_json::from_value(value)?),
        MessageKind::Unifi => RoutedMessage::Unifi(serde_json::from_value(value)?),
    };

    Ok(message)
}

fn parse_timestamp(value: &Value) -> IngestResult<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
        .ok_or_else(|| IngestError::MalformedPayload("`timestamp` must be a number".to_string()))
}
