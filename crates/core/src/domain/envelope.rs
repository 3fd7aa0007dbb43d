use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const NO_EVIDENCE: &str = "No evidence provided";

/// A single message sent from the bot to the dashboard collector.
///
/// The wire form is one JSON object per message with a `type` discriminator.
/// Registration is flat; every other kind nests its record under a key named
/// after the record (`activity`, `report`, `appeal`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    BotRegistration(BotRegistration),
    DiscordActivity { activity: ActivityRecord },
    NewReport { report: ReportRecord },
    NewAppeal { appeal: AppealRecord },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    BotRegistration,
    DiscordActivity,
    NewReport,
    NewAppeal,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotRegistration => "bot_registration",
            Self::DiscordActivity => "discord_activity",
            Self::NewReport => "new_report",
            Self::NewAppeal => "new_appeal",
        }
    }
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::BotRegistration(_) => EnvelopeKind::BotRegistration,
            Self::DiscordActivity { .. } => EnvelopeKind::DiscordActivity,
            Self::NewReport { .. } => EnvelopeKind::NewReport,
            Self::NewAppeal { .. } => EnvelopeKind::NewAppeal,
        }
    }

    pub fn activity(activity: ActivityRecord) -> Self {
        Self::DiscordActivity { activity }
    }

    pub fn report(report: ReportRecord) -> Self {
        Self::NewReport { report }
    }

    pub fn appeal(appeal: AppealRecord) -> Self {
        Self::NewAppeal { appeal }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotRegistration {
    pub bot_id: String,
    pub bot_name: String,
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub command: String,
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: i64,
    pub reported_user_id: String,
    pub reported_username: String,
    pub reporter_user_id: String,
    pub reporter_username: String,
    pub reason: String,
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppealRecord {
    pub id: i64,
    pub user_id: String,
    pub username: String,
    pub reason: String,
    pub evidence: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

/// A message pushed by the collector. Only `type` is required; nothing in the
/// bot consumes the remaining fields yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Fire-and-forget destination for envelopes.
///
/// Implementations must return promptly and must not surface delivery
/// problems to the caller.
pub trait EnvelopeSink: Send + Sync {
    fn publish(&self, envelope: &Envelope);

    /// Short, human-readable delivery status for status replies.
    fn status(&self) -> &'static str {
        "not configured"
    }
}
