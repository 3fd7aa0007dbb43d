use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use steamguard_core::{
    ActivityRecord, AppealRecord, ApplicationError, Envelope, EnvelopeSink, RecordStatus,
    ReportRecord, NO_EVIDENCE,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::embeds::{self, MessageTemplate, StatsSnapshot};
use crate::events::Presence;

pub const BOT_VERSION: &str = env!("CARGO_PKG_VERSION");

const OPTION_STRING: u8 = 3;
const OPTION_USER: u8 = 6;

/// One entry of the application-command catalogue, in the shape the chat
/// platform's bulk-registration endpoint accepts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOptionDefinition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandOptionDefinition {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

impl CommandOptionDefinition {
    fn user(name: &'static str, description: &'static str) -> Self {
        Self { kind: OPTION_USER, name, description, required: true }
    }

    fn string(name: &'static str, description: &'static str, required: bool) -> Self {
        Self { kind: OPTION_STRING, name, description, required }
    }
}

pub fn command_catalogue() -> Vec<CommandDefinition> {
    vec![
        CommandDefinition {
            name: "report",
            description: "Report a scammer to the global database",
            options: vec![
                CommandOptionDefinition::user("user", "The user to report"),
                CommandOptionDefinition::string("reason", "Reason for reporting (scam details)", true),
                CommandOptionDefinition::string(
                    "evidence",
                    "Links to evidence (screenshots, chat logs, etc.)",
                    false,
                ),
            ],
        },
        CommandDefinition {
            name: "check",
            description: "Check if a user is in the scammer database",
            options: vec![CommandOptionDefinition::user("user", "User to check")],
        },
        CommandDefinition { name: "stats", description: "Show bot statistics", options: Vec::new() },
        CommandDefinition {
            name: "appeal",
            description: "Submit an appeal if you were falsely banned",
            options: vec![
                CommandOptionDefinition::string(
                    "reason",
                    "Why you believe the ban was incorrect",
                    true,
                ),
                CommandOptionDefinition::string(
                    "evidence",
                    "Evidence supporting your appeal",
                    false,
                ),
            ],
        },
        CommandDefinition {
            name: "ban",
            description: "Manually ban a confirmed scammer (Admin only)",
            options: vec![
                CommandOptionDefinition::user("user", "User to ban"),
                CommandOptionDefinition::string("reason", "Ban reason", true),
            ],
        },
    ]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub tag: String,
}

impl UserRef {
    /// `tag (id)`, the form used in embed fields.
    pub fn labelled(&self) -> String {
        format!("{} ({})", self.tag, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildRef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    User(UserRef),
    String(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionOption {
    pub name: String,
    pub value: OptionValue,
}

impl InteractionOption {
    pub fn user(name: impl Into<String>, user: UserRef) -> Self {
        Self { name: name.into(), value: OptionValue::User(user) }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: OptionValue::String(value.into()) }
    }
}

/// A chat-input command invocation as delivered by the gateway, with user
/// options already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionPayload {
    pub id: String,
    pub command_name: String,
    pub user: UserRef,
    /// `None` for direct messages.
    pub guild: Option<GuildRef>,
    pub options: Vec<InteractionOption>,
    pub can_ban_members: bool,
}

impl InteractionPayload {
    fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.iter().find(|option| option.name == name).map(|option| &option.value)
    }

    fn required_user(&self, name: &'static str) -> Result<UserRef, CommandParseError> {
        match self.option(name) {
            Some(OptionValue::User(user)) => Ok(user.clone()),
            Some(OptionValue::String(_)) => Err(CommandParseError::OptionType {
                command: self.command_name.clone(),
                option: name,
                expected: "user",
            }),
            None => Err(self.missing(name)),
        }
    }

    fn required_string(&self, name: &'static str) -> Result<String, CommandParseError> {
        self.optional_string(name)?.ok_or_else(|| self.missing(name))
    }

    fn optional_string(&self, name: &'static str) -> Result<Option<String>, CommandParseError> {
        match self.option(name) {
            Some(OptionValue::String(value)) if value.trim().is_empty() => Ok(None),
            Some(OptionValue::String(value)) => Ok(Some(value.clone())),
            Some(OptionValue::User(_)) => Err(CommandParseError::OptionType {
                command: self.command_name.clone(),
                option: name,
                expected: "string",
            }),
            None => Ok(None),
        }
    }

    fn missing(&self, option: &'static str) -> CommandParseError {
        CommandParseError::MissingOption { command: self.command_name.clone(), option }
    }

    fn guild_id(&self) -> Option<String> {
        self.guild.as_ref().map(|guild| guild.id.clone())
    }

    fn guild_name(&self) -> Option<String> {
        self.guild.as_ref().map(|guild| guild.name.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardCommand {
    Report { target: UserRef, reason: String, evidence: String },
    Check { target: UserRef },
    Stats,
    Appeal { reason: String, evidence: String },
    Ban { target: UserRef, reason: String },
    Unknown { name: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("/{command} is missing required option `{option}`")]
    MissingOption { command: String, option: &'static str },
    #[error("/{command} option `{option}` is not a {expected}")]
    OptionType { command: String, option: &'static str, expected: &'static str },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandRouteError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
}

impl From<CommandRouteError> for ApplicationError {
    fn from(value: CommandRouteError) -> Self {
        match value {
            CommandRouteError::Parse(error) => Self::InvalidInput(error.to_string()),
        }
    }
}

pub fn parse_guard_command(payload: &InteractionPayload) -> Result<GuardCommand, CommandParseError> {
    let evidence = |payload: &InteractionPayload| {
        payload
            .optional_string("evidence")
            .map(|evidence| evidence.unwrap_or_else(|| NO_EVIDENCE.to_owned()))
    };

    Ok(match payload.command_name.as_str() {
        "report" => GuardCommand::Report {
            target: payload.required_user("user")?,
            reason: payload.required_string("reason")?,
            evidence: evidence(payload)?,
        },
        "check" => GuardCommand::Check { target: payload.required_user("user")? },
        "stats" => GuardCommand::Stats,
        "appeal" => GuardCommand::Appeal {
            reason: payload.required_string("reason")?,
            evidence: evidence(payload)?,
        },
        "ban" => GuardCommand::Ban {
            target: payload.required_user("user")?,
            reason: payload.required_string("reason")?,
        },
        other => GuardCommand::Unknown { name: other.to_owned() },
    })
}

/// Submissions seen since the process started. Nothing is persisted.
#[derive(Debug, Default)]
pub struct SessionCounters {
    reports: AtomicU64,
    bans: AtomicU64,
}

impl SessionCounters {
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    pub fn bans(&self) -> u64 {
        self.bans.load(Ordering::Relaxed)
    }
}

pub struct CommandRouter {
    sink: Arc<dyn EnvelopeSink>,
    presence: Arc<Presence>,
    counters: SessionCounters,
}

impl CommandRouter {
    pub fn new(sink: Arc<dyn EnvelopeSink>, presence: Arc<Presence>) -> Self {
        Self { sink, presence, counters: SessionCounters::default() }
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Answer one interaction. Activity is published before anything else,
    /// and every path produces a reply.
    pub fn route(&self, payload: &InteractionPayload) -> MessageTemplate {
        let now = Utc::now();
        self.sink.publish(&Envelope::activity(activity_record(payload, now)));

        match self.handle(payload, now) {
            Ok(message) => message,
            Err(error) => {
                let interface = ApplicationError::from(error).into_interface(payload.id.clone());
                warn!(
                    event_name = "discord.command.failed",
                    command = %payload.command_name,
                    user_id = %payload.user.id,
                    correlation_id = %interface.correlation_id(),
                    error = %interface,
                    "command handling failed"
                );
                embeds::error_message(interface.user_message())
            }
        }
    }

    fn handle(
        &self,
        payload: &InteractionPayload,
        now: DateTime<Utc>,
    ) -> Result<MessageTemplate, CommandRouteError> {
        let message = match parse_guard_command(payload)? {
            GuardCommand::Stats => embeds::stats_message(&self.stats_snapshot(), now),
            GuardCommand::Report { target, reason, evidence } => {
                self.sink.publish(&Envelope::report(ReportRecord {
                    id: now.timestamp_millis(),
                    reported_user_id: target.id.clone(),
                    reported_username: target.tag.clone(),
                    reporter_user_id: payload.user.id.clone(),
                    reporter_username: payload.user.tag.clone(),
                    reason: reason.clone(),
                    evidence: evidence.clone(),
                    server_id: payload.guild_id(),
                    server_name: payload.guild_name(),
                    status: RecordStatus::Pending,
                    created_at: now,
                }));
                self.counters.reports.fetch_add(1, Ordering::Relaxed);
                info!(
                    event_name = "discord.command.report_submitted",
                    correlation_id = %payload.id,
                    reporter_id = %payload.user.id,
                    reported_id = %target.id,
                    "report submitted"
                );

                embeds::report_submitted_message(
                    &target,
                    &payload.user,
                    &reason,
                    &evidence,
                    payload.guild.as_ref().map(|guild| guild.name.as_str()),
                    now,
                )
            }
            GuardCommand::Check { target } => embeds::check_result_message(&target, now),
            GuardCommand::Appeal { reason, evidence } => {
                self.sink.publish(&Envelope::appeal(AppealRecord {
                    id: now.timestamp_millis(),
                    user_id: payload.user.id.clone(),
                    username: payload.user.tag.clone(),
                    reason: reason.clone(),
                    evidence: evidence.clone(),
                    status: RecordStatus::Pending,
                    created_at: now,
                }));
                info!(
                    event_name = "discord.command.appeal_submitted",
                    correlation_id = %payload.id,
                    user_id = %payload.user.id,
                    "appeal submitted"
                );

                embeds::appeal_submitted_message(&payload.user, &reason, &evidence, now)
            }
            GuardCommand::Ban { target, reason } => {
                if !payload.can_ban_members {
                    info!(
                        event_name = "discord.command.ban_denied",
                        correlation_id = %payload.id,
                        user_id = %payload.user.id,
                        "ban rejected: caller lacks ban-members permission"
                    );
                    return Ok(embeds::ban_permission_denied_message());
                }

                self.counters.bans.fetch_add(1, Ordering::Relaxed);
                info!(
                    event_name = "discord.command.ban_executed",
                    correlation_id = %payload.id,
                    moderator_id = %payload.user.id,
                    target_id = %target.id,
                    "manual ban recorded"
                );
                embeds::ban_executed_message(
                    &target,
                    &reason,
                    &payload.user,
                    payload.guild.as_ref().map(|guild| guild.name.as_str()),
                    now,
                )
            }
            GuardCommand::Unknown { name } => {
                warn!(
                    event_name = "discord.command.unknown",
                    correlation_id = %payload.id,
                    command = %name,
                    "unknown command"
                );
                embeds::unknown_command_message()
            }
        };

        Ok(message)
    }

    fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reports: self.counters.reports(),
            bans: self.counters.bans(),
            guild_count: self.presence.guild_count(),
            uptime: self.presence.uptime(),
            version: BOT_VERSION.to_owned(),
            dashboard: self.sink.status().to_owned(),
        }
    }
}

fn activity_record(payload: &InteractionPayload, now: DateTime<Utc>) -> ActivityRecord {
    ActivityRecord {
        command: payload.command_name.clone(),
        user_id: payload.user.id.clone(),
        username: payload.user.tag.clone(),
        server_id: payload.guild_id(),
        server_name: payload.guild_name(),
        timestamp: now,
    }
}
