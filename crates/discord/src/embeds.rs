use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commands::UserRef;

pub const FOOTER_STATS: &str = "SteamGuard - Protecting marketplace communities";
pub const UNKNOWN_SERVER: &str = "Unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Colour(pub u32);

impl Colour {
    pub const GREEN: Self = Self(0x00ff00);
    pub const ORANGE: Self = Self(0xff9900);
    pub const BLUE: Self = Self(0x0099ff);
    pub const RED: Self = Self(0xff0000);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "color")]
    pub colour: Colour,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Embed {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|field| field.name == name).map(|field| field.value.as_str())
    }
}

/// A reply to one interaction: plain content, embeds, or both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
    /// Visible only to the invoking user.
    #[serde(skip)]
    pub ephemeral: bool,
}

impl MessageTemplate {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Self::default() }
    }

    pub fn embed(embed: Embed) -> Self {
        Self { embeds: vec![embed], ..Self::default() }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }
}

pub struct EmbedBuilder {
    embed: Embed,
}

impl EmbedBuilder {
    pub fn new(title: impl Into<String>, colour: Colour) -> Self {
        Self {
            embed: Embed {
                title: title.into(),
                description: None,
                colour,
                fields: Vec::new(),
                footer: None,
                timestamp: None,
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.embed.description = Some(description.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.embed.fields.push(EmbedField { name: name.into(), value: value.into(), inline: false });
        self
    }

    pub fn inline_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.embed.fields.push(EmbedField { name: name.into(), value: value.into(), inline: true });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.embed.footer = Some(EmbedFooter { text: text.into() });
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.embed.timestamp = Some(at);
        self
    }

    pub fn build(self) -> Embed {
        self.embed
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub reports: u64,
    pub bans: u64,
    pub guild_count: usize,
    pub uptime: Duration,
    pub version: String,
    /// Dashboard link state as reported by the envelope sink.
    pub dashboard: String,
}

pub fn stats_message(stats: &StatsSnapshot, at: DateTime<Utc>) -> MessageTemplate {
    let dashboard = match stats.dashboard.as_str() {
        "open" => "✅ Connected".to_owned(),
        other => format!("⚠️ {other}"),
    };

    MessageTemplate::embed(
        EmbedBuilder::new("🛡️ SteamGuard Statistics", Colour::GREEN)
            .inline_field("📊 Total Reports", stats.reports.to_string())
            .inline_field("⛔ Active Bans", stats.bans.to_string())
            .inline_field("🌐 Connected Servers", stats.guild_count.to_string())
            .inline_field("⏱️ Uptime", format_uptime(stats.uptime))
            .inline_field("🤖 Bot Version", stats.version.clone())
            .inline_field("🔗 Dashboard", dashboard)
            .footer(FOOTER_STATS)
            .timestamp(at)
            .build(),
    )
}

pub fn report_submitted_message(
    reported: &UserRef,
    reporter: &UserRef,
    reason: &str,
    evidence: &str,
    server_name: Option<&str>,
    at: DateTime<Utc>,
) -> MessageTemplate {
    MessageTemplate::embed(
        EmbedBuilder::new("📝 Report Submitted", Colour::ORANGE)
            .description(format!(
                "Report against **{}** has been submitted for review.",
                reported.tag
            ))
            .field("🎯 Reported User", reported.labelled())
            .field("📋 Reason", reason)
            .field("🔍 Evidence", evidence)
            .field("👤 Reported By", reporter.labelled())
            .inline_field("🏢 Server", server_name.unwrap_or(UNKNOWN_SERVER))
            .inline_field("⏰ Status", "Pending Review")
            .footer("Your report will be reviewed by our moderation team")
            .timestamp(at)
            .build(),
    )
}

/// There is no scammer database behind the bot yet, so every check is clean.
pub fn check_result_message(target: &UserRef, at: DateTime<Utc>) -> MessageTemplate {
    MessageTemplate::embed(
        EmbedBuilder::new("🔍 User Safety Check", Colour::GREEN)
            .description(format!("Checking **{}** in global scammer database...", target.tag))
            .field("✅ Status", "Clean - No reports found")
            .inline_field("🛡️ Safety Score", "100/100")
            .inline_field("📊 Reports", "0")
            .inline_field("⏱️ Last Checked", "Now")
            .footer("Always verify users independently before trading")
            .timestamp(at)
            .build(),
    )
}

pub fn appeal_submitted_message(
    user: &UserRef,
    reason: &str,
    evidence: &str,
    at: DateTime<Utc>,
) -> MessageTemplate {
    MessageTemplate::embed(
        EmbedBuilder::new("📋 Appeal Submitted", Colour::BLUE)
            .description("Your ban appeal has been submitted and will be reviewed.")
            .field("👤 User", user.labelled())
            .field("📝 Appeal Reason", reason)
            .field("🔍 Evidence", evidence)
            .inline_field("⏰ Status", "Under Review")
            .inline_field("📅 Submitted", short_date(at))
            .footer("Appeals are typically reviewed within 24-48 hours")
            .timestamp(at)
            .build(),
    )
    .ephemeral()
}

pub fn ban_executed_message(
    target: &UserRef,
    reason: &str,
    moderator: &UserRef,
    server_name: Option<&str>,
    at: DateTime<Utc>,
) -> MessageTemplate {
    MessageTemplate::embed(
        EmbedBuilder::new("⛔ Manual Ban Executed", Colour::RED)
            .description(format!("**{}** has been added to the global ban list.", target.tag))
            .field("🎯 Banned User", target.labelled())
            .field("📋 Reason", reason)
            .inline_field("👤 Banned By", moderator.tag.clone())
            .inline_field("🏢 Server", server_name.unwrap_or(UNKNOWN_SERVER))
            .inline_field("📅 Date", short_date(at))
            .footer("This ban is now active across all connected servers")
            .timestamp(at)
            .build(),
    )
}

pub fn ban_permission_denied_message() -> MessageTemplate {
    MessageTemplate::text("❌ You need \"Ban Members\" permission to use this command.").ephemeral()
}

pub fn unknown_command_message() -> MessageTemplate {
    MessageTemplate::text("❌ Unknown command")
}

pub fn error_message(user_message: &str) -> MessageTemplate {
    MessageTemplate::text(user_message).ephemeral()
}

/// Coarse uptime: the two most significant units, or seconds alone when
/// under a minute.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let seconds = total % 60;
    let minutes = (total / 60) % 60;
    let hours = (total / 3_600) % 24;
    let days = total / 86_400;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn short_date(at: DateTime<Utc>) -> String {
    at.format("%-m/%-d/%Y").to_string()
}
