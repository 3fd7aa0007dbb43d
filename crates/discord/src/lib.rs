//! Discord Integration - slash command surface for SteamGuard
//!
//! - **Gateway** (`gateway`) - event loop over the chat connection with reconnection logic
//! - **Slash Commands** (`commands`) - `/report`, `/check`, `/stats`, `/appeal`, `/ban`
//! - **Events** (`events`) - ready, guild count, and interaction routing
//! - **Embeds** (`embeds`) - reply builders
//!
//! # Architecture
//!
//! ```text
//! Gateway Events → EventDispatcher → CommandRouter → EnvelopeSink (dashboard)
//!                        ↓
//!                 Embed reply ← MessageTemplate
//! ```
//!
//! # Key Types
//!
//! - `GatewayRunner` - event loop with reconnection logic
//! - `EventDispatcher` - routes events and runs ready hooks
//! - `CommandRouter` - answers interactions and publishes dashboard envelopes

pub mod commands;
pub mod embeds;
pub mod events;
pub mod gateway;

pub use commands::{
    command_catalogue, CommandRouter, GuardCommand, GuildRef, InteractionOption,
    InteractionPayload, UserRef,
};
pub use embeds::MessageTemplate;
pub use events::{DispatchOutcome, EventDispatcher, GatewayEvent, Presence, ReadyEvent};
pub use gateway::{
    GatewayError, GatewayExit, GatewayRunner, GatewayTransport, OfflineGatewayTransport,
    ReconnectPolicy,
};
