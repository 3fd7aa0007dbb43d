//! Dashboard Link - outbound connection to the SteamGuard dashboard collector
//!
//! - **Link** (`link`) - connection lifecycle, registration, fixed-backoff reconnects,
//!   and the non-blocking `send` used by the command path
//! - **Transport** (`transport`) - the seam the link talks through
//! - **WebSocket** (`websocket`) - the production transport
//!
//! # State machine
//!
//! ```text
//! disconnected --connect()--> connecting --ok--> open --close/error--> disconnected
//!       ^                          |                                        |
//!       +---- connect retry (10s) -+                reconnect delay (5s) ---+
//! ```

pub mod link;
pub mod transport;
pub mod websocket;

pub use link::{LinkHandle, LinkManager, LinkSettings, LinkState, LinkStats, SendOutcome};
pub use transport::{LinkChannel, LinkTransport, TransportError};
pub use websocket::WebSocketTransport;
