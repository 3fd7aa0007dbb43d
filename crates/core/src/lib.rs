pub mod config;
pub mod domain;
pub mod errors;

pub use domain::envelope::{
    ActivityRecord, AppealRecord, BotRegistration, Envelope, EnvelopeKind, EnvelopeSink,
    InboundMessage, RecordStatus, ReportRecord, NO_EVIDENCE,
};
pub use domain::identity::BotIdentity;
pub use errors::{ApplicationError, InterfaceError};
