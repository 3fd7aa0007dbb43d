use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport read failed: {0}")]
    Receive(String),
}

pub type OutboundSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One established connection, split into its two directions.
///
/// The inbound stream ending (`None`) means the remote side closed the
/// connection.
pub struct LinkChannel {
    pub outbound: OutboundSink,
    pub inbound: InboundStream,
}

#[async_trait]
pub trait LinkTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<LinkChannel, TransportError>;
}
