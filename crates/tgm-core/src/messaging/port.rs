use async_trait::async_trait;

use crate::{
    domain::{DestinationId, Entity},
    messaging::types::{InboundMessage, OutboundMessage},
    Result,
};

/// Live, non-restartable stream of messages from every chat the account can see.
///
/// Errors must be classified: `Error::Transient` for network/server trouble,
/// `Error::Auth` for credential problems.
#[async_trait]
pub trait MessageSource: Send {
    /// Open the connection and return the identity it runs as.
    async fn connect(&mut self) -> Result<Entity>;

    /// Next message, or `Ok(None)` when the stream has ended.
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;

    async fn disconnect(&mut self);
}

/// Delivers forwarded content. A failed `send` leaves no partial state behind.
///
/// `resolve` reports `Error::Destination` when the target does not exist or
/// cannot be written to.
#[async_trait]
pub trait DestinationSender: Send {
    async fn connect(&mut self) -> Result<Entity>;

    async fn resolve(&mut self, destination: &DestinationId) -> Result<Entity>;

    async fn send(&mut self, target: &Entity, msg: &OutboundMessage) -> Result<()>;

    async fn disconnect(&mut self);
}
