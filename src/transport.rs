//! The seam between a simulated client and the wire.
//!
//! A [`Transport`] performs the protocol work for one client. It never calls
//! back into the client: connection loss is reported by pushing a
//! [`TransportEvent`] through the [`DisconnectNotifier`] it was created with,
//! and the client's control loop picks it up on its own schedule.

use crate::credentials::Credentials;
use crate::error::Error;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct DisconnectNotifier {
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl DisconnectNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn notify(&self) {
        // The receiver only goes away once the client has finished
        let _ = self.sender.send(TransportEvent::Disconnected);
    }
}

#[async_trait]
pub trait Transport: Send + 'static {
    /// Handle returned by a successful subscribe and used to publish.
    type Subscription: Send + Sync + 'static;

    /// (Re)establishes the connection, replacing any previous one.
    async fn connect(&mut self) -> Result<(), Error>;

    async fn subscribe(&mut self, channel: &str) -> Result<Self::Subscription, Error>;

    async fn publish(
        &mut self,
        subscription: &Self::Subscription,
        payload: &[u8],
    ) -> Result<(), Error>;

    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}

pub trait TransportFactory: Send + Sync + 'static {
    type Transport: Transport;

    fn create(&self, credentials: &Credentials, notifier: DisconnectNotifier) -> Self::Transport;
}
