pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod orchestrator;
pub mod traffic;
pub mod transport;
pub mod ws_transport;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used items
pub use client::{ClientOptions, ConnectionState, SimulatedClient};
pub use config::{SendSettings, Settings};
pub use credentials::{CredentialFactory, Credentials};
pub use error::Error;
pub use orchestrator::{ClientFleet, Orchestrator};
pub use traffic::TrafficPolicy;
pub use transport::{DisconnectNotifier, Transport, TransportEvent, TransportFactory};
pub use ws_transport::{WebSocketTransport, WebSocketTransportFactory};
