//! One simulated end user.
//!
//! A [`SimulatedClient`] owns its transport and drives it through
//! connect → subscribe → publish cycles until the shared shutdown token is
//! cancelled. Connection loss arrives as a [`TransportEvent`] on a channel the
//! client owns, so the control loop in [`SimulatedClient::run`] is the only
//! code that ever touches the client's state.

use crate::config::Settings;
use crate::credentials::Credentials;
use crate::error::Error;
use crate::traffic::{channel_names, ChannelPicker, TrafficPolicy};
use crate::transport::{DisconnectNotifier, Transport, TransportEvent, TransportFactory};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

/// Per-client view of the settings, shared by every client of a run.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub namespace: String,
    pub channels_per_connection: usize,
    pub policy: TrafficPolicy,
    pub connect_timeout: Option<Duration>,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl ClientOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        Ok(Self {
            namespace: settings.namespace.clone(),
            channels_per_connection: settings.channels_per_connection,
            policy: TrafficPolicy::from_settings(settings)?,
            connect_timeout: settings.connect_timeout,
            reconnect_delay: settings.reconnect_delay,
            max_reconnect_delay: settings.max_reconnect_delay,
        })
    }
}

struct ActiveSubscription<S> {
    channel: String,
    handle: S,
}

enum ConnectOutcome {
    Connected,
    Failed,
    Shutdown,
}

enum CycleEnd {
    Disconnected,
    Shutdown,
}

pub struct SimulatedClient<T: Transport> {
    credentials: Credentials,
    channels: Vec<String>,
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    // Held so `events` never reports a closed channel.
    _notifier: DisconnectNotifier,
    /// Only the channels subscribed during the current connection.
    subscriptions: Vec<ActiveSubscription<T::Subscription>>,
    state: ConnectionState,
    options: Arc<ClientOptions>,
    picker: ChannelPicker,
    shutdown: CancellationToken,
}

impl<T: Transport> SimulatedClient<T> {
    pub fn new<F>(
        user_id: u64,
        credentials: Credentials,
        options: Arc<ClientOptions>,
        factory: &F,
        shutdown: CancellationToken,
    ) -> Self
    where
        F: TransportFactory<Transport = T>,
    {
        let (notifier, events) = DisconnectNotifier::channel();
        let transport = factory.create(&credentials, notifier.clone());
        let channels = channel_names(
            &options.namespace,
            &credentials.user_id,
            options.channels_per_connection,
        );

        Self {
            credentials,
            channels,
            transport,
            events,
            _notifier: notifier,
            subscriptions: Vec::new(),
            state: ConnectionState::Disconnected,
            options,
            picker: ChannelPicker::seeded(user_id),
            shutdown,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.credentials.user_id
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs until the shutdown token is cancelled, then closes the transport.
    pub async fn run(mut self) {
        debug!(
            "Client {} starting with {} channels",
            self.credentials.user_id,
            self.channels.len()
        );

        let mut backoff = self.options.reconnect_delay;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.connect().await {
                ConnectOutcome::Connected => {
                    backoff = self.options.reconnect_delay;
                    self.subscribe_all().await;
                    match self.generate_traffic().await {
                        CycleEnd::Disconnected => continue,
                        CycleEnd::Shutdown => break,
                    }
                }
                ConnectOutcome::Failed => {
                    if !self.wait_before_retry(backoff).await {
                        break;
                    }
                    backoff = next_backoff(backoff, self.options.max_reconnect_delay);
                }
                ConnectOutcome::Shutdown => break,
            }
        }

        self.set_state(ConnectionState::ShuttingDown);
        self.subscriptions.clear();
        self.transport.close().await;
        debug!("Client {} stopped", self.credentials.user_id);
    }

    async fn connect(&mut self) -> ConnectOutcome {
        self.set_state(ConnectionState::Connecting);

        // Notifications queued so far belong to connections that are gone
        while self.events.try_recv().is_ok() {}

        let connect_timeout = self.options.connect_timeout;
        let attempt = self.transport.connect();
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return ConnectOutcome::Shutdown,
            result = async {
                match connect_timeout {
                    Some(limit) => time::timeout(limit, attempt)
                        .await
                        .unwrap_or_else(|_| Err(Error::connect(format!("timed out after {limit:?}")))),
                    None => attempt.await,
                }
            } => result,
        };

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("Client {} connected", self.credentials.user_id);
                ConnectOutcome::Connected
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!("Client {}: {}", self.credentials.user_id, e);
                ConnectOutcome::Failed
            }
        }
    }

    async fn subscribe_all(&mut self) {
        self.subscriptions.clear();

        for channel in &self.channels {
            match self.transport.subscribe(channel).await {
                Ok(handle) => self.subscriptions.push(ActiveSubscription {
                    channel: channel.clone(),
                    handle,
                }),
                Err(e) => warn!("Client {}: {}", self.credentials.user_id, e),
            }
        }

        debug!(
            "Client {} subscribed to {}/{} channels",
            self.credentials.user_id,
            self.subscriptions.len(),
            self.channels.len()
        );
    }

    async fn generate_traffic(&mut self) -> CycleEnd {
        let mut ticker = if self.options.policy.is_publishing() {
            publish_ticker(self.options.policy.interval)
        } else {
            None
        };

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return CycleEnd::Shutdown,
                _event = self.events.recv() => {
                    if self.transport.is_connected() {
                        debug!("Client {} ignoring stale disconnect", self.credentials.user_id);
                        continue;
                    }

                    self.set_state(ConnectionState::Disconnected);
                    info!("Client {} disconnected", self.credentials.user_id);
                    if self.shutdown.is_cancelled() {
                        return CycleEnd::Shutdown;
                    }
                    return CycleEnd::Disconnected;
                }
                _ = next_tick(&mut ticker) => self.publish_once().await,
            }
        }
    }

    async fn publish_once(&mut self) {
        let Some(payload) = self.options.policy.payload.clone() else {
            return;
        };
        if !self.transport.is_connected() {
            trace!("Client {} skipping tick while disconnected", self.credentials.user_id);
            return;
        }
        let Some(subscription) = self.picker.pick(&self.subscriptions) else {
            trace!("Client {} has no active subscriptions", self.credentials.user_id);
            return;
        };

        match self.transport.publish(&subscription.handle, &payload).await {
            Ok(()) => trace!("Client {} published to {}", self.credentials.user_id, subscription.channel),
            Err(e) => warn!("Client {}: {}", self.credentials.user_id, e),
        }
    }

    /// Returns false when shutdown interrupted the wait.
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        debug!(
            "Client {} retrying connect in {:?}",
            self.credentials.user_id, delay
        );
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = time::sleep(delay) => true,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            trace!(
                "Client {} state {} -> {}",
                self.credentials.user_id,
                self.state,
                state
            );
            self.state = state;
        }
    }
}

/// Doubles the retry delay, capped at `max`.
fn next_backoff(backoff: Duration, max: Duration) -> Duration {
    backoff.saturating_mul(2).min(max)
}

/// `None` when the first tick lies beyond what the clock can represent.
fn publish_ticker(period: Duration) -> Option<Interval> {
    let Some(start) = Instant::now().checked_add(period) else {
        debug!("Send interval {:?} is out of range, never publishing", period);
        return None;
    };
    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
