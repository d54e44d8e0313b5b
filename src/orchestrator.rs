use crate::client::{ClientOptions, SimulatedClient};
use crate::config::Settings;
use crate::credentials::CredentialFactory;
use crate::error::Error;
use crate::transport::TransportFactory;
use std::future::Future;
use std::sync::Arc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, Instrument};

/// The set of running clients of one load run plus the token that stops them.
#[derive(Debug, Clone, Default)]
pub struct ClientFleet {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ClientFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of client tasks that have not finished yet.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Signals every client to stop. Calling it again has no effect.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Shutting down {} clients", self.tracker.len());
        }
        self.shutdown.cancel();
    }

    /// Waits until every client has closed its transport and returned.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        info!("All clients stopped");
    }
}

pub struct Orchestrator<F: TransportFactory> {
    settings: Arc<Settings>,
    options: Arc<ClientOptions>,
    credentials: CredentialFactory,
    factory: Arc<F>,
}

impl<F: TransportFactory> Orchestrator<F> {
    /// Fails with [`Error::Config`] before anything is started.
    pub fn new(settings: Settings, factory: F) -> Result<Self, Error> {
        settings.validate()?;
        let options = Arc::new(ClientOptions::from_settings(&settings)?);
        let credentials = CredentialFactory::new(settings.secret.clone(), settings.info.clone());

        Ok(Self {
            settings: Arc::new(settings),
            options,
            credentials,
            factory: Arc::new(factory),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Launches every client, waits for `stop`, then shuts the fleet down and
    /// drains it. A stop that arrives while clients are still being launched
    /// ends the launch early.
    pub async fn run<S>(&self, stop: S)
    where
        S: Future<Output = ()>,
    {
        let fleet = ClientFleet::new();
        tokio::pin!(stop);

        tokio::select! {
            _ = &mut stop => {
                info!("Stop requested while launching, {} clients started", fleet.len());
            }
            _ = self.launch(&fleet) => {
                info!("Load running, waiting for stop signal");
                (&mut stop).await;
            }
        }

        fleet.shutdown();
        fleet.drain().await;
    }

    /// Starts clients with user ids `1..=connections`, pausing `launch_delay`
    /// between two launches to spread the connect storm.
    pub async fn launch(&self, fleet: &ClientFleet) {
        let connections = self.settings.connections as u64;
        info!(
            "Launching {} clients against {} ({} channels each, send interval {:?})",
            connections,
            self.settings.endpoint,
            self.settings.channels_per_connection,
            self.options.policy.interval,
        );

        for user_id in 1..=connections {
            if fleet.is_shutting_down() {
                break;
            }

            let credentials = self.credentials.make_credentials(user_id);
            let client = SimulatedClient::new(
                user_id,
                credentials,
                self.options.clone(),
                self.factory.as_ref(),
                fleet.shutdown_token(),
            );
            fleet
                .tracker
                .spawn(client.run().instrument(info_span!("client", user_id)));

            if user_id < connections && !self.settings.launch_delay.is_zero() {
                time::sleep(self.settings.launch_delay).await;
            }
        }

        info!("Launched {} clients", fleet.len());
    }
}

/// Validates `settings`, runs the load until `stop` completes and drains.
pub async fn run<F, S>(settings: Settings, factory: F, stop: S) -> Result<(), Error>
where
    F: TransportFactory,
    S: Future<Output = ()>,
{
    let orchestrator = Orchestrator::new(settings, factory)?;
    orchestrator.run(stop).await;
    Ok(())
}
