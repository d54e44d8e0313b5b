use crate::error::Error;
use config::{Config as ConfigTree, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENVIRONMENT_PREFIX: &str = "LOADGEN";
const CONFIG_SEPARATOR: &str = "__";
const SETTINGS_KEY: &str = "loadgen";

const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_connections")]
    pub connections: usize,
    #[serde(default = "default_channels_per_connection")]
    pub channels_per_connection: usize,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Opaque connection info signed into every token.
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub send: SendSettings,
    /// When false, clients connect and subscribe but never publish.
    #[serde(default = "default_publish")]
    pub publish: bool,
    #[serde(default = "default_payload")]
    pub payload: String,
    #[serde(with = "humantime_serde", default = "default_launch_delay")]
    pub launch_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Option<Duration>,
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_max_reconnect_delay")]
    pub max_reconnect_delay: Duration,
}

/// Send cadence, given either as a target rate or as a fixed delay.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct SendSettings {
    /// Messages per second for each client.
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(with = "humantime_serde", default)]
    pub interval: Option<Duration>,
}

fn default_connections() -> usize {
    1
}

fn default_channels_per_connection() -> usize {
    1
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:8000/connection/websocket".to_string()
}

fn default_namespace() -> String {
    "public".to_string()
}

fn default_publish() -> bool {
    true
}

fn default_payload() -> String {
    r#"{"input":"loadgen"}"#.to_string()
}

fn default_launch_delay() -> Duration {
    Duration::from_millis(1)
}

fn default_connect_timeout() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_reconnect_delay() -> Duration {
    Duration::from_secs(10)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            channels_per_connection: default_channels_per_connection(),
            endpoint: default_endpoint(),
            secret: String::new(),
            namespace: default_namespace(),
            info: String::new(),
            send: SendSettings::default(),
            publish: default_publish(),
            payload: default_payload(),
            launch_delay: default_launch_delay(),
            connect_timeout: default_connect_timeout(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_delay: default_max_reconnect_delay(),
        }
    }
}

impl SendSettings {
    pub fn from_rate(messages_per_second: f64) -> Self {
        Self {
            rate: Some(messages_per_second),
            interval: None,
        }
    }

    pub fn from_interval(interval: Duration) -> Self {
        Self {
            rate: None,
            interval: Some(interval),
        }
    }

    /// Normalizes both forms to the delay between two publishes of one client.
    pub fn send_interval(&self) -> Result<Duration, Error> {
        match (self.rate, self.interval) {
            (Some(_), Some(_)) => Err(Error::config(
                "send.rate and send.interval are mutually exclusive",
            )),
            (Some(rate), None) => {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(Error::config(format!(
                        "send.rate must be a positive number, got {rate}"
                    )));
                }
                Duration::try_from_secs_f64(1.0 / rate)
                    .ok()
                    .filter(|interval| !interval.is_zero())
                    .ok_or_else(|| Error::config(format!("send.rate {rate} is out of range")))
            }
            (None, Some(interval)) if interval.is_zero() => {
                Err(Error::config("send.interval must be greater than 0"))
            }
            (None, Some(interval)) => Ok(interval),
            (None, None) => Ok(DEFAULT_SEND_INTERVAL),
        }
    }
}

impl Settings {
    pub fn send_interval(&self) -> Result<Duration, Error> {
        self.send.send_interval()
    }

    /// Checks every invariant the orchestrator relies on. Called once, before
    /// any client is created.
    pub fn validate(&self) -> Result<(), Error> {
        if self.connections == 0 {
            return Err(Error::config("connections must be at least 1"));
        }
        if self.channels_per_connection == 0 {
            return Err(Error::config("channels_per_connection must be at least 1"));
        }

        let endpoint = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::config(format!("endpoint {:?} is not a URL: {e}", self.endpoint)))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "endpoint scheme must be ws or wss, got {}",
                endpoint.scheme()
            )));
        }

        if self.secret.is_empty() {
            return Err(Error::config("secret must not be empty"));
        }
        if self.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }

        self.send_interval()?;

        if self.connect_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::config("connect_timeout must be greater than 0"));
        }
        if self.reconnect_delay.is_zero() {
            return Err(Error::config("reconnect_delay must be greater than 0"));
        }
        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(Error::config(
                "max_reconnect_delay must not be shorter than reconnect_delay",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    config: ConfigTree,
}

impl Config {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let environment =
            std::env::var(format!("{ENVIRONMENT_PREFIX}{CONFIG_SEPARATOR}ENVIRONMENT"))
                .unwrap_or_else(|_| "development".into());

        let config_dir = config_dir.as_ref();
        let default_config = config_dir.join("settings.yml");
        let env_config = config_dir.join(format!("settings.{}.yml", environment));
        let local_config = config_dir.join("settings.local.yml");

        let config = ConfigTree::builder()
            .add_source(File::from(default_config).required(false))
            .add_source(File::from(env_config).required(false))
            .add_source(File::from(local_config).required(false))
            .add_source(
                Environment::with_prefix(ENVIRONMENT_PREFIX)
                    .separator(CONFIG_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(Config { config })
    }

    pub fn get_settings(&self) -> Result<Settings, ConfigError> {
        let settings = match self.config.get::<Settings>(SETTINGS_KEY) {
            Ok(settings) => settings,
            Err(ConfigError::NotFound(_)) => Settings::default(),
            Err(e) => return Err(e),
        };
        // The secret stays out of the logs
        tracing::debug!(
            "Load config: connections={}, channels_per_connection={}, endpoint={}, send={:?}, publish={}",
            settings.connections,
            settings.channels_per_connection,
            settings.endpoint,
            settings.send,
            settings.publish,
        );
        Ok(settings)
    }
}
