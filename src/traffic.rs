use crate::config::Settings;
use crate::error::Error;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

/// What a connected client emits: one payload per interval, or nothing when
/// publishing is disabled.
#[derive(Debug, Clone)]
pub struct TrafficPolicy {
    pub interval: Duration,
    pub payload: Option<Arc<[u8]>>,
}

impl TrafficPolicy {
    pub fn publishing(interval: Duration, payload: impl AsRef<[u8]>) -> Self {
        Self {
            interval,
            payload: Some(Arc::from(payload.as_ref())),
        }
    }

    pub fn silent(interval: Duration) -> Self {
        Self {
            interval,
            payload: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        let interval = settings.send_interval()?;
        Ok(if settings.publish {
            Self::publishing(interval, settings.payload.as_bytes())
        } else {
            Self::silent(interval)
        })
    }

    pub fn is_publishing(&self) -> bool {
        self.payload.is_some()
    }
}

/// Uniform channel choice, reproducible per client.
#[derive(Debug)]
pub struct ChannelPicker {
    rng: StdRng,
}

impl ChannelPicker {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn pick<'a, T>(&mut self, candidates: &'a [T]) -> Option<&'a T> {
        candidates.choose(&mut self.rng)
    }
}

pub fn channel_name(namespace: &str, user_id: &str, index: usize) -> String {
    format!("{namespace}:user{user_id}-ch{index}")
}

pub fn channel_names(namespace: &str, user_id: &str, count: usize) -> Vec<String> {
    (1..=count)
        .map(|index| channel_name(namespace, user_id, index))
        .collect()
}
