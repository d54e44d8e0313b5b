use crate::credentials::Credentials;
use crate::error::Error;
use crate::transport::{DisconnectNotifier, Transport, TransportFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_connect: bool,
    /// Connect never completes.
    pub hang_connect: bool,
    pub failing_channels: HashSet<String>,
    pub fail_publish: bool,
}

/// Everything the mock transports were asked to do, keyed by user id.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub created: Vec<String>,
    pub connects: HashMap<String, usize>,
    pub subscribes: Vec<(String, String)>,
    pub publishes: Vec<(String, String)>,
    pub closes: HashMap<String, usize>,
}

#[derive(Clone)]
struct MockLink {
    connected: Arc<AtomicBool>,
    notifier: DisconnectNotifier,
}

#[derive(Clone, Default)]
pub struct MockTransportFactory {
    log: Arc<Mutex<TransportLog>>,
    behavior: MockBehavior,
    links: Arc<Mutex<HashMap<String, MockLink>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Simulates the server dropping the user's connection.
    pub fn drop_connection(&self, user_id: &str) -> bool {
        match self.links.lock().get(user_id) {
            Some(link) => {
                link.connected.store(false, Ordering::SeqCst);
                link.notifier.notify();
                true
            }
            None => false,
        }
    }

    /// Delivers a disconnect notification while the connection stays up.
    pub fn notify_only(&self, user_id: &str) -> bool {
        match self.links.lock().get(user_id) {
            Some(link) => {
                link.notifier.notify();
                true
            }
            None => false,
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.log.lock().created.clone()
    }

    pub fn connects(&self, user_id: &str) -> usize {
        self.log.lock().connects.get(user_id).copied().unwrap_or(0)
    }

    pub fn closes(&self, user_id: &str) -> usize {
        self.log.lock().closes.get(user_id).copied().unwrap_or(0)
    }

    pub fn total_closes(&self) -> usize {
        self.log.lock().closes.values().sum()
    }

    pub fn subscribed(&self, user_id: &str) -> Vec<String> {
        Self::for_user(&self.log.lock().subscribes, user_id)
    }

    pub fn published(&self, user_id: &str) -> Vec<String> {
        Self::for_user(&self.log.lock().publishes, user_id)
    }

    pub fn total_published(&self) -> usize {
        self.log.lock().publishes.len()
    }

    fn for_user(entries: &[(String, String)], user_id: &str) -> Vec<String> {
        entries
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, channel)| channel.clone())
            .collect()
    }
}

impl TransportFactory for MockTransportFactory {
    type Transport = MockTransport;

    fn create(&self, credentials: &Credentials, notifier: DisconnectNotifier) -> MockTransport {
        let connected = Arc::new(AtomicBool::new(false));
        self.log.lock().created.push(credentials.user_id.clone());
        self.links.lock().insert(
            credentials.user_id.clone(),
            MockLink {
                connected: connected.clone(),
                notifier,
            },
        );

        MockTransport {
            user_id: credentials.user_id.clone(),
            connected,
            log: self.log.clone(),
            behavior: self.behavior.clone(),
            _not_sync: PhantomData,
        }
    }
}

pub struct MockTransport {
    user_id: String,
    connected: Arc<AtomicBool>,
    log: Arc<Mutex<TransportLog>>,
    behavior: MockBehavior,
    // Transports only have to be Send
    _not_sync: PhantomData<Cell<()>>,
}

#[async_trait]
impl Transport for MockTransport {
    type Subscription = String;

    async fn connect(&mut self) -> Result<(), Error> {
        *self
            .log
            .lock()
            .connects
            .entry(self.user_id.clone())
            .or_default() += 1;

        if self.behavior.hang_connect {
            std::future::pending::<()>().await;
        }
        if self.behavior.fail_connect {
            return Err(Error::connect("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<String, Error> {
        self.log
            .lock()
            .subscribes
            .push((self.user_id.clone(), channel.to_string()));

        if self.behavior.failing_channels.contains(channel) {
            return Err(Error::subscribe(channel, "permission denied"));
        }
        Ok(channel.to_string())
    }

    async fn publish(&mut self, subscription: &String, _payload: &[u8]) -> Result<(), Error> {
        self.log
            .lock()
            .publishes
            .push((self.user_id.clone(), subscription.clone()));

        if self.behavior.fail_publish {
            return Err(Error::publish(subscription, "broken pipe"));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        *self
            .log
            .lock()
            .closes
            .entry(self.user_id.clone())
            .or_default() += 1;
    }
}
