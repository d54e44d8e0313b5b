//! WebSocket transport speaking the JSON client protocol of Centrifugo-style
//! servers. Server replies are read and dropped; only the end of the stream
//! matters, and it is reported through the [`DisconnectNotifier`].

use crate::credentials::Credentials;
use crate::error::Error;
use crate::transport::{DisconnectNotifier, Transport, TransportFactory};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct Command<P> {
    uid: String,
    method: &'static str,
    params: P,
}

#[derive(Serialize)]
struct ConnectParams<'a> {
    user: &'a str,
    timestamp: String,
    info: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct SubscribeParams<'a> {
    channel: &'a str,
}

#[derive(Serialize)]
struct PublishParams<'a> {
    channel: &'a str,
    data: Value,
}

#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    endpoint: String,
}

impl WebSocketTransportFactory {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl TransportFactory for WebSocketTransportFactory {
    type Transport = WebSocketTransport;

    fn create(&self, credentials: &Credentials, notifier: DisconnectNotifier) -> WebSocketTransport {
        WebSocketTransport::new(self.endpoint.clone(), credentials.clone(), notifier)
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketSubscription {
    channel: String,
}

impl WebSocketSubscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

pub struct WebSocketTransport {
    endpoint: String,
    credentials: Credentials,
    notifier: DisconnectNotifier,
    sink: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
    /// Liveness of the current socket; every connect gets a fresh flag so a
    /// reader of an older socket can't mark the new one as down.
    connected: Arc<AtomicBool>,
    next_uid: u64,
}

impl WebSocketTransport {
    pub fn new(endpoint: String, credentials: Credentials, notifier: DisconnectNotifier) -> Self {
        Self {
            endpoint,
            credentials,
            notifier,
            sink: None,
            reader: None,
            connected: Arc::new(AtomicBool::new(false)),
            next_uid: 0,
        }
    }

    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.sink = None;
        self.connected.store(false, Ordering::Release);
    }

    async fn send<P: Serialize + Send>(&mut self, method: &'static str, params: P) -> Result<(), Error> {
        self.next_uid += 1;
        let command = Command {
            uid: self.next_uid.to_string(),
            method,
            params,
        };
        let text = serde_json::to_string(&command)?;

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::transport("not connected"))?;
        sink.send(Message::text(text)).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Subscription = WebSocketSubscription;

    async fn connect(&mut self) -> Result<(), Error> {
        self.teardown();

        let (stream, _response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| Error::connect(format!("{}: {e}", self.endpoint)))?;
        let (sink, mut read) = stream.split();
        self.sink = Some(sink);

        let credentials = self.credentials.clone();
        let params = ConnectParams {
            user: &credentials.user_id,
            timestamp: credentials.timestamp.to_string(),
            info: &credentials.info,
            token: &credentials.token,
        };
        if let Err(e) = self.send("connect", params).await {
            self.teardown();
            return Err(Error::connect(e.to_string()));
        }

        let connected = Arc::new(AtomicBool::new(true));
        self.connected = connected.clone();
        let notifier = self.notifier.clone();
        let user_id = credentials.user_id.clone();

        // Box::pin used to avoid filling the stack with the captured variables
        self.reader = Some(tokio::spawn(Box::pin(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Close(frame)) => {
                        debug!("Server closed connection of user {}: {:?}", user_id, frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Read error on connection of user {}: {}", user_id, e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::Release);
            notifier.notify();
        })));

        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<WebSocketSubscription, Error> {
        self.send("subscribe", SubscribeParams { channel })
            .await
            .map_err(|e| Error::subscribe(channel, e.to_string()))?;
        Ok(WebSocketSubscription {
            channel: channel.to_string(),
        })
    }

    async fn publish(
        &mut self,
        subscription: &WebSocketSubscription,
        payload: &[u8],
    ) -> Result<(), Error> {
        let data = serde_json::from_slice::<Value>(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
        self.send(
            "publish",
            PublishParams {
                channel: &subscription.channel,
                data,
            },
        )
        .await
        .map_err(|e| Error::publish(subscription.channel.as_str(), e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Close of user {} failed: {}", self.credentials.user_id, e),
                Err(_) => debug!("Close of user {} timed out", self.credentials.user_id),
            }
        }
        self.connected.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialFactory;
    use crate::transport::TransportEvent;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    /// Accepts one connection and forwards every text frame as JSON, closing
    /// the socket after `frames` of them.
    async fn spawn_server(frames: usize) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut seen = 0;
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    sender.send(serde_json::from_str(text.as_str()).unwrap()).unwrap();
                    seen += 1;
                    if seen == frames {
                        break;
                    }
                }
            }
        });

        (format!("ws://{addr}"), receiver)
    }

    fn credentials() -> Credentials {
        CredentialFactory::new("secret", "").make_credentials_at(9, 1_700_000_000)
    }

    #[tokio::test]
    async fn test_sends_protocol_commands() {
        let (endpoint, mut frames) = spawn_server(3).await;
        let (notifier, mut events) = DisconnectNotifier::channel();
        let mut transport = WebSocketTransport::new(endpoint, credentials(), notifier);

        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        let subscription = transport.subscribe("ns:user9-ch1").await.unwrap();
        assert_eq!(subscription.channel(), "ns:user9-ch1");
        transport
            .publish(&subscription, br#"{"input":"hi"}"#)
            .await
            .unwrap();

        let connect = frames.recv().await.unwrap();
        assert_eq!(connect["method"], "connect");
        assert_eq!(connect["uid"], "1");
        assert_eq!(connect["params"]["user"], "9");
        assert_eq!(connect["params"]["timestamp"], "1700000000");
        assert_eq!(connect["params"]["token"], credentials().token.as_str());

        let subscribe = frames.recv().await.unwrap();
        assert_eq!(subscribe["method"], "subscribe");
        assert_eq!(subscribe["params"]["channel"], "ns:user9-ch1");

        let publish = frames.recv().await.unwrap();
        assert_eq!(publish["method"], "publish");
        assert_eq!(publish["params"]["data"]["input"], "hi");

        // The server hangs up after the third frame
        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));
        assert!(!transport.is_connected());

        transport.close().await;
    }

    #[tokio::test]
    async fn test_non_json_payload_is_sent_as_string() {
        let (endpoint, mut frames) = spawn_server(3).await;
        let (notifier, _events) = DisconnectNotifier::channel();
        let mut transport = WebSocketTransport::new(endpoint, credentials(), notifier);

        transport.connect().await.unwrap();
        let subscription = transport.subscribe("ns:user9-ch1").await.unwrap();
        transport.publish(&subscription, b"plain text").await.unwrap();

        frames.recv().await.unwrap();
        frames.recv().await.unwrap();
        let publish = frames.recv().await.unwrap();
        assert_eq!(publish["params"]["data"], "plain text");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (notifier, _events) = DisconnectNotifier::channel();
        let mut transport = WebSocketTransport::new(format!("ws://{addr}"), credentials(), notifier);

        let error = transport.connect().await.unwrap_err();
        assert!(matches!(error, Error::Connect { .. }));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_commands_before_connect_fail() {
        let (notifier, _events) = DisconnectNotifier::channel();
        let mut transport =
            WebSocketTransport::new("ws://127.0.0.1:1".to_string(), credentials(), notifier);

        let error = transport.subscribe("ns:user9-ch1").await.unwrap_err();
        assert!(matches!(error, Error::Subscribe { .. }));

        // Closing a transport that never connected is a no-op
        transport.close().await;
    }
}
