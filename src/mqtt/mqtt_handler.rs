use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Outgoing, Packet, QoS};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::MqttConfig;
use super::message_manager::MqttMessage;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No tokio runtime available to drive the session: {0}")]
    NoRuntime(String),

    #[error("Failed to load TLS material from {path}: {reason}")]
    TlsMaterial { path: String, reason: String },

    #[error("Not connected to the broker ({0:?})")]
    NotConnected(ConnectionState),

    #[error("Failed to queue MQTT request: {0}")]
    Request(#[from] ClientError),
}

/// Outbound half of a broker session.
///
/// Both calls hand the request to the network task; delivery is never
/// confirmed. A session that is not connected refuses them instead of
/// holding them for the next connect.
pub trait BrokerLink: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError>;

    fn subscribe(&self, topic: &str) -> Result<(), SessionError>;
}

/// Invoked by the network task after every successful (re)connect.
pub trait ConnectHandler: Send + Sync {
    fn on_connect(&self, link: &dyn BrokerLink);
}

/// Invoked by the network task for every inbound publish, in arrival order.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: &MqttMessage);
}

#[derive(Clone)]
struct ClientLink {
    client: AsyncClient,
}

impl BrokerLink for ClientLink {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError> {
        self.client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.client.try_subscribe(topic, QoS::AtMostOnce)?;
        Ok(())
    }
}

/// A live, TLS-protected session with one device broker.
///
/// The network task is spawned on construction and keeps polling (and thereby
/// reconnecting) until [`MqttSession::stop`] is called.
#[derive(Clone)]
pub struct MqttSession {
    link: ClientLink,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MqttSession {
    pub fn spawn(
        config: &MqttConfig,
        on_connect: Arc<dyn ConnectHandler>,
        on_message: Arc<dyn MessageHandler>,
    ) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::NoRuntime(e.to_string()))?;

        let options = config.mqtt_options()?;
        let (client, event_loop) = AsyncClient::new(options, config.request_capacity);
        let link = ClientLink { client };

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        info!(
            "Opening session to {}:{} as {}",
            config.host, config.port, config.username
        );
        let task = runtime.spawn(run_network_loop(
            event_loop,
            link.clone(),
            on_connect,
            on_message,
            state_tx,
            cancel.clone(),
            config.reconnect_delay,
        ));

        Ok(Self {
            link,
            state: state_rx,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.connection_state() {
            ConnectionState::Connected => Ok(()),
            state => Err(SessionError::NotConnected(state)),
        }
    }

    /// Disconnects and waits for the network task to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Network task ended abnormally: {}", e);
            }
        }
    }
}

impl BrokerLink for MqttSession {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError> {
        self.ensure_connected()?;
        self.link.publish(topic, payload)
    }

    fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.ensure_connected()?;
        self.link.subscribe(topic)
    }
}

async fn run_network_loop(
    mut event_loop: EventLoop,
    link: ClientLink,
    on_connect: Arc<dyn ConnectHandler>,
    on_message: Arc<dyn MessageHandler>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
) {
    debug!("Network loop started");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(
                    "Connected to broker (session present: {})",
                    ack.session_present
                );
                state.send_replace(ConnectionState::Connected);
                on_connect.on_connect(&link);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = MqttMessage::from_publish(&publish);
                debug!("Received {}", message);
                on_message.on_message(&message);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                state.send_replace(ConnectionState::Reconnecting);
            }
            Ok(event) => trace!("{:?}", event),
            Err(e) => {
                warn!(
                    "Connection error: {}. Retrying in {:?}",
                    e, reconnect_delay
                );
                state.send_replace(ConnectionState::Reconnecting);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }

    if *state.borrow() == ConnectionState::Connected {
        send_disconnect(&mut event_loop, &link).await;
    }
    state.send_replace(ConnectionState::Disconnected);
    info!("Network loop stopped");
}

/// Queues a DISCONNECT and polls until it has been written out.
async fn send_disconnect(event_loop: &mut EventLoop, link: &ClientLink) {
    if let Err(e) = link.client.try_disconnect() {
        debug!("Disconnect request not queued: {}", e);
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(event) => trace!("{:?}", event),
                Err(e) => {
                    debug!("Connection ended before disconnect was sent: {}", e);
                    return false;
                }
            }
        }
    })
    .await;

    match flushed {
        Ok(true) => debug!("Disconnect sent"),
        Ok(false) => {}
        Err(_) => warn!("Disconnect not sent within {:?}", DISCONNECT_TIMEOUT),
    }
}
