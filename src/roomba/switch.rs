use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::command::{Command, CommandMessage, COMMAND_TOPIC, STATUS_TOPIC};
use super::state::StatusSnapshot;
use crate::entity::ToggleEntity;
use crate::mqtt::config::MqttConfig;
use crate::mqtt::message_manager::MqttMessage;
use crate::mqtt::mqtt_handler::{
    BrokerLink, ConnectHandler, MessageHandler, MqttSession, SessionError,
};

/// Who a switch talks to. Fixed for the lifetime of the switch.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub host: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Network-task side of a switch: resubscribes on connect and feeds the
/// snapshot.
struct StatusListener {
    name: String,
    snapshot: Arc<StatusSnapshot>,
}

impl ConnectHandler for StatusListener {
    fn on_connect(&self, link: &dyn BrokerLink) {
        debug!("{} subscribing to {}", self.name, STATUS_TOPIC);
        if let Err(e) = link.subscribe(STATUS_TOPIC) {
            warn!("{} could not subscribe to {}: {}", self.name, STATUS_TOPIC, e);
        }
    }
}

impl MessageHandler for StatusListener {
    fn on_message(&self, message: &MqttMessage) {
        self.snapshot
            .apply_message(&self.name, message.topic(), message.payload());
    }
}

/// A robot vacuum exposed as an on/off switch.
///
/// "On" means a cleaning mission is running. Turning on starts a mission,
/// turning off stops it and sends the robot back to its dock.
pub struct RoombaSwitch {
    identity: DeviceIdentity,
    snapshot: Arc<StatusSnapshot>,
    link: Arc<dyn BrokerLink>,
    session: Option<MqttSession>,
}

impl RoombaSwitch {
    /// Opens the device session and starts listening for status reports.
    pub fn connect(identity: DeviceIdentity, mqtt: &MqttConfig) -> Result<Self, SessionError> {
        let snapshot = Arc::new(StatusSnapshot::new());
        let listener = Arc::new(StatusListener {
            name: identity.name.clone(),
            snapshot: snapshot.clone(),
        });

        let session = MqttSession::spawn(mqtt, listener.clone(), listener)?;
        info!("{} connecting to {}", identity.name, identity.host);

        Ok(Self {
            identity,
            snapshot,
            link: Arc::new(session.clone()),
            session: Some(session),
        })
    }

    /// Builds a switch on top of an existing link, without a network task.
    pub fn with_link(identity: DeviceIdentity, link: Arc<dyn BrokerLink>) -> Self {
        Self {
            identity,
            snapshot: Arc::new(StatusSnapshot::new()),
            link,
            session: None,
        }
    }

    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    /// Same path the network task takes for inbound publishes.
    pub fn on_status_message(&self, topic: &str, payload: &[u8]) {
        self.snapshot
            .apply_message(&self.identity.name, topic, payload);
    }

    pub fn request_full_update(&self) {
        info!("{} performing complete update", self.identity.name);
        if let Err(e) = self.link.publish(STATUS_TOPIC, Vec::new()) {
            warn!(
                "{} full update request not sent: {}",
                self.identity.name, e
            );
        }
    }

    fn send_command(&self, command: Command) {
        info!("Sending {} to {}", command, self.identity.name);
        let payload = match CommandMessage::now(command).to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{} could not encode {}: {}", self.identity.name, command, e);
                return;
            }
        };
        if let Err(e) = self.link.publish(COMMAND_TOPIC, payload) {
            warn!("{} command {} not sent: {}", self.identity.name, command, e);
        }
    }

    /// Stops the network task, if this switch owns one.
    pub async fn shutdown(&self) {
        if let Some(session) = &self.session {
            info!("{} closing session", self.identity.name);
            session.stop().await;
        }
    }
}

impl ToggleEntity for RoombaSwitch {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn is_on(&self) -> bool {
        let on = self.snapshot.is_running();
        debug!("Checking is_on for {} ({})", self.identity.name, on);
        on
    }

    fn available(&self) -> bool {
        self.session
            .as_ref()
            .map_or(true, MqttSession::is_connected)
    }

    fn turn_on(&self) {
        self.send_command(Command::Start);
    }

    fn turn_off(&self) {
        self.send_command(Command::Stop);
        self.send_command(Command::Dock);
    }

    fn update(&self) {
        self.request_full_update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roomba::testing::{identity, RecordingLink};
    use serde_json::{json, Value};

    fn switch() -> (RoombaSwitch, Arc<RecordingLink>) {
        let link = Arc::new(RecordingLink::default());
        (RoombaSwitch::with_link(identity("rosie"), link.clone()), link)
    }

    fn command_of(payload: &[u8]) -> CommandMessage {
        serde_json::from_slice(payload).unwrap()
    }

    #[test]
    fn no_messages_means_off() {
        let (switch, link) = switch();
        assert!(!switch.is_on());
        assert_eq!(switch.state().to_string(), "off");
        assert!(link.published().is_empty());
    }

    #[test]
    fn status_messages_drive_projection() {
        let (switch, _) = switch();
        let run = json!({"state": {"reported": {"cleanMissionStatus": {"phase": "run"}}}});
        let stop = json!({"state": {"reported": {"cleanMissionStatus": {"phase": "stop"}}}});

        switch.on_status_message("mission", run.to_string().as_bytes());
        assert!(switch.is_on());

        switch.on_status_message("mission", stop.to_string().as_bytes());
        assert!(!switch.is_on());
    }

    #[test]
    fn malformed_status_is_ignored() {
        let (switch, _) = switch();
        let run = json!({"state": {"reported": {"cleanMissionStatus": {"phase": "run"}}}});
        switch.on_status_message("mission", run.to_string().as_bytes());
        switch.on_status_message("mission", b"\x00\x01 not json");
        assert!(switch.is_on());
    }

    #[test]
    fn turn_on_publishes_single_start() {
        let (switch, link) = switch();
        let before = chrono::Utc::now().timestamp();
        switch.turn_on();
        let after = chrono::Utc::now().timestamp();

        let published = link.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "cmd");

        let message = command_of(&published[0].1);
        assert_eq!(message.command, Command::Start);
        assert_eq!(message.initiator, "localApp");
        assert!(message.time >= before && message.time <= after);
    }

    #[test]
    fn turn_off_publishes_stop_then_dock() {
        let (switch, link) = switch();
        let before = chrono::Utc::now().timestamp();
        switch.turn_off();
        let after = chrono::Utc::now().timestamp();

        let published = link.published();
        assert_eq!(published.len(), 2);

        let commands: Vec<Command> = published
            .iter()
            .map(|(topic, payload)| {
                assert_eq!(topic, "cmd");
                let message = command_of(payload);
                assert_eq!(message.initiator, "localApp");
                assert!(message.time >= before && message.time <= after);
                message.command
            })
            .collect();
        assert_eq!(commands, vec![Command::Stop, Command::Dock]);
    }

    #[test]
    fn command_payload_has_exactly_three_fields() {
        let (switch, link) = switch();
        switch.turn_on();
        let payload: Value = serde_json::from_slice(&link.published()[0].1).unwrap();
        let fields = payload.as_object().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["command"], "start");
        assert!(fields["time"].is_i64());
    }

    #[test]
    fn update_requests_full_report_without_payload() {
        let (switch, link) = switch();
        switch.update();
        assert_eq!(link.published(), vec![("mission".to_string(), Vec::new())]);
    }

    #[test]
    fn publish_failures_are_absorbed() {
        let link = Arc::new(RecordingLink::failing());
        let switch = RoombaSwitch::with_link(identity("rosie"), link.clone());
        switch.turn_on();
        switch.turn_off();
        switch.update();
        assert!(link.published().is_empty());
    }

    #[test]
    fn listener_resubscribes_on_every_connect() {
        let link = RecordingLink::default();
        let listener = StatusListener {
            name: "rosie".to_string(),
            snapshot: Arc::new(StatusSnapshot::new()),
        };
        listener.on_connect(&link);
        listener.on_connect(&link);
        assert_eq!(link.subscriptions(), vec!["mission", "mission"]);
    }

    #[test]
    fn listener_merges_inbound_messages() {
        let snapshot = Arc::new(StatusSnapshot::new());
        let listener = StatusListener {
            name: "rosie".to_string(),
            snapshot: snapshot.clone(),
        };
        let run = json!({"state": {"reported": {"cleanMissionStatus": {"phase": "run"}}}});
        listener.on_message(&MqttMessage::new("mission", run.to_string()));
        assert!(snapshot.is_running());
    }

    #[test]
    fn detached_switch_reports_available() {
        let (switch, _) = switch();
        assert!(switch.available());
    }

    #[test]
    fn identity_debug_hides_password() {
        let rendered = format!("{:?}", identity("rosie"));
        assert!(rendered.contains("rosie"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn connect_spawns_session_and_shuts_down() {
        let mut mqtt = MqttConfig::new("127.0.0.1", "blid", "secret");
        mqtt.port = 1;
        mqtt.reconnect_delay = std::time::Duration::from_millis(20);
        mqtt.tls.verify_server = false;

        let switch = RoombaSwitch::connect(identity("rosie"), &mqtt).unwrap();
        assert!(!switch.available());
        assert!(!switch.is_on());
        switch.turn_on();
        switch.shutdown().await;
        assert!(!switch.available());
    }
}
