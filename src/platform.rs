//! Host driver: creates one switch per configured device, refreshes them on a
//! fixed scan interval and accepts console commands until Ctrl-C.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::entity::{EntityState, ToggleEntity};
use crate::mqtt::mqtt_handler::SessionError;
use crate::roomba::RoombaSwitch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    TurnOn(String),
    TurnOff(String),
    Refresh(String),
    Dump(String),
    Status,
    Help,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,

    #[error("'{0}' needs a device name")]
    MissingName(&'static str),

    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(ConsoleError::Empty)?;
        let name = words.next().map(str::to_owned);

        match verb.to_ascii_lowercase().as_str() {
            "on" | "start" => name
                .map(ConsoleCommand::TurnOn)
                .ok_or(ConsoleError::MissingName("on")),
            "off" | "stop" => name
                .map(ConsoleCommand::TurnOff)
                .ok_or(ConsoleError::MissingName("off")),
            "refresh" | "update" => name
                .map(ConsoleCommand::Refresh)
                .ok_or(ConsoleError::MissingName("refresh")),
            "dump" => name
                .map(ConsoleCommand::Dump)
                .ok_or(ConsoleError::MissingName("dump")),
            "status" => Ok(ConsoleCommand::Status),
            "help" | "?" => Ok(ConsoleCommand::Help),
            other => Err(ConsoleError::Unknown(other.to_string())),
        }
    }
}

const HELP: &str =
    "commands: on <name> | off <name> | refresh <name> | dump <name> | status | help";

/// Creates one switch, and so one session, per configured device.
pub fn setup_platform(config: &Config) -> Result<Vec<RoombaSwitch>, SessionError> {
    config
        .devices()
        .into_iter()
        .map(|(identity, mqtt)| RoombaSwitch::connect(identity, &mqtt))
        .collect()
}

pub struct Platform {
    switches: Vec<RoombaSwitch>,
    last_seen: HashMap<String, (EntityState, bool)>,
}

impl Platform {
    pub fn new(switches: Vec<RoombaSwitch>) -> Self {
        Self {
            switches,
            last_seen: HashMap::new(),
        }
    }

    pub fn switches(&self) -> &[RoombaSwitch] {
        &self.switches
    }

    fn find(&self, name: &str) -> Option<&RoombaSwitch> {
        self.switches.iter().find(|switch| switch.name() == name)
    }

    /// One scheduler pass: ask every device for a full report and log any
    /// state or availability change since the previous pass.
    pub fn scan(&mut self) {
        for switch in &self.switches {
            switch.update();

            let current = (switch.state(), switch.available());
            let previous = self.last_seen.insert(switch.name().to_string(), current);
            if previous != Some(current) {
                info!(
                    "{} is {} ({})",
                    switch.name(),
                    current.0,
                    if current.1 { "available" } else { "unavailable" }
                );
            } else {
                debug!("{} unchanged ({})", switch.name(), current.0);
            }
        }
    }

    pub fn execute(&self, command: ConsoleCommand) -> String {
        match command {
            ConsoleCommand::TurnOn(name) => match self.find(&name) {
                Some(switch) => {
                    switch.turn_on();
                    format!("{}: start sent", name)
                }
                None => format!("unknown device '{}'", name),
            },
            ConsoleCommand::TurnOff(name) => match self.find(&name) {
                Some(switch) => {
                    switch.turn_off();
                    format!("{}: stop and dock sent", name)
                }
                None => format!("unknown device '{}'", name),
            },
            ConsoleCommand::Refresh(name) => match self.find(&name) {
                Some(switch) => {
                    switch.update();
                    format!("{}: full update requested", name)
                }
                None => format!("unknown device '{}'", name),
            },
            ConsoleCommand::Dump(name) => match self.find(&name) {
                Some(switch) => {
                    let document = serde_json::Value::Object(switch.snapshot().document());
                    serde_json::to_string_pretty(&document)
                        .unwrap_or_else(|e| format!("{}: cannot render status: {}", name, e))
                }
                None => format!("unknown device '{}'", name),
            },
            ConsoleCommand::Status => self
                .switches
                .iter()
                .map(|switch| {
                    let mut line = format!("{}: {}", switch.name(), switch.state());
                    if switch.snapshot().is_empty() {
                        line.push_str(" (no status yet)");
                    }
                    if !switch.available() {
                        line.push_str(" (unavailable)");
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n"),
            ConsoleCommand::Help => HELP.to_string(),
        }
    }

    pub fn handle_line(&self, line: &str) -> Option<String> {
        match ConsoleCommand::parse(line) {
            Ok(command) => Some(self.execute(command)),
            Err(ConsoleError::Empty) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    /// Drives the scan loop and the console until Ctrl-C, then closes every
    /// session.
    pub async fn run(&mut self, scan_interval: Duration) {
        info!(
            "Running {} device(s), scanning every {:?}",
            self.switches.len(),
            scan_interval
        );

        let mut ticker = tokio::time::interval(scan_interval);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut console_open = true;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    if let Err(e) = result {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                    }
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => self.scan(),
                line = lines.next_line(), if console_open => match line {
                    Ok(Some(line)) => {
                        if let Some(reply) = self.handle_line(&line) {
                            println!("{}", reply);
                        }
                    }
                    Ok(None) => {
                        debug!("Console closed");
                        console_open = false;
                    }
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        console_open = false;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    pub async fn shutdown(&self) {
        for switch in &self.switches {
            switch.shutdown().await;
        }
        info!("All sessions closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roomba::testing::{identity, RecordingLink};
    use serde_json::json;
    use std::sync::Arc;

    fn platform() -> (Platform, Arc<RecordingLink>, Arc<RecordingLink>) {
        let kitchen = Arc::new(RecordingLink::default());
        let upstairs = Arc::new(RecordingLink::default());
        let platform = Platform::new(vec![
            RoombaSwitch::with_link(identity("kitchen"), kitchen.clone()),
            RoombaSwitch::with_link(identity("upstairs"), upstairs.clone()),
        ]);
        (platform, kitchen, upstairs)
    }

    #[test]
    fn parses_console_commands() {
        assert_eq!(
            ConsoleCommand::parse("on kitchen"),
            Ok(ConsoleCommand::TurnOn("kitchen".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("  OFF   upstairs "),
            Ok(ConsoleCommand::TurnOff("upstairs".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("refresh kitchen"),
            Ok(ConsoleCommand::Refresh("kitchen".to_string()))
        );
        assert_eq!(ConsoleCommand::parse("status"), Ok(ConsoleCommand::Status));
        assert_eq!(ConsoleCommand::parse("   "), Err(ConsoleError::Empty));
        assert_eq!(
            ConsoleCommand::parse("on"),
            Err(ConsoleError::MissingName("on"))
        );
        assert_eq!(
            ConsoleCommand::parse("vacuum kitchen"),
            Err(ConsoleError::Unknown("vacuum".to_string()))
        );
    }

    #[test]
    fn commands_reach_only_the_named_device() {
        let (platform, kitchen, upstairs) = platform();
        platform.handle_line("off kitchen");
        assert_eq!(kitchen.published().len(), 2);
        assert!(upstairs.published().is_empty());

        let reply = platform.handle_line("on garage").unwrap();
        assert_eq!(reply, "unknown device 'garage'");
    }

    #[test]
    fn scan_requests_update_from_every_device() {
        let (mut platform, kitchen, upstairs) = platform();
        platform.scan();
        platform.scan();
        for link in [kitchen, upstairs] {
            let published = link.published();
            assert_eq!(published.len(), 2);
            assert!(published
                .iter()
                .all(|(topic, payload)| topic == "mission" && payload.is_empty()));
        }
    }

    #[test]
    fn status_reflects_snapshots() {
        let (platform, _, _) = platform();
        let run = json!({"state": {"reported": {"cleanMissionStatus": {"phase": "run"}}}});
        platform.switches()[1].on_status_message("mission", run.to_string().as_bytes());

        assert_eq!(
            platform.execute(ConsoleCommand::Status),
            "kitchen: off (no status yet)\nupstairs: on"
        );
    }

    #[test]
    fn dump_renders_snapshot() {
        let (platform, _, _) = platform();
        platform.switches()[0].on_status_message("mission", br#"{"batPct": 71}"#);

        let reply = platform.handle_line("dump kitchen").unwrap();
        let rendered: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(rendered, json!({"batPct": 71}));
        assert_eq!(
            platform.handle_line("dump"),
            Some("'dump' needs a device name".to_string())
        );
    }

    #[test]
    fn empty_line_has_no_reply() {
        let (platform, _, _) = platform();
        assert_eq!(platform.handle_line(""), None);
        assert_eq!(platform.handle_line("help").as_deref(), Some(HELP));
    }

    #[tokio::test]
    async fn setup_platform_creates_one_switch_per_device() {
        let config = Config::from_toml_str(
            r#"
            [connection]
            port = 1
            reconnect_delay_secs = 1

            [roombas.kitchen]
            host = "127.0.0.1"
            username = "blid-a"
            password = "pw"
            insecure_tls = true

            [roombas.upstairs]
            host = "127.0.0.1"
            username = "blid-b"
            password = "pw"
            insecure_tls = true
            "#,
        )
        .unwrap();

        let platform = Platform::new(setup_platform(&config).unwrap());
        let names: Vec<&str> = platform.switches().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["kitchen", "upstairs"]);
        platform.shutdown().await;
    }
}
