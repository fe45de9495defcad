use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rumqttc::MqttOptions;

use super::mqtt_handler::SessionError;
use super::tls;

pub const DEFAULT_PORT: u16 = 8883;
pub const DEFAULT_CA_FILE: &str = "/etc/ssl/certs/ca-certificates.crt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub ca_file: PathBuf,
    /// Turning this off accepts any certificate and hostname.
    pub verify_server: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
            verify_server: true,
        }
    }
}

/// Everything needed to open one device session.
#[derive(Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub request_capacity: usize,
    pub tls: TlsSettings,
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keep_alive", &self.keep_alive)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("request_capacity", &self.request_capacity)
            .field("tls", &self.tls)
            .finish()
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
            request_capacity: 10,
            tls: TlsSettings::default(),
        }
    }

    /// The device identity doubles as client id, and the broker keeps the
    /// session across reconnects.
    pub fn mqtt_options(&self) -> Result<MqttOptions, SessionError> {
        let mut options = MqttOptions::new(self.username.clone(), self.host.clone(), self.port);
        options
            .set_credentials(self.username.clone(), self.password.clone())
            .set_keep_alive(self.keep_alive)
            .set_clean_session(false)
            .set_transport(tls::build_transport(&self.tls, &self.host)?);
        Ok(options)
    }
}
