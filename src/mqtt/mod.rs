//! # MQTT Session Module
//!
//! Owns the encrypted connection to a device's on-board broker. Each
//! configured vacuum gets exactly one [`MqttSession`](mqtt_handler::MqttSession),
//! whose background task polls the `rumqttc` event loop for the lifetime of
//! the session.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Per-device connection settings and MqttOptions
//! ├── tls.rs              - Verified or opt-in insecure TLS transports
//! ├── message_manager.rs  - Inbound message representation
//! └── mqtt_handler.rs     - Session lifecycle, handler traits, network loop
//! ```
//!
//! Callers never see transport errors. The network task logs them, waits the
//! configured reconnect delay and polls again, which makes `rumqttc` reopen
//! the connection. Every successful connect runs the registered
//! [`ConnectHandler`](mqtt_handler::ConnectHandler) so subscriptions survive
//! reconnects; every inbound publish runs the
//! [`MessageHandler`](mqtt_handler::MessageHandler).

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod tls;
