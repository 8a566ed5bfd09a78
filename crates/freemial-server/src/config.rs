//! Server configuration.

use std::time::Duration;

use freemial_settings::BrokerSettings;

/// Runtime configuration for the broker server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Capacity of each connection's delivery queue.
    pub send_queue_capacity: usize,
    /// Time allowed to write one frame.
    pub write_wait: Duration,
    /// Read deadline, extended by each Pong.
    pub pong_wait: Duration,
    /// Interval between server Pings.
    pub ping_period: Duration,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            send_queue_capacity: freemial_hub::DEFAULT_SEND_QUEUE_CAPACITY,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_message_size: 4096,
        }
    }
}

impl ServerConfig {
    /// Derive the runtime config from loaded settings.
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            send_queue_capacity: settings.hub.send_queue_capacity,
            write_wait: settings.transport.write_wait(),
            pong_wait: settings.transport.pong_wait(),
            ping_period: settings.transport.ping_period(),
            max_message_size: settings.transport.max_message_size,
        }
    }

    /// `host:port` string to bind. IPv6 hosts are bracketed.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
