//! Connection configuration, consumed from an external configuration
//! collaborator. Optional serde derives behind the `serde` feature.

use std::time::Duration;

/// Per-network connection settings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionConfig {
    /// Server host name, also used for TLS verification.
    pub server: String,
    /// Desired nickname.
    pub nick: String,
    /// SASL password.
    pub password: String,
    /// Port; defaults to 6697 with TLS, 6667 without.
    #[cfg_attr(feature = "serde", serde(default))]
    pub port: Option<u16>,
    /// Real name (GECOS); defaults to the nick.
    #[cfg_attr(feature = "serde", serde(default))]
    pub real_name: Option<String>,
    /// TLS on by default.
    #[cfg_attr(feature = "serde", serde(default = "default_tls"))]
    pub tls: bool,
    /// SASL identity; defaults to the nick.
    #[cfg_attr(feature = "serde", serde(default))]
    pub user: Option<String>,
}

fn default_tls() -> bool {
    true
}

impl ConnectionConfig {
    pub fn new(
        server: impl Into<String>,
        nick: impl Into<String>,
        password: impl Into<String>,
    ) -> ConnectionConfig {
        ConnectionConfig {
            server: server.into(),
            nick: nick.into(),
            password: password.into(),
            port: None,
            real_name: None,
            tls: true,
            user: None,
        }
    }

    /// Effective port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls { 6697 } else { 6667 })
    }

    /// Effective SASL identity.
    pub fn username(&self) -> &str {
        self.user.as_deref().unwrap_or(&self.nick)
    }

    /// Effective real name.
    pub fn real_name(&self) -> &str {
        self.real_name.as_deref().unwrap_or(&self.nick)
    }
}

/// Engine-wide timing tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineSettings {
    /// Read timeout before a liveness probe goes out.
    pub keepalive_interval: Duration,
    /// Consecutive silent probes before the connection is declared dead.
    pub keepalive_max_misses: u32,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Reconnect delay cap.
    pub backoff_max: Duration,
}

impl Default for EngineSettings {
    fn default() -> EngineSettings {
        EngineSettings {
            keepalive_interval: Duration::from_secs(30),
            keepalive_max_misses: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
        }
    }
}
