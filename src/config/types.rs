use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::gateway::NumberMatch;
use crate::router::RouteKind;

/// Root configuration for smsgated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener addresses and limits.
    #[serde(default)]
    pub listeners: ListenersConfig,

    /// Client accounts and the numbers they own.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Routing rules for carrier-bound traffic.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Upstream carrier credentials.
    #[serde(default)]
    pub carriers: Vec<CarrierConfig>,

    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenersConfig {
    #[serde(default)]
    pub smpp: SmppListenerConfig,

    #[serde(default)]
    pub mm4: Mm4ListenerConfig,
}

impl Default for ListenersConfig {
    fn default() -> Self {
        Self {
            smpp: SmppListenerConfig::default(),
            mm4: Mm4ListenerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmppListenerConfig {
    #[serde(default = "default_smpp_name")]
    pub name: String,

    #[serde(default = "default_smpp_address")]
    pub address: SocketAddr,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for SmppListenerConfig {
    fn default() -> Self {
        Self {
            name: default_smpp_name(),
            address: default_smpp_address(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mm4ListenerConfig {
    #[serde(default = "default_mm4_name")]
    pub name: String,

    #[serde(default = "default_mm4_address")]
    pub address: SocketAddr,
}

impl Default for Mm4ListenerConfig {
    fn default() -> Self {
        Self {
            name: default_mm4_name(),
            address: default_mm4_address(),
        }
    }
}

/// A client account. The credential pair authenticates SMPP binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub username: String,

    /// SHA-256 of the bind password, hex-encoded.
    pub password_hash: String,

    /// Where MM4 deliveries for this client connect, `host:port`.
    #[serde(default)]
    pub mm4_endpoint: Option<String>,

    #[serde(default)]
    pub numbers: Vec<NumberConfig>,
}

/// One number owned by a client and hosted on a carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberConfig {
    pub number: String,
    pub carrier: String,
}

/// A routing rule for carrier-bound dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Destination prefix; empty matches everything.
    #[serde(default)]
    pub prefix: String,

    #[serde(rename = "type")]
    pub kind: RouteKind,

    /// Carrier tag for `carrier` routes, peer label for `smpp` routes.
    pub endpoint: String,
}

/// Supported carrier vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierKind {
    Twilio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    /// Tag the routes reference.
    pub name: String,

    #[serde(rename = "type")]
    pub kind: CarrierKind,

    #[serde(default)]
    pub account_sid: String,

    #[serde(default)]
    pub auth_token: String,

    /// Timeout for upstream API calls.
    #[serde(default = "default_carrier_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// How stored numbers match inbound source addresses.
    #[serde(default)]
    pub number_match: NumberMatch,

    /// Router channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Timeout for outbound MM4 connections and dialogues.
    #[serde(default = "default_mm4_timeout", with = "humantime_serde")]
    pub mm4_timeout: Duration,

    /// How long shutdown waits for in-flight work.
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            number_match: NumberMatch::default(),
            channel_capacity: default_channel_capacity(),
            mm4_timeout: default_mm4_timeout(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_smpp_name() -> String {
    "smpp".to_string()
}

fn default_smpp_address() -> SocketAddr {
    "0.0.0.0:2775".parse().unwrap()
}

fn default_max_connections() -> usize {
    1024
}

fn default_mm4_name() -> String {
    "mm4".to_string()
}

fn default_mm4_address() -> SocketAddr {
    "0.0.0.0:2566".parse().unwrap()
}

fn default_carrier_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_mm4_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_log_level() -> String {
    "info".to_string()
}
