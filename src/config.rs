//! Configuration document: one TOML file describing every bus, the broker
//! connection and the telnet admin listener, mirroring the `*_conf.py`
//! module-level constants from the original daemon.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::logging::DebugMask;

#[derive(Clone, Debug, Deserialize)]
pub struct BusConfig {
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    19_200
}

#[derive(Clone, Debug, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_topic_config")]
    pub topic_config: String,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
}

fn default_mqtt_host() -> String {
    "localhost".into()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_topic() -> String {
    "dombus".into()
}
fn default_topic_config() -> String {
    "homeassistant".into()
}
fn default_publish_interval() -> u64 {
    600
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            user: None,
            password: None,
            topic: default_topic(),
            topic_config: default_topic_config(),
            publish_interval_secs: default_publish_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TelnetConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_telnet_bind")]
    pub bind: String,
    #[serde(default = "default_telnet_port")]
    pub port: u16,
}

fn default_telnet_bind() -> String {
    "127.0.0.1".into()
}
fn default_telnet_port() -> u16 {
    8023
}

impl Default for TelnetConfig {
    fn default() -> Self {
        TelnetConfig { enabled: false, bind: default_telnet_bind(), port: default_telnet_port() }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_bus_map")]
    pub buses: HashMap<u8, BusConfig>,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub telnet: TelnetConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default, deserialize_with = "deserialize_debug_mask")]
    pub debug: DebugMask,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/dombus-gateway")
}

/// TOML table keys are always strings (`[buses.1]` parses as key `"1"`), so a
/// `HashMap<u8, _>` can't deserialize directly; decode through `String` keys
/// and parse each into a busID.
fn deserialize_bus_map<'de, D>(deserializer: D) -> Result<HashMap<u8, BusConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let raw: HashMap<String, BusConfig> = HashMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| k.parse::<u8>().map(|id| (id, v)).map_err(|_| D::Error::custom(format!("invalid busID {k:?}"))))
        .collect()
}

fn deserialize_debug_mask<'de, D>(deserializer: D) -> Result<DebugMask, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let s = String::deserialize(deserializer)?;
    DebugMask::parse(&s).ok_or_else(|| D::Error::custom(format!("invalid debug mask {s:?}")))
}

impl Config {
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        data_dir = "/var/lib/dombus-gateway"

        [buses.1]
        device = "/dev/ttyUSB0"
        baud = 19200

        [mqtt]
        host = "broker.local"
        topic = "dombus"

        [telnet]
        enabled = true
        port = 9023
    "#;

    #[test]
    fn parses_sample_document() {
        let cfg = Config::from_str(SAMPLE).expect("valid toml");
        let bus = cfg.buses.get(&1).expect("bus 1 configured");
        assert_eq!(bus.device, "/dev/ttyUSB0");
        assert_eq!(bus.baud, 19200);
        assert_eq!(cfg.mqtt.host, "broker.local");
        assert_eq!(cfg.mqtt.port, 1883); // default, not overridden
        assert!(cfg.telnet.enabled);
        assert_eq!(cfg.telnet.port, 9023);
    }

    #[test]
    fn missing_optional_sections_fall_back_to_defaults() {
        let cfg = Config::from_str(
            r#"
            [buses.1]
            device = "/dev/ttyUSB0"
        "#,
        )
        .expect("valid toml");
        assert_eq!(cfg.mqtt.host, "localhost");
        assert!(!cfg.telnet.enabled);
        assert_eq!(cfg.data_dir, default_data_dir());
    }
}
