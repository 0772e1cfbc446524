//! Runtime configuration, loaded from a JSON file.
//!
//! Every field has a default, so an empty object is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{EngineConfig, DEFAULT_ARBITRATION_RETRIES, DEFAULT_LOCK_MAX};
use crate::error::ConfigError;
use crate::frame::is_master;

pub const DEFAULT_MASTER: u8 = 0x71;
pub const DEFAULT_GATEWAY_PORT: u16 = 9999;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub gateway: GatewayConfig,
    pub mqtt: MqttConfig,
    pub devices: DevicesConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub master_address: u8,
    pub lock_max: u8,
    pub arbitration_retries: u8,
    /// `tcp:host:port` or a device path.
    pub transport: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            master_address: DEFAULT_MASTER,
            lock_max: DEFAULT_LOCK_MAX,
            arbitration_retries: DEFAULT_ARBITRATION_RETRIES,
            transport: None,
        }
    }
}

impl BusConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            master_address: self.master_address,
            lock_max: self.lock_max,
            arbitration_retries: self.arbitration_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_GATEWAY_PORT,
        }
    }
}

impl GatewayConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker URL such as `mqtt://host:1883`. Unset disables MQTT.
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub data_topic: String,
    pub request_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            client_id: "ebusgw".to_string(),
            data_topic: "ebus/data".to_string(),
            request_topic: "ebus/req".to_string(),
        }
    }
}

impl MqttConfig {
    /// Overlays connection settings found under the `mqtt` namespace.
    pub fn apply_store(&mut self, store: &dyn ConfigStore) {
        for (key, slot) in [
            ("url", &mut self.url),
            ("username", &mut self.username),
            ("password", &mut self.password),
        ] {
            if let Some(value) = store.get_string("mqtt", key) {
                *slot = Some(value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub interface: bool,
    /// Bridge address switch (2 or 3).
    pub bridge: Option<u8>,
    /// Boiler emulated behind the bridge.
    pub boiler: bool,
    /// Room unit switch position (1..=8).
    pub room_unit: Option<u8>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            interface: true,
            bridge: Some(2),
            boiler: true,
            room_unit: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_master(self.bus.master_address) {
            return Err(ConfigError::Invalid {
                key: "bus.master_address",
                reason: format!("{:#04x} is not a master address", self.bus.master_address),
            });
        }
        if let Some(index) = self.devices.bridge {
            if !(2..=3).contains(&index) {
                return Err(ConfigError::Invalid {
                    key: "devices.bridge",
                    reason: format!("index {index} not in 2..=3"),
                });
            }
        }
        if let Some(index) = self.devices.room_unit {
            if !(1..=8).contains(&index) {
                return Err(ConfigError::Invalid {
                    key: "devices.room_unit",
                    reason: format!("index {index} not in 1..=8"),
                });
            }
        }
        if self.gateway.enabled && self.gateway.port == 0 {
            return Err(ConfigError::Invalid {
                key: "gateway.port",
                reason: "port must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Namespaced string settings.
pub trait ConfigStore {
    fn get_string(&self, namespace: &str, key: &str) -> Option<String>;
}

/// [`ConfigStore`] over a JSON document: namespaces are top level objects.
#[derive(Debug, Clone, Default)]
pub struct JsonConfigStore {
    root: Value,
}

impl JsonConfigStore {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            root: serde_json::from_str(text)?,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

impl ConfigStore for JsonConfigStore {
    fn get_string(&self, namespace: &str, key: &str) -> Option<String> {
        match self.root.get(namespace)?.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.bus.master_address, 0x71);
        assert_eq!(config.bus.lock_max, 5);
        assert_eq!(config.gateway.port, 9999);
        assert_eq!(config.mqtt.data_topic, "ebus/data");
        assert_eq!(config.mqtt.request_topic, "ebus/req");
        assert_eq!(config.devices.bridge, Some(2));
        assert!(config.mqtt.url.is_none());
    }

    #[test]
    fn test_rejects_slave_master_address() {
        let err = Config::from_json(r#"{"bus": {"master_address": 8}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "bus.master_address", .. }));
    }

    #[test]
    fn test_store_lookup() {
        let store = JsonConfigStore::from_json(r#"{"mqtt": {"url": "mqtt://broker:1883", "port": 1883}}"#).unwrap();
        assert_eq!(store.get_string("mqtt", "url").as_deref(), Some("mqtt://broker:1883"));
        assert_eq!(store.get_string("mqtt", "port").as_deref(), Some("1883"));
        assert_eq!(store.get_string("mqtt", "password"), None);
        assert_eq!(store.get_string("wifi", "ssid"), None);
    }
}
