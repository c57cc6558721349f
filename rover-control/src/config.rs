//! Configuration for the control core
//!
//! Stored as TOML. Every field has a default so a partial file (or none at
//! all) yields a working single-byte deployment.
//!
//! ```toml
//! [base]
//! packet_format = "command_speed"
//! default_speed = 200
//! heartbeat_period_ms = 100
//! write_mode = "without_response"
//! address = "AA:BB:CC:DD:EE:FF"
//!
//! [base.commands]
//! stop = 0
//! forward = 2
//! backward = 1
//! # ...
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_transport::protocol::timing;
use rover_transport::{
    BaseCodec, BasePacketFormat, BusyPolicy, CommandTable, EndpointId, WriteMode,
};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::shaper::DEFAULT_DEADZONE;

/// Arm endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmConfig {
    /// Minimum spacing between slider-driven sends
    #[serde(default = "default_min_interval")]
    pub min_send_interval_ms: u64,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Peripheral address to accept; absent means match by service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            min_send_interval_ms: default_min_interval(),
            busy_policy: BusyPolicy::default(),
            write_mode: WriteMode::default(),
            address: None,
        }
    }
}

/// Base endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub packet_format: BasePacketFormat,
    /// Speed byte used until the user changes it (command+speed packets only)
    #[serde(default = "default_speed")]
    pub default_speed: u8,
    /// Retransmit period while a command is held; absent means single sends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_period_ms: Option<u64>,
    #[serde(default = "default_min_interval")]
    pub min_send_interval_ms: u64,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    /// Write request or write command; some firmware only accepts the latter
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Motion → wire code table
    #[serde(default)]
    pub commands: CommandTable,
}

fn default_min_interval() -> u64 {
    timing::MIN_SEND_INTERVAL_MS
}
fn default_speed() -> u8 {
    200
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            packet_format: BasePacketFormat::CommandOnly,
            default_speed: default_speed(),
            heartbeat_period_ms: None,
            min_send_interval_ms: default_min_interval(),
            busy_policy: BusyPolicy::default(),
            write_mode: WriteMode::default(),
            address: None,
            commands: CommandTable::standard(),
        }
    }
}

impl BaseConfig {
    /// Two-byte `(command, speed)` firmware with diagonals and a 100 ms heartbeat
    pub fn speed_heartbeat() -> Self {
        Self {
            packet_format: BasePacketFormat::CommandSpeed,
            heartbeat_period_ms: Some(timing::HEARTBEAT_PERIOD_MS),
            commands: CommandTable::standard().with_diagonals(),
            ..Self::default()
        }
    }

    pub fn codec(&self) -> BaseCodec {
        BaseCodec::new(self.commands.clone(), self.packet_format)
    }

    pub fn heartbeat_period(&self) -> Option<Duration> {
        self.heartbeat_period_ms.map(Duration::from_millis)
    }
}

/// Input shaping settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Fraction of the joystick radius treated as neutral
    #[serde(default = "default_deadzone")]
    pub deadzone: f64,
    /// Pointer distance that counts as full deflection
    #[serde(default = "default_radius")]
    pub joystick_radius: f64,
}

fn default_deadzone() -> f64 {
    DEFAULT_DEADZONE
}
fn default_radius() -> f64 {
    1.0
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            deadzone: default_deadzone(),
            joystick_radius: default_radius(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Upper bound on discovery + handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout() -> u64 {
    timing::CONNECT_TIMEOUT_MS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Complete control core configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub arm: ArmConfig,
    #[serde(default)]
    pub base: BaseConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl ControlConfig {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rover-remote")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ControlConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.base.commands.validate()?;
        if !(0.0..1.0).contains(&self.input.deadzone) {
            return Err(ControlError::InvalidConfig(format!(
                "deadzone must be in [0, 1), got {}",
                self.input.deadzone
            )));
        }
        if self.input.joystick_radius.is_nan() || self.input.joystick_radius <= 0.0 {
            return Err(ControlError::InvalidConfig(
                "joystick_radius must be positive".into(),
            ));
        }
        if self.base.heartbeat_period_ms == Some(0) {
            return Err(ControlError::InvalidConfig(
                "heartbeat_period_ms must be positive".into(),
            ));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ControlError::InvalidConfig(
                "connect_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn busy_policies(&self) -> HashMap<EndpointId, BusyPolicy> {
        HashMap::from([
            (EndpointId::Arm, self.arm.busy_policy),
            (EndpointId::Base, self.base.busy_policy),
        ])
    }

    pub fn write_modes(&self) -> HashMap<EndpointId, WriteMode> {
        HashMap::from([
            (EndpointId::Arm, self.arm.write_mode),
            (EndpointId::Base, self.base.write_mode),
        ])
    }

    /// Endpoints with a configured peripheral address
    pub fn pinned_addresses(&self) -> Vec<(EndpointId, &str)> {
        [
            (EndpointId::Arm, self.arm.address.as_deref()),
            (EndpointId::Base, self.base.address.as_deref()),
        ]
        .into_iter()
        .filter_map(|(endpoint, address)| address.map(|a| (endpoint, a)))
        .collect()
    }

    /// Rate-limit interval for continuous input on an endpoint
    pub fn min_send_interval(&self, endpoint: EndpointId) -> Duration {
        Duration::from_millis(match endpoint {
            EndpointId::Arm => self.arm.min_send_interval_ms,
            EndpointId::Base => self.base.min_send_interval_ms,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_transport::{CodecError, MotionCommand};

    #[test]
    fn test_default_config_serializes() {
        let config = ControlConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("packet_format = \"command_only\""));
        assert!(toml_str.contains("busy_policy = \"drop_stale\""));
        assert!(toml_str.contains("write_mode = \"with_response\""));
        assert!(!toml_str.contains("address"));
        assert!(!toml_str.contains("heartbeat_period_ms"));
        assert!(!toml_str.contains("forward_left"));
    }

    #[test]
    fn test_roundtrip_speed_heartbeat() {
        let config = ControlConfig {
            base: BaseConfig::speed_heartbeat(),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ControlConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.base.heartbeat_period(), Some(Duration::from_millis(100)));
        assert_eq!(parsed.base.commands.code(MotionCommand::BackwardRight), Some(10));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let partial = r#"
[base]
packet_format = "command_speed"

[base.commands]
stop = 0
forward = 2
backward = 1
left = 4
right = 3
rotate_left = 5
rotate_right = 6
"#;
        let config: ControlConfig = toml::from_str(partial).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.base.commands, CommandTable::swapped());
        assert_eq!(config.base.default_speed, 200);
        assert_eq!(config.input.deadzone, 0.2);
        assert_eq!(config.min_send_interval(EndpointId::Arm), Duration::from_millis(50));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_per_endpoint_write_mode_and_address() {
        let partial = r#"
[arm]
address = "AA:BB:CC:DD:EE:01"

[base]
write_mode = "without_response"
"#;
        let config: ControlConfig = toml::from_str(partial).unwrap();
        let modes = config.write_modes();
        assert_eq!(modes[&EndpointId::Base], WriteMode::WithoutResponse);
        assert_eq!(modes[&EndpointId::Arm], WriteMode::WithResponse);
        assert_eq!(
            config.pinned_addresses(),
            vec![(EndpointId::Arm, "AA:BB:CC:DD:EE:01")]
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ControlConfig::default();
        config.base.commands.rotate_left = 0;
        assert!(matches!(
            config.validate(),
            Err(ControlError::Codec(CodecError::DuplicateCode { code: 0, .. }))
        ));

        let mut config = ControlConfig::default();
        config.input.deadzone = 1.0;
        assert!(matches!(config.validate(), Err(ControlError::InvalidConfig(_))));

        let mut config = ControlConfig::default();
        config.base.heartbeat_period_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = ControlConfig::default();
        config.input.joystick_radius = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("rover-remote-test-missing").join("none.toml");
        let config = ControlConfig::load(&path).unwrap();
        assert_eq!(config, ControlConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("rover-remote-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = ControlConfig::default();
        config.base.default_speed = 90;
        config.save(&path).unwrap();

        let loaded = ControlConfig::load(&path).unwrap();
        assert_eq!(loaded.base.default_speed, 90);
        let _ = std::fs::remove_dir_all(dir);
    }
}
