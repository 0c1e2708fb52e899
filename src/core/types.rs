use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Appliance serial number, stable across address changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerialNumber(pub u32);

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fan behaviour as presented to callers.
///
/// The appliance only knows two independent toggles, fan boost and flame
/// effect. Both off is `Auto`; at most one of them is ever commanded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    Auto,
    FanBoost,
    FlameEffect,
}

impl FanMode {
    /// All modes, in the order they are usually presented
    pub const ALL: [FanMode; 3] = [FanMode::Auto, FanMode::FanBoost, FanMode::FlameEffect];

    /// Derives the mode from the appliance toggles.
    ///
    /// Both toggles on is not a state this driver ever commands; if a unit
    /// reports it anyway, boost wins.
    pub fn from_toggles(fan_boost: bool, flame_effect: bool) -> Self {
        match (fan_boost, flame_effect) {
            (true, _) => FanMode::FanBoost,
            (false, true) => FanMode::FlameEffect,
            (false, false) => FanMode::Auto,
        }
    }

    /// Returns the (fan boost, flame effect) toggles for this mode
    pub fn toggles(&self) -> (bool, bool) {
        match self {
            FanMode::Auto => (false, false),
            FanMode::FanBoost => (true, false),
            FanMode::FlameEffect => (false, true),
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FanMode::Auto => "auto",
            FanMode::FanBoost => "fan boost",
            FanMode::FlameEffect => "flame effect",
        };
        f.write_str(name)
    }
}

/// Settings for the UDP exchange with appliances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Port every appliance listens on
    pub port: u16,
    /// Address used for the search broadcast
    pub broadcast_addr: IpAddr,
    /// How long one exchange waits for replies
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub request_timeout: Duration,
}

impl TransportConfig {
    /// Destination of the search broadcast
    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.port)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            port: super::DEFAULT_PORT,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Timing of the per-appliance connection state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Poll interval while the appliance answers
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub refresh_interval: Duration,
    /// Poll interval after a missed reply
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub retry_interval: Duration,
    /// Silence after which the appliance counts as disconnected
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub retry_timeout: Duration,
    /// Poll interval while disconnected
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub disconnected_interval: Duration,
    /// Settle time after a power command
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub busy_wait: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            refresh_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(10),
            retry_timeout: Duration::from_secs(60),
            disconnected_interval: Duration::from_secs(60),
            busy_wait: Duration::from_secs(120),
        }
    }
}

/// Timing of the discovery scan loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval between search broadcasts
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub scan_interval: Duration,
    /// Interval between search broadcasts while an appliance is disconnected
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub rescan_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            scan_interval: Duration::from_secs(5 * 60),
            rescan_interval: Duration::from_secs(5),
        }
    }
}

/// Configuration for the whole driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub controller: ControllerConfig,
    pub discovery: DiscoveryConfig,
}

impl Config {
    /// Checks the timing relationships the state machine relies on
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("transport.request_timeout", self.transport.request_timeout),
            ("controller.refresh_interval", self.controller.refresh_interval),
            ("controller.retry_interval", self.controller.retry_interval),
            ("controller.retry_timeout", self.controller.retry_timeout),
            ("controller.disconnected_interval", self.controller.disconnected_interval),
            ("discovery.scan_interval", self.discovery.scan_interval),
            ("discovery.rescan_interval", self.discovery.rescan_interval),
        ];
        for (name, value) in nonzero {
            if value.is_zero() {
                return Err(Error::config(format!("{} must be greater than zero", name)));
            }
        }

        if self.controller.retry_timeout < self.controller.retry_interval {
            return Err(Error::config(
                "controller.retry_timeout must not be shorter than controller.retry_interval",
            ));
        }

        if self.transport.port == 0 {
            return Err(Error::config("transport.port must not be zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_mode_toggles() {
        for mode in FanMode::ALL {
            let (boost, effect) = mode.toggles();
            assert_eq!(FanMode::from_toggles(boost, effect), mode);
        }
        assert_eq!(FanMode::from_toggles(true, true), FanMode::FanBoost);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.port, 3300);
        assert_eq!(
            config.transport.broadcast_target(),
            "255.255.255.255:3300".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.controller.retry_timeout = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.transport.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let json = r#"{ "transport": { "request_timeout": 0.5 }, "controller": { "busy_wait": 90 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.transport.request_timeout, Duration::from_millis(500));
        assert_eq!(config.transport.port, 3300);
        assert_eq!(config.controller.busy_wait, Duration::from_secs(90));
        assert_eq!(config.controller.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }
}
