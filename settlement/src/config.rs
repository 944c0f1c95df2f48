//! Configuration for the settlement chaincode

use ledger_core::{Channel, Principal};
use serde::{Deserialize, Serialize};

/// Chaincode configuration, fixed at initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Principal allowed to run admin functions
    pub regulator_principal: String,

    /// Try bilateral netting before queueing
    pub bilateral_netting_enabled: bool,

    /// Minutes after which an ONGOING cycle expires
    pub cycle_expiry_minutes: i64,

    /// Intermediary channel holding transient funds
    pub funding_channel_name: String,

    /// Chaincode installed on the funding channel
    pub funding_chaincode_name: String,

    /// Settlement chaincode name, queried back by the funding chaincode
    pub bilateral_chaincode_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "rtgs-settlement".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            regulator_principal: "regulator".to_string(),
            bilateral_netting_enabled: true,
            cycle_expiry_minutes: 10,
            funding_channel_name: "fundingchannel".to_string(),
            funding_chaincode_name: "fundingchannel_cc".to_string(),
            bilateral_chaincode_name: "bilateralchannel_cc".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(regulator) = std::env::var("RTGS_REGULATOR") {
            config.regulator_principal = regulator;
        }

        if let Ok(enabled) = std::env::var("RTGS_BILATERAL_NETTING") {
            config.bilateral_netting_enabled = enabled.parse().map_err(|_| {
                crate::Error::Config(format!("RTGS_BILATERAL_NETTING is not a bool: {}", enabled))
            })?;
        }

        if let Ok(minutes) = std::env::var("RTGS_CYCLE_EXPIRY_MINUTES") {
            config.cycle_expiry_minutes = minutes.parse().map_err(|_| {
                crate::Error::Config(format!(
                    "RTGS_CYCLE_EXPIRY_MINUTES is not an integer: {}",
                    minutes
                ))
            })?;
        }

        if let Ok(channel) = std::env::var("RTGS_FUNDING_CHANNEL") {
            config.funding_channel_name = channel;
        }

        if let Ok(name) = std::env::var("RTGS_FUNDING_CHAINCODE") {
            config.funding_chaincode_name = name;
        }

        if let Ok(name) = std::env::var("RTGS_BILATERAL_CHAINCODE") {
            config.bilateral_chaincode_name = name;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject empty names and a non-positive expiry
    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [
            ("regulator_principal", &self.regulator_principal),
            ("funding_channel_name", &self.funding_channel_name),
            ("funding_chaincode_name", &self.funding_chaincode_name),
            ("bilateral_chaincode_name", &self.bilateral_chaincode_name),
        ] {
            if value.trim().is_empty() {
                return Err(crate::Error::Config(format!("{} must not be empty", name)));
            }
        }
        if self.cycle_expiry_minutes <= 0 {
            return Err(crate::Error::Config(format!(
                "cycle_expiry_minutes must be positive, got {}",
                self.cycle_expiry_minutes
            )));
        }
        Ok(())
    }

    /// Regulator as a principal
    pub fn regulator(&self) -> Principal {
        Principal::new(self.regulator_principal.clone())
    }

    /// Funding channel as a typed channel
    pub fn funding_channel(&self) -> Channel {
        Channel::new(self.funding_channel_name.clone())
    }

    /// Cycle timeout
    pub fn cycle_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cycle_expiry_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.regulator_principal, "regulator");
        assert!(config.bilateral_netting_enabled);
        assert_eq!(config.cycle_expiry(), chrono::Duration::minutes(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.cycle_expiry_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.funding_channel_name = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str("cycle_expiry_minutes = 3\nbilateral_netting_enabled = false").unwrap();
        assert_eq!(config.cycle_expiry_minutes, 3);
        assert!(!config.bilateral_netting_enabled);
        assert_eq!(config.funding_chaincode_name, "fundingchannel_cc");
    }
}
