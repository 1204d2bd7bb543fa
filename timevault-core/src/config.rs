//! Deployment configuration.

use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{TimeVaultError, TimeVaultResult};

/// Default IPFS gateway used to fetch content.
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.pinata.cloud";

const DEFAULT_FINALIZATION_TIMEOUT_SECS: u64 = 120;

/// Chains the `TimeVault` contract is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    /// Base mainnet.
    #[default]
    Base,
    /// Base Sepolia testnet.
    BaseSepolia,
}

impl Network {
    /// EIP-155 chain id.
    #[must_use]
    pub const fn chain_id(self) -> u64 {
        match self {
            Self::Base => 8453,
            Self::BaseSepolia => 84532,
        }
    }

    /// Public RPC endpoint used when no override is configured.
    #[must_use]
    pub const fn default_rpc_url(self) -> &'static str {
        match self {
            Self::Base => "https://mainnet.base.org",
            Self::BaseSepolia => "https://sepolia.base.org",
        }
    }

    /// Human-readable name, as shown in token metadata.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Base => "Base",
            Self::BaseSepolia => "Base Sepolia",
        }
    }
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

const fn default_finalization_timeout_secs() -> u64 {
    DEFAULT_FINALIZATION_TIMEOUT_SECS
}

const fn default_confirmations() -> u64 {
    1
}

/// Where the vault contract lives and how long to wait on it. Holds no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Target chain.
    #[serde(default)]
    pub network: Network,
    /// RPC endpoint override.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Address of the deployed `TimeVault` contract.
    pub contract_address: Address,
    /// IPFS gateway for fetching content.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Upper bound on waiting for a transaction to finalize.
    #[serde(default = "default_finalization_timeout_secs")]
    pub finalization_timeout_secs: u64,
    /// Blocks to wait for before a receipt counts as final.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

impl Config {
    /// Config for `network` with defaults for everything but the contract.
    #[must_use]
    pub fn new(network: Network, contract_address: Address) -> Self {
        Self {
            network,
            rpc_url: None,
            contract_address,
            gateway_url: default_gateway_url(),
            finalization_timeout_secs: DEFAULT_FINALIZATION_TIMEOUT_SECS,
            confirmations: default_confirmations(),
        }
    }

    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// - [`TimeVaultError::SerializationError`] if the JSON does not parse.
    /// - [`TimeVaultError::InvalidConfig`] if a value is unusable.
    pub fn from_json(json: &str) -> TimeVaultResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`TimeVaultError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> TimeVaultResult<()> {
        if self.contract_address.is_zero() {
            return Err(TimeVaultError::InvalidConfig(
                "contractAddress must not be the zero address".to_string(),
            ));
        }
        if self.finalization_timeout_secs == 0 {
            return Err(TimeVaultError::InvalidConfig(
                "finalizationTimeoutSecs must be positive".to_string(),
            ));
        }
        if !self.gateway_url.starts_with("https://") {
            return Err(TimeVaultError::InvalidConfig(format!(
                "gatewayUrl must be https, got {}",
                self.gateway_url
            )));
        }
        Ok(())
    }

    /// RPC endpoint: the override if set, else the network default.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        self.rpc_url
            .as_deref()
            .unwrap_or_else(|| self.network.default_rpc_url())
    }

    /// Finalization timeout as a [`Duration`].
    #[must_use]
    pub const fn finalization_timeout(&self) -> Duration {
        Duration::from_secs(self.finalization_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::address;

    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!(Network::from_str("base").unwrap(), Network::Base);
        assert_eq!(Network::from_str("base-sepolia").unwrap(), Network::BaseSepolia);
        assert!(Network::from_str("mainnet").is_err());
        assert_eq!(Network::BaseSepolia.to_string(), "base-sepolia");
        assert_eq!(Network::BaseSepolia.chain_id(), 84532);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_json(
            r#"{"contractAddress":"0x1111111111111111111111111111111111111111"}"#,
        )
        .unwrap();

        assert_eq!(config.network, Network::Base);
        assert_eq!(config.rpc_url(), "https://mainnet.base.org");
        assert_eq!(config.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.finalization_timeout(), Duration::from_secs(120));
        assert_eq!(config.confirmations, 1);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_json(
            r#"{
                "network": "base-sepolia",
                "rpcUrl": "https://rpc.example",
                "contractAddress": "0x1111111111111111111111111111111111111111",
                "finalizationTimeoutSecs": 30,
                "confirmations": 3
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.contract_address,
            address!("0x1111111111111111111111111111111111111111")
        );
        assert_eq!(config.rpc_url(), "https://rpc.example");
        assert_eq!(config.finalization_timeout(), Duration::from_secs(30));
        assert_eq!(config.confirmations, 3);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(matches!(
            Config::from_json(r#"{"contractAddress":"0x0000000000000000000000000000000000000000"}"#),
            Err(TimeVaultError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"contractAddress":"0x11"}"#),
            Err(TimeVaultError::SerializationError(_))
        ));
        let mut config = Config::new(Network::Base, Address::repeat_byte(1));
        config.gateway_url = "http://insecure.example".to_string();
        assert!(matches!(config.validate(), Err(TimeVaultError::InvalidConfig(_))));
    }
}
