use crate::units::{
    FUEL_BASE_DECIMALS,
    MAX_DECIMALS,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use rust_decimal::Decimal;
use std::{
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_TESTNET_RPC_URL: &str = "https://testnet.fuel.network";
pub const DEFAULT_DEVNET_RPC_URL: &str = "https://devnet.fuel.network";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:4000/";

pub const DEFAULT_CHAIN_ID: u64 = 0;
pub const DEFAULT_REFRESH_SECS: u64 = 30;
pub const DEFAULT_MARKET_TITLE: &str = "Will Shanghai to San Francisco shipping price in August 2025 exceed 130% of May 2025?";
pub const DEFAULT_RESOLUTION_TEXT: &str = "Resolves September 1, 2025";

/// YES price shown before the first market read completes (0.68).
pub const COLD_START_YES_PRICE: Decimal = Decimal::from_parts(68, 0, 0, false, 2);
/// NO price shown before the first market read completes (0.32).
pub const COLD_START_NO_PRICE: Decimal = Decimal::from_parts(32, 0, 0, false, 2);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkTarget {
    Testnet { url: String },
    Devnet { url: String },
    LocalNode { url: String },
}

impl NetworkTarget {
    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Testnet { url }
            | NetworkTarget::Devnet { url }
            | NetworkTarget::LocalNode { url } => url,
        }
    }
}

#[derive(Clone, Debug)]
pub enum WalletConfig {
    ForcKeystore { owner: String, dir: PathBuf },
}

#[derive(Clone, Debug)]
pub enum BackendMode {
    /// In-process market and wallet; nothing leaves the process.
    Simulated,
    Live {
        network: NetworkTarget,
        wallet: WalletConfig,
        contract_id: Option<String>,
    },
}

impl BackendMode {
    pub fn label(&self) -> String {
        match self {
            BackendMode::Simulated => "simulated".to_string(),
            BackendMode::Live { network, .. } => format!("live ({})", network.url()),
        }
    }
}

/// Market parameters that do not come from the chain.
#[derive(Clone, Debug)]
pub struct MarketConfig {
    pub chain_id: u64,
    pub decimals: u32,
    pub refresh_interval: Duration,
    pub title: String,
    pub resolution: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            decimals: FUEL_BASE_DECIMALS,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            title: DEFAULT_MARKET_TITLE.to_string(),
            resolution: DEFAULT_RESOLUTION_TEXT.to_string(),
        }
    }
}

impl MarketConfig {
    pub fn validate(&self) -> Result<()> {
        if self.decimals > MAX_DECIMALS {
            return Err(eyre!(
                "decimals must be at most {MAX_DECIMALS}, got {}",
                self.decimals
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(eyre!("refresh interval must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: BackendMode,
    pub market: MarketConfig,
    /// Chain the wallet must be on when given explicitly. A live backend
    /// otherwise adopts the node's chain id.
    pub chain_id_override: Option<u64>,
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Chain id a live session should require, given the node's own.
    pub fn effective_chain_id(&self, node_chain_id: u64) -> u64 {
        self.chain_id_override.unwrap_or(node_chain_id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn market_config__default_is_valid() {
        let config = MarketConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.decimals, 9);
    }

    #[test]
    fn market_config__rejects_zero_interval_and_huge_scale() {
        // given
        let zero_interval = MarketConfig {
            refresh_interval: Duration::ZERO,
            ..MarketConfig::default()
        };
        let huge_scale = MarketConfig {
            decimals: 30,
            ..MarketConfig::default()
        };

        // then
        assert!(zero_interval.validate().is_err());
        assert!(huge_scale.validate().is_err());
    }

    #[test]
    fn cold_start_prices__sum_to_one() {
        assert_eq!(COLD_START_YES_PRICE + COLD_START_NO_PRICE, Decimal::ONE);
        assert_eq!(COLD_START_YES_PRICE.to_string(), "0.68");
    }
}
