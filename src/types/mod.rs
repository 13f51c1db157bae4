mod config;

pub use config::{
    AccountConfig, AnchorConfig, HarnessConfig, HarnessConfigFile, NetworkConfig, NetworkPreset,
    TerradConfig, DEFAULT_CONFIG_PATH, MAINNET_ATERRA_TOKEN_ADDR, MAINNET_MONEY_MARKET_ADDR,
    TESTNET_ATERRA_TOKEN_ADDR, TESTNET_MONEY_MARKET_ADDR,
};
