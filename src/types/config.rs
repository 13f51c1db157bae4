use indexmap::IndexMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumIter, EnumString};
use terra_deployments::broadcaster::{
    DEFAULT_BLOCK_ATTEMPTS, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
use terra_deployments::{BroadcastStrategy, FeeConfig, DEFAULT_CACHE_PATH};

use crate::scenarios::ScenarioSettings;

pub const DEFAULT_CONFIG_PATH: &str = "Harness.toml";
pub const DEFAULT_ARTIFACTS_DIR: &str = "../artifacts";
pub const BOMBAY_LCD_ENV: &str = "BOMBAY_LCD";

pub const TESTNET_MONEY_MARKET_ADDR: &str = "terra15dwd5mj8v59wpj0wvt233mf5efdff808c5tkal";
pub const TESTNET_ATERRA_TOKEN_ADDR: &str = "terra1ajt556dpzvjwl0kl5tzku3fc3p3knkg9mkv8jl";
pub const MAINNET_MONEY_MARKET_ADDR: &str = "terra1sepfj7s0aeg5967uxnfk4thzlerrsktkpelm5s";
pub const MAINNET_ATERRA_TOKEN_ADDR: &str = "terra1hzh9vpxhsk8253se0vv5jj6etdvxu3nv8z07zu";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum NetworkPreset {
    Columbus,
    Bombay,
}

impl NetworkPreset {
    pub fn chain_id(&self) -> &'static str {
        match self {
            NetworkPreset::Columbus => "columbus-5",
            NetworkPreset::Bombay => "bombay-12",
        }
    }

    pub fn lcd_url(&self) -> String {
        match self {
            NetworkPreset::Columbus => "https://lcd.terra.dev".into(),
            NetworkPreset::Bombay => std::env::var(BOMBAY_LCD_ENV)
                .unwrap_or_else(|_| "https://bombay.stakesystems.io".into()),
        }
    }

    pub fn is_mainnet(&self) -> bool {
        matches!(self, NetworkPreset::Columbus)
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct HarnessConfigFile {
    network: Option<NetworkConfigFile>,
    fees: Option<FeesConfigFile>,
    broadcast: Option<BroadcastConfigFile>,
    cache: Option<CacheConfigFile>,
    artifacts: Option<ArtifactsConfigFile>,
    terrad: Option<TerradConfigFile>,
    accounts: Option<IndexMap<String, AccountConfigFile>>,
    anchor: Option<AnchorConfigFile>,
    scenarios: Option<ScenariosConfigFile>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct NetworkConfigFile {
    name: Option<String>,
    chain_id: Option<String>,
    lcd_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct FeesConfigFile {
    gas_price: Option<f64>,
    gas_denom: Option<String>,
    gas_adjustment: Option<f64>,
    gas_limit: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct BroadcastConfigFile {
    strategy: Option<String>,
    poll_interval_ms: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct CacheConfigFile {
    path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ArtifactsConfigFile {
    dir: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TerradConfigFile {
    binary: Option<String>,
    home: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct AccountConfigFile {
    key_name: Option<String>,
    keyring_backend: Option<String>,
    address: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct AnchorConfigFile {
    money_market_addr: Option<String>,
    aterra_token_addr: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ScenariosConfigFile {
    settle_delay_secs: Option<u64>,
    timelock_secs: Option<u64>,
    timelock_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub network: NetworkConfig,
    pub fees: FeeConfig,
    pub strategy: BroadcastStrategy,
    pub cache_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub terrad: TerradConfig,
    pub accounts: IndexMap<String, AccountConfig>,
    pub anchor: AnchorConfig,
    pub scenarios: ScenarioSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub name: String,
    pub preset: Option<NetworkPreset>,
    pub chain_id: String,
    pub lcd_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerradConfig {
    pub binary: PathBuf,
    pub home: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub key_name: String,
    pub keyring_backend: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorConfig {
    pub money_market_addr: String,
    pub aterra_token_addr: String,
}

impl HarnessConfig {
    pub fn from_path(path: &Path) -> Result<HarnessConfig, String> {
        let file = File::open(path)
            .map_err(|e| format!("unable to open {}: {}", path.display(), e))?;
        let mut config_file_reader = BufReader::new(file);
        let mut config_file_buffer = vec![];
        config_file_reader
            .read_to_end(&mut config_file_buffer)
            .map_err(|e| format!("unable to read {}: {}", path.display(), e))?;
        let config_file: HarnessConfigFile = toml::from_slice(&config_file_buffer[..])
            .map_err(|e| format!("unable to parse {}: {}", path.display(), e))?;
        HarnessConfig::from_config_file(config_file)
    }

    pub fn from_config_file(config_file: HarnessConfigFile) -> Result<HarnessConfig, String> {
        let network_file = config_file.network.unwrap_or_default();
        let name = network_file.name.unwrap_or_else(|| "bombay".to_string());
        let preset = NetworkPreset::from_str(&name).ok();
        let network = match preset {
            Some(preset) => NetworkConfig {
                name: name.clone(),
                preset: Some(preset),
                chain_id: network_file
                    .chain_id
                    .unwrap_or_else(|| preset.chain_id().to_string()),
                lcd_url: network_file.lcd_url.unwrap_or_else(|| preset.lcd_url()),
            },
            None => NetworkConfig {
                name: name.clone(),
                preset: None,
                chain_id: network_file
                    .chain_id
                    .ok_or(format!("network '{}' requires a chain_id", name))?,
                lcd_url: network_file
                    .lcd_url
                    .ok_or(format!("network '{}' requires an lcd_url", name))?,
            },
        };

        let fees_file = config_file.fees.unwrap_or_default();
        let default_fees = FeeConfig::default();
        let fees = FeeConfig {
            gas_price: fees_file.gas_price.unwrap_or(default_fees.gas_price),
            gas_denom: fees_file.gas_denom.unwrap_or(default_fees.gas_denom),
            gas_adjustment: fees_file
                .gas_adjustment
                .unwrap_or(default_fees.gas_adjustment),
            gas_limit: fees_file.gas_limit,
        };
        if fees.gas_price < 0.0 || fees.gas_adjustment <= 0.0 {
            return Err("gas_price and gas_adjustment must be positive".into());
        }

        let broadcast_file = config_file.broadcast.unwrap_or_default();
        if broadcast_file.max_attempts == Some(0) {
            return Err("broadcast max_attempts must be at least 1".into());
        }
        let strategy = match broadcast_file.strategy.as_deref().unwrap_or("poll") {
            "poll" => BroadcastStrategy::PollUntilIncluded {
                interval: broadcast_file
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                max_attempts: broadcast_file.max_attempts.unwrap_or(DEFAULT_POLL_ATTEMPTS),
            },
            "block" => BroadcastStrategy::BlockingWithRetry {
                max_attempts: broadcast_file.max_attempts.unwrap_or(DEFAULT_BLOCK_ATTEMPTS),
            },
            other => {
                return Err(format!(
                    "unknown broadcast strategy '{}' (expected 'poll' or 'block')",
                    other
                ))
            }
        };

        let cache_path = PathBuf::from(
            config_file
                .cache
                .and_then(|cache| cache.path)
                .unwrap_or_else(|| DEFAULT_CACHE_PATH.to_string()),
        );
        let artifacts_dir = PathBuf::from(
            config_file
                .artifacts
                .and_then(|artifacts| artifacts.dir)
                .unwrap_or_else(|| DEFAULT_ARTIFACTS_DIR.to_string()),
        );

        let terrad_file = config_file.terrad.unwrap_or_default();
        let terrad = TerradConfig {
            binary: PathBuf::from(terrad_file.binary.unwrap_or_else(|| "terrad".into())),
            home: terrad_file.home.map(PathBuf::from),
        };

        let mut accounts = IndexMap::new();
        match config_file.accounts {
            Some(entries) => {
                for (account_name, account_settings) in entries.into_iter() {
                    let key_name = account_settings
                        .key_name
                        .unwrap_or_else(|| account_name.clone());
                    accounts.insert(
                        account_name,
                        AccountConfig {
                            key_name,
                            keyring_backend: account_settings
                                .keyring_backend
                                .unwrap_or_else(|| "test".into()),
                            address: account_settings.address,
                        },
                    );
                }
            }
            None => {
                for (account_name, key_name) in [("wallet1", "test1"), ("wallet2", "test2")] {
                    accounts.insert(
                        account_name.to_string(),
                        AccountConfig {
                            key_name: key_name.to_string(),
                            keyring_backend: "test".into(),
                            address: None,
                        },
                    );
                }
            }
        };

        let is_mainnet = preset.map(|p| p.is_mainnet()).unwrap_or(false);
        let anchor_file = config_file.anchor.unwrap_or_default();
        let anchor = AnchorConfig {
            money_market_addr: anchor_file.money_market_addr.unwrap_or_else(|| {
                if is_mainnet {
                    MAINNET_MONEY_MARKET_ADDR.into()
                } else {
                    TESTNET_MONEY_MARKET_ADDR.into()
                }
            }),
            aterra_token_addr: anchor_file.aterra_token_addr.unwrap_or_else(|| {
                if is_mainnet {
                    MAINNET_ATERRA_TOKEN_ADDR.into()
                } else {
                    TESTNET_ATERRA_TOKEN_ADDR.into()
                }
            }),
        };

        let scenarios_file = config_file.scenarios.unwrap_or_default();
        let defaults = ScenarioSettings::default();
        let scenarios = ScenarioSettings {
            settle_delay: scenarios_file
                .settle_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.settle_delay),
            timelock: scenarios_file
                .timelock_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timelock),
            timelock_grace: scenarios_file
                .timelock_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timelock_grace),
        };

        Ok(HarnessConfig {
            network,
            fees,
            strategy,
            cache_path,
            artifacts_dir,
            terrad,
            accounts,
            anchor,
            scenarios,
        })
    }

    pub fn account(&self, name: &str) -> Result<&AccountConfig, String> {
        self.accounts
            .get(name)
            .ok_or(format!("account '{}' is not configured", name))
    }
}
