use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use terra_deployments::{
    content_hash, CodeCache, DeploymentOrchestrator, NetworkClient, SequenceAllocator, Signer,
    TerradSigner, TransactionBroadcaster,
};
use terra_rpc_client::TerraRpc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

use crate::contracts::token;
use crate::scenarios::{
    instantiate_all_contracts, Artifacts, RunReport, ScenarioContext, ScenarioKind,
    ScenarioRunner,
};
use crate::types::{HarnessConfig, HarnessConfigFile, NetworkConfig, DEFAULT_CONFIG_PATH};

/// Deploy the Alice contracts to Terra and run end-to-end scenarios against them.
#[derive(Parser, PartialEq, Clone, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), name = "alice-harness", bin_name = "alice-harness")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
    /// Path to Harness.toml
    #[clap(long = "config", global = true)]
    pub config_path: Option<String>,
    /// Override the LCD endpoint of the configured network
    #[clap(long = "lcd-url", global = true)]
    pub lcd_url: Option<String>,
    /// Write logs to this file instead of stderr
    #[clap(long = "log-file", global = true)]
    pub log_file: Option<String>,
    /// More logs (-v for debug, -vv for trace)
    #[clap(short = 'v', long = "verbose", parse(from_occurrences), global = true)]
    pub verbose: u64,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Run the test scenarios, all of them or the ones named
    #[clap(name = "test", bin_name = "test")]
    Test(Test),
    /// Deploy the overseer and the production token
    #[clap(name = "deploy", bin_name = "deploy")]
    Deploy(Deploy),
    /// Upload a wasm artifact and print its code id
    #[clap(name = "upload", bin_name = "upload")]
    Upload(Upload),
    /// Print the content hash identifying a wasm artifact in the code id cache
    #[clap(name = "hash", bin_name = "hash")]
    Hash(Hash),
}

#[derive(Parser, PartialEq, Clone, Debug)]
struct Test {
    /// Scenarios to run (default: all)
    pub scenarios: Vec<String>,
    /// Run the remaining scenarios after a failure
    #[clap(long = "keep-going")]
    pub keep_going: bool,
    /// Run the scenarios once per configured account, each account on its own thread
    #[clap(long = "parallel")]
    pub parallel: bool,
}

#[derive(Parser, PartialEq, Clone, Debug)]
struct Deploy {
    /// Account signing the deployment
    #[clap(long = "account", default_value = "wallet1")]
    pub account: String,
}

#[derive(Parser, PartialEq, Clone, Debug)]
struct Upload {
    /// Path to the wasm artifact
    pub wasm: String,
    /// Upload even if this bytecode already has a code id on the network
    #[clap(long = "ignore-cache")]
    pub ignore_cache: bool,
    /// Account signing the upload
    #[clap(long = "account", default_value = "wallet1")]
    pub account: String,
}

#[derive(Parser, PartialEq, Clone, Debug)]
struct Hash {
    /// Path to the wasm artifact
    pub wasm: String,
}

pub fn main() {
    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(if e.use_stderr() { 2 } else { 0 });
        }
    };

    let _guard = setup_logging(opts.log_file.as_deref(), opts.verbose);

    if let Command::Hash(cmd) = &opts.command {
        let wasm = read_or_exit(Path::new(&cmd.wasm));
        println!("{}", content_hash(&wasm));
        return;
    }

    let mut config = load_config_or_exit(opts.config_path.as_deref());
    if let Some(lcd_url) = opts.lcd_url {
        config.network.lcd_url = lcd_url;
    }
    let orchestrator = connect(&config);

    match opts.command {
        Command::Test(cmd) => {
            let scenarios = select_scenarios_or_exit(&cmd.scenarios);
            let artifacts =
                Artifacts::from_dir(&config.artifacts_dir).unwrap_or_else(|e| exit_with(e));
            let runner = ScenarioRunner::new().keep_going(cmd.keep_going);

            let account_names: Vec<String> = if cmd.parallel {
                config.accounts.keys().cloned().collect()
            } else {
                vec!["wallet1".to_string()]
            };
            let signers: Vec<TerradSigner> = account_names
                .iter()
                .map(|name| signer_or_exit(&config, name))
                .collect();
            let counterparties = if cmd.parallel {
                let addresses: Vec<String> = signers
                    .iter()
                    .map(|signer| signer.address().to_string())
                    .collect();
                rotate_counterparties(&addresses).unwrap_or_else(|e| exit_with(e))
            } else {
                vec![signer_or_exit(&config, "wallet2").address().to_string()]
            };

            let mut lanes = vec![];
            for (signer, counterparty) in signers.iter().zip(counterparties) {
                let ctx = ScenarioContext {
                    orchestrator: &orchestrator,
                    signer,
                    allocator: allocator_or_exit(&orchestrator, signer),
                    counterparty,
                    artifacts: &artifacts,
                    anchor: config.anchor.clone(),
                    settings: config.scenarios,
                };
                lanes.push((ctx, scenarios.clone()));
            }

            let reports = if cmd.parallel {
                runner.run_parallel(lanes)
            } else {
                lanes
                    .into_iter()
                    .map(|(mut ctx, scenarios)| runner.run(&mut ctx, &scenarios))
                    .collect()
            };

            let mut success = true;
            for report in reports.iter() {
                print_report(report);
                success &= report.success();
            }
            if !success {
                process::exit(1);
            }
        }
        Command::Deploy(cmd) => {
            let artifacts =
                Artifacts::from_dir(&config.artifacts_dir).unwrap_or_else(|e| exit_with(e));
            let signer = signer_or_exit(&config, &cmd.account);
            let owner = signer.address().to_string();
            let mut ctx = ScenarioContext {
                orchestrator: &orchestrator,
                signer: &signer,
                allocator: allocator_or_exit(&orchestrator, &signer),
                counterparty: owner.clone(),
                artifacts: &artifacts,
                anchor: config.anchor.clone(),
                settings: config.scenarios,
            };
            let token_msg = token::InstantiateMsg::production_token(
                &owner,
                &config.anchor.money_market_addr,
                &config.anchor.aterra_token_addr,
            );
            match instantiate_all_contracts(&mut ctx, &token_msg) {
                Ok(deployed) => {
                    println!(
                        "{} Contracts deployed on {}",
                        green!("✔"),
                        config.network.chain_id
                    );
                    let summary = json!({
                        "network": config.network.chain_id,
                        "overseer": deployed.overseer,
                        "token": deployed.token,
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&summary).unwrap_or_default()
                    );
                }
                Err(e) => exit_with(format!("deployment failed: {}", e)),
            }
        }
        Command::Upload(cmd) => {
            let signer = signer_or_exit(&config, &cmd.account);
            let mut allocator = allocator_or_exit(&orchestrator, &signer);
            match orchestrator.upload_code_file(
                &signer,
                &mut allocator,
                Path::new(&cmd.wasm),
                cmd.ignore_cache,
            ) {
                Ok(uploaded) if uploaded.from_cache => println!(
                    "{} {} already stored as code id {}",
                    yellow!("cached"),
                    cmd.wasm,
                    uploaded.code_id
                ),
                Ok(uploaded) => println!(
                    "{} {} as code id {}",
                    green!("Uploaded"),
                    cmd.wasm,
                    uploaded.code_id
                ),
                Err(e) => exit_with(format!("upload failed: {}", e)),
            }
        }
        Command::Hash(_) => {}
    }
}

fn exit_with(message: String) -> ! {
    eprintln!("{} {}", red!("error:"), message);
    process::exit(1);
}

fn setup_logging(log_file: Option<&str>, verbosity: u64) -> Option<WorkerGuard> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    match log_file {
        Some(log_file) => {
            let path = PathBuf::from(log_file);
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let file_name = path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| "alice-harness.log".into());
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn load_config_or_exit(config_path: Option<&str>) -> HarnessConfig {
    let explicit = config_path.is_some();
    let path = PathBuf::from(config_path.unwrap_or(DEFAULT_CONFIG_PATH));
    let config = if path.exists() || explicit {
        HarnessConfig::from_path(&path)
    } else {
        info!("{} not found, using the bombay defaults", path.display());
        HarnessConfig::from_config_file(HarnessConfigFile::default())
    };
    config.unwrap_or_else(|e| exit_with(e))
}

/// Builds the orchestrator for the configured network, warning when the node serves
/// another chain than the one transactions will be signed for.
fn connect(config: &HarnessConfig) -> DeploymentOrchestrator {
    let rpc = Arc::new(TerraRpc::new(&config.network.lcd_url));
    if let Some(mismatch) = node_network_mismatch(rpc.as_ref(), &config.network) {
        warn!("{}", mismatch);
        println!("{} {}", yellow!("warning:"), mismatch);
    }

    let cache = Arc::new(CodeCache::load(&config.cache_path));
    let broadcaster = TransactionBroadcaster::new(
        rpc,
        &config.network.chain_id,
        config.strategy,
        config.fees.clone(),
    );
    DeploymentOrchestrator::new(broadcaster, cache)
}

fn node_network_mismatch(node: &dyn NetworkClient, network: &NetworkConfig) -> Option<String> {
    match node.get_node_info() {
        Ok(info) if info.network != network.chain_id => Some(format!(
            "node at {} reports network {}, expected {}",
            network.lcd_url, info.network, network.chain_id
        )),
        Ok(info) => {
            debug!("connected to {} ({})", info.network, info.version);
            None
        }
        Err(e) => {
            warn!("unable to reach {}: {}", network.lcd_url, e);
            None
        }
    }
}

/// Pairs each signer with the next one, so every lane transfers to a different account.
fn rotate_counterparties(addresses: &[String]) -> Result<Vec<String>, String> {
    if addresses.len() < 2 {
        return Err(format!(
            "--parallel needs at least two configured accounts, found {}",
            addresses.len()
        ));
    }
    Ok(addresses
        .iter()
        .cycle()
        .skip(1)
        .take(addresses.len())
        .cloned()
        .collect())
}

fn signer_or_exit(config: &HarnessConfig, account: &str) -> TerradSigner {
    let account_config = config.account(account).unwrap_or_else(|e| exit_with(e));
    TerradSigner::new(
        config.terrad.binary.clone(),
        &account_config.key_name,
        &account_config.keyring_backend,
        config.terrad.home.clone(),
        account_config.address.clone(),
    )
    .unwrap_or_else(|e| exit_with(format!("unable to load key for {}: {}", account, e)))
}

fn allocator_or_exit(
    orchestrator: &DeploymentOrchestrator,
    signer: &dyn Signer,
) -> SequenceAllocator {
    let network: &dyn NetworkClient = orchestrator.broadcaster().network().as_ref();
    SequenceAllocator::initialize(network, signer.address()).unwrap_or_else(|e| {
        exit_with(format!(
            "unable to fetch account {}: {}",
            signer.address(),
            e
        ))
    })
}

fn read_or_exit(path: &Path) -> Vec<u8> {
    std::fs::read(path)
        .unwrap_or_else(|e| exit_with(format!("unable to read {}: {}", path.display(), e)))
}

fn select_scenarios_or_exit(names: &[String]) -> Vec<ScenarioKind> {
    if names.is_empty() {
        return ScenarioKind::catalogue();
    }
    names
        .iter()
        .map(|name| {
            ScenarioKind::from_str(name).unwrap_or_else(|_| {
                let available: Vec<String> = ScenarioKind::catalogue()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                exit_with(format!(
                    "unknown scenario '{}' (available: {})",
                    name,
                    available.join(", ")
                ))
            })
        })
        .collect()
}

fn print_report(report: &RunReport) {
    println!("{}", blue!("scenarios signed by {}", report.signer));
    for result in report.results.iter() {
        match result.error {
            None => println!(
                "{} {} ({:.1}s)",
                green!("✔"),
                result.name,
                result.elapsed.as_secs_f64()
            ),
            Some(ref e) => println!("{} {}: {}", red!("x"), result.name, e),
        }
    }
    println!(
        "{} passed, {} failed",
        report.results.len() - report.failures(),
        report.failures()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use terra_deployments::testing::FakeNetwork;

    fn network_config(chain_id: &str) -> NetworkConfig {
        NetworkConfig {
            name: "custom".into(),
            preset: None,
            chain_id: chain_id.into(),
            lcd_url: "http://localhost:1317".into(),
        }
    }

    #[test]
    fn it_warns_when_the_node_serves_another_network() {
        let node = FakeNetwork::new("bombay-12");

        let mismatch = node_network_mismatch(&node, &network_config("columbus-5")).unwrap();
        assert!(mismatch.contains("bombay-12"));
        assert!(mismatch.contains("columbus-5"));
        assert_eq!(node_network_mismatch(&node, &network_config("bombay-12")), None);
    }

    #[test]
    fn it_pairs_parallel_signers_with_the_next_account() {
        let addresses = vec!["terra1a".to_string(), "terra1b".into(), "terra1c".into()];
        assert_eq!(
            rotate_counterparties(&addresses).unwrap(),
            vec!["terra1b", "terra1c", "terra1a"]
        );
        assert!(rotate_counterparties(&addresses[..1]).is_err());
        assert!(rotate_counterparties(&[]).is_err());
    }
}
