//! End-to-end scenarios against a live (or fake) Terra network.
//!
//! Each scenario deploys its own contracts through a [`ScenarioContext`], which owns the
//! signer's [`SequenceAllocator`] for the duration of the run. The [`ScenarioRunner`]
//! executes scenarios in order and records one [`ScenarioResult`] per scenario.

mod deployment;
mod migration;
mod token;

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use terra_deployments::{
    BroadcastError, DeploymentError, DeploymentOrchestrator, SequenceAllocator, Signer,
    TransactionOutcome,
};
use terra_rpc_client::Coin;

use crate::contracts::{self, overseer};
use crate::types::AnchorConfig;

pub use deployment::{instantiate_all_contracts, DeployedContracts};

/// Timelock of the overseer that governs a deployment.
pub const GOVERNANCE_TIMELOCK_SECS: u64 = 60;
pub const STABLE_DENOM: &str = "uusd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioSettings {
    /// Pause after a deposit or redeem, before reading balances back.
    pub settle_delay: Duration,
    /// Timelock of the overseers deployed by the migration scenarios.
    pub timelock: Duration,
    /// Extra wait past the timelock before retrying a migration.
    pub timelock_grace: Duration,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        ScenarioSettings {
            settle_delay: Duration::from_secs(5),
            timelock: Duration::from_secs(15),
            timelock_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    Deployment(DeploymentError),
    Broadcast(BroadcastError),
    Assertion(String),
    UnexpectedSuccess { action: String, tx_hash: String },
    Query(String),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::Deployment(e) => write!(f, "deployment failed: {}", e),
            ScenarioError::Broadcast(e) => write!(f, "{}", e),
            ScenarioError::Assertion(e) => write!(f, "assertion failed: {}", e),
            ScenarioError::UnexpectedSuccess { action, tx_hash } => {
                write!(f, "{} was expected to fail but tx {} succeeded", action, tx_hash)
            }
            ScenarioError::Query(e) => write!(f, "query failed: {}", e),
        }
    }
}

impl From<DeploymentError> for ScenarioError {
    fn from(error: DeploymentError) -> Self {
        match error {
            DeploymentError::Broadcast(e) => ScenarioError::Broadcast(e),
            DeploymentError::Query(e) => ScenarioError::Query(e.to_string()),
            other => ScenarioError::Deployment(other),
        }
    }
}

pub fn ensure(condition: bool, message: String) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Assertion(message))
    }
}

/// Requires `result` to be a rejection by the chain. Transport faults and timeouts
/// are surfaced as errors, not accepted as the expected failure.
pub fn expect_rejection(
    action: &str,
    result: Result<TransactionOutcome, DeploymentError>,
) -> Result<BroadcastError, ScenarioError> {
    match result {
        Ok(outcome) => Err(ScenarioError::UnexpectedSuccess {
            action: action.to_string(),
            tx_hash: outcome.tx_hash,
        }),
        Err(DeploymentError::Broadcast(e)) if e.is_execution_failure() => Ok(e),
        Err(e) => Err(e.into()),
    }
}

/// Contract bytecode the scenarios deploy.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub overseer: Vec<u8>,
    pub token: Vec<u8>,
}

impl Artifacts {
    pub fn from_dir(dir: &Path) -> Result<Artifacts, String> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read(&path).map_err(|e| format!("unable to read {}: {}", path.display(), e))
        };
        Ok(Artifacts {
            overseer: read(overseer::ARTIFACT)?,
            token: read(contracts::token::ARTIFACT)?,
        })
    }
}

/// Everything a scenario needs to act as one signer.
pub struct ScenarioContext<'a> {
    pub orchestrator: &'a DeploymentOrchestrator,
    pub signer: &'a dyn Signer,
    pub allocator: SequenceAllocator,
    /// Receiving side of transfers.
    pub counterparty: String,
    pub artifacts: &'a Artifacts,
    pub anchor: AnchorConfig,
    pub settings: ScenarioSettings,
}

impl<'a> ScenarioContext<'a> {
    pub fn address(&self) -> String {
        self.signer.address().to_string()
    }

    pub fn upload_overseer(&mut self, ignore_cache: bool) -> Result<u64, ScenarioError> {
        let uploaded = self.orchestrator.upload_code(
            self.signer,
            &mut self.allocator,
            &self.artifacts.overseer,
            ignore_cache,
        )?;
        Ok(uploaded.code_id)
    }

    pub fn upload_token(&mut self, ignore_cache: bool) -> Result<u64, ScenarioError> {
        let uploaded = self.orchestrator.upload_code(
            self.signer,
            &mut self.allocator,
            &self.artifacts.token,
            ignore_cache,
        )?;
        Ok(uploaded.code_id)
    }

    pub fn instantiate<T: Serialize>(
        &mut self,
        code_id: u64,
        init_msg: &T,
        admin: Option<&str>,
    ) -> Result<String, ScenarioError> {
        let address = self.orchestrator.instantiate_contract(
            self.signer,
            &mut self.allocator,
            code_id,
            init_msg,
            admin,
        )?;
        Ok(address)
    }

    /// Executes without mapping the error, so callers can check for expected rejections.
    pub fn execute<T: Serialize>(
        &mut self,
        contract: &str,
        msg: &T,
        coins: Vec<Coin>,
    ) -> Result<TransactionOutcome, DeploymentError> {
        self.orchestrator
            .execute_contract(self.signer, &mut self.allocator, contract, msg, coins)
    }

    pub fn update_admin(&mut self, contract: &str, new_admin: &str) -> Result<(), ScenarioError> {
        self.orchestrator
            .update_admin(self.signer, &mut self.allocator, contract, new_admin)?;
        Ok(())
    }

    pub fn deploy_overseer(
        &mut self,
        timelock_secs: u64,
        admin: Option<&str>,
    ) -> Result<String, ScenarioError> {
        let code_id = self.upload_overseer(false)?;
        let owner = self.address();
        self.instantiate(
            code_id,
            &overseer::InstantiateMsg {
                owner,
                timelock_duration: contracts::Duration::Time(timelock_secs),
            },
            admin,
        )
    }

    pub fn register(&mut self, overseer_addr: &str, contract: &str) -> Result<(), ScenarioError> {
        self.execute(
            overseer_addr,
            &overseer::ExecuteMsg::Register {
                contract_addr: contract.to_string(),
            },
            vec![],
        )?;
        Ok(())
    }

    pub fn test_token_msg(&self) -> contracts::token::InstantiateMsg {
        contracts::token::InstantiateMsg::test_token(
            &self.address(),
            &self.anchor.money_market_addr,
            &self.anchor.aterra_token_addr,
        )
    }

    pub fn token_balance(&self, token: &str, address: &str) -> Result<u128, ScenarioError> {
        let value = self.orchestrator.query_contract(
            token,
            &contracts::token::QueryMsg::Balance {
                address: address.to_string(),
            },
        )?;
        let response: contracts::token::BalanceResponse =
            serde_json::from_value(value).map_err(|e| ScenarioError::Query(e.to_string()))?;
        response.amount().map_err(ScenarioError::Query)
    }

    pub fn bank_balance(&self, address: &str) -> Result<u128, ScenarioError> {
        Ok(self.orchestrator.get_balance(address, STABLE_DENOM)?)
    }

    pub fn settle(&self) {
        if !self.settings.settle_delay.is_zero() {
            info!("waiting {:?} for balances to settle", self.settings.settle_delay);
            thread::sleep(self.settings.settle_delay);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ScenarioKind {
    InstantiateAllContracts,
    BasicDepositRedeem,
    MigrateToken,
    MigrateOverseer,
    BasicTransfer,
}

impl ScenarioKind {
    /// Every scenario, in execution order.
    pub fn catalogue() -> Vec<ScenarioKind> {
        ScenarioKind::iter().collect()
    }

    pub fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        match self {
            ScenarioKind::InstantiateAllContracts => {
                let token_msg = ctx.test_token_msg();
                instantiate_all_contracts(ctx, &token_msg).map(|_| ())
            }
            ScenarioKind::BasicDepositRedeem => token::basic_deposit_redeem(ctx),
            ScenarioKind::MigrateToken => migration::migrate_token(ctx),
            ScenarioKind::MigrateOverseer => migration::migrate_overseer(ctx),
            ScenarioKind::BasicTransfer => token::basic_transfer(ctx),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    pub name: String,
    pub error: Option<ScenarioError>,
    pub elapsed: Duration,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub signer: String,
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.results.iter().all(|result| result.passed())
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|result| !result.passed()).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScenarioRunner {
    keep_going: bool,
}

impl ScenarioRunner {
    pub fn new() -> ScenarioRunner {
        ScenarioRunner::default()
    }

    /// Keeps running the remaining scenarios after a failure.
    pub fn keep_going(mut self, keep_going: bool) -> ScenarioRunner {
        self.keep_going = keep_going;
        self
    }

    pub fn run(&self, ctx: &mut ScenarioContext, scenarios: &[ScenarioKind]) -> RunReport {
        let mut report = RunReport {
            signer: ctx.address(),
            results: vec![],
        };
        for scenario in scenarios.iter() {
            info!("## scenario {} ##", scenario);
            let started_at = Instant::now();
            let outcome = scenario.run(ctx);
            let elapsed = started_at.elapsed();
            let error = match outcome {
                Ok(()) => {
                    info!("scenario {} passed in {:?}", scenario, elapsed);
                    None
                }
                Err(e) => {
                    error!("scenario {} failed: {}", scenario, e);
                    Some(e)
                }
            };
            let failed = error.is_some();
            report.results.push(ScenarioResult {
                name: scenario.to_string(),
                error,
                elapsed,
            });
            if failed && !self.keep_going {
                break;
            }
        }
        report
    }

    /// Runs one scenario list per signer, each on its own thread. Signers never share
    /// an allocator, so their sequences stay independent.
    pub fn run_parallel(
        &self,
        lanes: Vec<(ScenarioContext, Vec<ScenarioKind>)>,
    ) -> Vec<RunReport> {
        thread::scope(|scope| {
            let handles: Vec<_> = lanes
                .into_iter()
                .map(|(mut ctx, scenarios)| {
                    let signer = ctx.address();
                    let handle = thread::Builder::new()
                        .name(format!("scenarios:{}", signer))
                        .spawn_scoped(scope, move || self.run(&mut ctx, &scenarios));
                    (signer, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(signer, handle)| {
                    let failure = |reason: String| RunReport {
                        signer: signer.clone(),
                        results: vec![ScenarioResult {
                            name: "setup".into(),
                            error: Some(ScenarioError::Assertion(reason)),
                            elapsed: Duration::ZERO,
                        }],
                    };
                    match handle {
                        Ok(handle) => handle
                            .join()
                            .unwrap_or_else(|_| failure("scenario thread panicked".into())),
                        Err(e) => failure(format!("unable to spawn scenario thread: {}", e)),
                    }
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn it_lists_scenarios_in_order() {
        let names: Vec<String> = ScenarioKind::catalogue()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "instantiate_all_contracts",
                "basic_deposit_redeem",
                "migrate_token",
                "migrate_overseer",
                "basic_transfer"
            ]
        );
        assert_eq!(
            ScenarioKind::from_str("migrate_token"),
            Ok(ScenarioKind::MigrateToken)
        );
        assert!(ScenarioKind::from_str("migrate_everything").is_err());
    }

    #[test]
    fn it_only_accepts_execution_failures_as_rejections() {
        let rejection = BroadcastError {
            kind: terra_deployments::BroadcastErrorKind::ExecutionFailed,
            detail: "Migration is timelocked".into(),
            code: Some(4),
            raw_log: None,
            tx_hash: None,
            sequence_consumed: false,
        };
        assert_eq!(
            expect_rejection("migrate", Err(DeploymentError::Broadcast(rejection.clone()))),
            Ok(rejection.clone())
        );

        let timeout = BroadcastError {
            kind: terra_deployments::BroadcastErrorKind::Timeout,
            ..rejection
        };
        assert!(matches!(
            expect_rejection("migrate", Err(DeploymentError::Broadcast(timeout))),
            Err(ScenarioError::Broadcast(_))
        ));

        let success = TransactionOutcome {
            tx_hash: "AB12".into(),
            success: true,
            code: 0,
            raw_log: String::new(),
            events: vec![],
            height: 10,
            gas_used: 1,
        };
        assert_eq!(
            expect_rejection("migrate", Ok(success)),
            Err(ScenarioError::UnexpectedSuccess {
                action: "migrate".into(),
                tx_hash: "AB12".into()
            })
        );
    }
}
