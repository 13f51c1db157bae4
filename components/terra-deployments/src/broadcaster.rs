use std::sync::Arc;
use std::thread;
use std::time::Duration;

use terra_rpc_client::{BroadcastMode, Coin, RpcError, TxResponse, TX_INCLUSION_TIMEOUT};

use crate::network::NetworkClient;
use crate::signer::SignerContext;
use crate::types::{Fee, Msg, PendingTransaction, TransactionOutcome, UnsignedTransaction};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_POLL_ATTEMPTS: u32 = 50;
pub const DEFAULT_BLOCK_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStrategy {
    /// Submit in sync mode, then look the transaction up until it shows in a block.
    PollUntilIncluded { interval: Duration, max_attempts: u32 },
    /// Submit in block mode, resubmitting when the node gives up waiting for inclusion.
    BlockingWithRetry { max_attempts: u32 },
}

impl BroadcastStrategy {
    pub fn poll() -> BroadcastStrategy {
        BroadcastStrategy::PollUntilIncluded {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }

    pub fn blocking() -> BroadcastStrategy {
        BroadcastStrategy::BlockingWithRetry {
            max_attempts: DEFAULT_BLOCK_ATTEMPTS,
        }
    }
}

impl Default for BroadcastStrategy {
    fn default() -> Self {
        BroadcastStrategy::poll()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeConfig {
    pub gas_price: f64,
    pub gas_denom: String,
    pub gas_adjustment: f64,
    /// Skips simulation when set.
    pub gas_limit: Option<u64>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig {
            gas_price: 0.15,
            gas_denom: "uusd".into(),
            gas_adjustment: 1.4,
            gas_limit: None,
        }
    }
}

impl FeeConfig {
    pub fn fee_for_gas(&self, gas_limit: u64) -> Fee {
        let amount = (gas_limit as f64 * self.gas_price).ceil() as u128;
        Fee {
            amount: vec![Coin::new(&self.gas_denom, amount)],
            gas_limit,
        }
    }

    pub fn adjusted_gas(&self, gas_used: u64) -> u64 {
        (gas_used as f64 * self.gas_adjustment).ceil() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastErrorKind {
    Transport,
    Timeout,
    ExecutionFailed,
    Signing,
}

impl std::fmt::Display for BroadcastErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastErrorKind::Transport => write!(f, "transport error"),
            BroadcastErrorKind::Timeout => write!(f, "timeout"),
            BroadcastErrorKind::ExecutionFailed => write!(f, "execution failed"),
            BroadcastErrorKind::Signing => write!(f, "signing error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastError {
    pub kind: BroadcastErrorKind,
    pub detail: String,
    pub code: Option<u32>,
    pub raw_log: Option<String>,
    pub tx_hash: Option<String>,
    /// Whether the chain advanced the signer's sequence because of this transaction.
    pub sequence_consumed: bool,
}

impl std::fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)?;
        if let Some(code) = self.code {
            write!(f, " (code {})", code)?;
        }
        if let Some(ref tx_hash) = self.tx_hash {
            write!(f, " [tx {}]", tx_hash)?;
        }
        Ok(())
    }
}

impl BroadcastError {
    fn new(kind: BroadcastErrorKind, detail: String) -> BroadcastError {
        BroadcastError {
            kind,
            detail,
            code: None,
            raw_log: None,
            tx_hash: None,
            sequence_consumed: false,
        }
    }

    fn transport(error: RpcError) -> BroadcastError {
        BroadcastError::new(
            BroadcastErrorKind::Transport,
            format!("unable to submit transaction: {}", error),
        )
    }

    fn rejected(response: TxResponse, sequence_consumed: bool) -> BroadcastError {
        BroadcastError {
            kind: BroadcastErrorKind::ExecutionFailed,
            detail: response.raw_log.clone(),
            code: Some(response.code),
            raw_log: Some(response.raw_log),
            tx_hash: Some(response.txhash).filter(|hash| !hash.is_empty()),
            sequence_consumed,
        }
    }

    pub fn is_execution_failure(&self) -> bool {
        self.kind == BroadcastErrorKind::ExecutionFailed
    }
}

/// Signs, submits and confirms transactions on one chain.
pub struct TransactionBroadcaster {
    network: Arc<dyn NetworkClient>,
    chain_id: String,
    strategy: BroadcastStrategy,
    fees: FeeConfig,
}

impl TransactionBroadcaster {
    pub fn new(
        network: Arc<dyn NetworkClient>,
        chain_id: &str,
        strategy: BroadcastStrategy,
        fees: FeeConfig,
    ) -> TransactionBroadcaster {
        TransactionBroadcaster {
            network,
            chain_id: chain_id.to_string(),
            strategy,
            fees,
        }
    }

    pub fn network(&self) -> &Arc<dyn NetworkClient> {
        &self.network
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn strategy(&self) -> BroadcastStrategy {
        self.strategy
    }

    pub fn broadcast(
        &self,
        signer: &SignerContext,
        msgs: Vec<Msg>,
        sequence: u64,
    ) -> Result<TransactionOutcome, BroadcastError> {
        let gas_limit = match self.fees.gas_limit {
            Some(gas_limit) => gas_limit,
            None => self.estimate_gas(signer, &msgs, sequence)?,
        };

        let tx = self.build_transaction(signer, msgs, self.fees.fee_for_gas(gas_limit), sequence);
        let signed = signer.signer.sign(&tx).map_err(|e| {
            BroadcastError::new(BroadcastErrorKind::Signing, e.to_string())
        })?;
        let pending = PendingTransaction::new(signed, sequence);

        let msg_types: Vec<&str> = tx.msgs.iter().map(|msg| msg.type_url()).collect();
        info!(
            "broadcasting [{}] from {} with sequence {} (gas {})",
            msg_types.join(", "),
            signer.address(),
            sequence,
            gas_limit
        );

        let outcome = match self.strategy {
            BroadcastStrategy::PollUntilIncluded {
                interval,
                max_attempts,
            } => self.broadcast_and_poll(&pending, interval, max_attempts),
            BroadcastStrategy::BlockingWithRetry { max_attempts } => {
                self.broadcast_blocking(&pending, max_attempts)
            }
        }?;

        info!(
            "tx {} included at height {} after {} ms",
            outcome.tx_hash,
            outcome.height,
            pending.elapsed_ms()
        );
        Ok(outcome)
    }

    fn build_transaction(
        &self,
        signer: &SignerContext,
        msgs: Vec<Msg>,
        fee: Fee,
        sequence: u64,
    ) -> UnsignedTransaction {
        UnsignedTransaction {
            msgs,
            memo: String::new(),
            fee,
            chain_id: self.chain_id.clone(),
            account_number: signer.account_number,
            sequence,
        }
    }

    fn estimate_gas(
        &self,
        signer: &SignerContext,
        msgs: &[Msg],
        sequence: u64,
    ) -> Result<u64, BroadcastError> {
        let provisional = self.build_transaction(
            signer,
            msgs.to_vec(),
            Fee {
                amount: vec![],
                gas_limit: 0,
            },
            sequence,
        );
        let signed = signer.signer.sign(&provisional).map_err(|e| {
            BroadcastError::new(BroadcastErrorKind::Signing, e.to_string())
        })?;

        match self.network.simulate(&signed.tx_bytes) {
            Ok(gas_info) => {
                let gas_limit = self.fees.adjusted_gas(gas_info.gas_used);
                debug!(
                    "simulation used {} gas, requesting {}",
                    gas_info.gas_used, gas_limit
                );
                Ok(gas_limit)
            }
            Err(RpcError::Node { code, message, .. }) => {
                debug!("simulation rejected (code {}): {}", code, message);
                Err(BroadcastError {
                    kind: BroadcastErrorKind::ExecutionFailed,
                    detail: message.clone(),
                    code: Some(code),
                    raw_log: Some(message),
                    tx_hash: None,
                    sequence_consumed: false,
                })
            }
            Err(e) => Err(BroadcastError::new(
                BroadcastErrorKind::Transport,
                format!("unable to simulate transaction: {}", e),
            )),
        }
    }

    fn broadcast_and_poll(
        &self,
        pending: &PendingTransaction,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<TransactionOutcome, BroadcastError> {
        let response = self
            .network
            .post_transaction(&pending.tx_bytes, BroadcastMode::Sync)
            .map_err(BroadcastError::transport)?;

        if response.code != 0 {
            // Rejected by CheckTx: never entered the mempool.
            return Err(BroadcastError::rejected(response, false));
        }

        let txhash = response.txhash;
        debug!("tx {} accepted by the mempool", txhash);

        for attempt in 1..=max_attempts {
            match self.network.get_transaction(&txhash) {
                Ok(Some(response)) => return classify(response),
                Ok(None) => {}
                Err(e) => debug!("lookup of tx {} failed: {}", txhash, e),
            }
            if attempt < max_attempts {
                thread::sleep(interval);
            }
        }

        Err(BroadcastError {
            kind: BroadcastErrorKind::Timeout,
            detail: format!(
                "tx {} not included after {} lookups",
                txhash, max_attempts
            ),
            code: None,
            raw_log: None,
            tx_hash: Some(txhash),
            sequence_consumed: true,
        })
    }

    fn broadcast_blocking(
        &self,
        pending: &PendingTransaction,
        max_attempts: u32,
    ) -> Result<TransactionOutcome, BroadcastError> {
        let mut last_timeout = String::new();
        // Set once a node timed out on a tx it had already let into its mempool.
        let mut admitted = false;
        for attempt in 1..=max_attempts {
            match self
                .network
                .post_transaction(&pending.tx_bytes, BroadcastMode::Block)
            {
                Ok(response) if response.raw_log.contains(TX_INCLUSION_TIMEOUT) => {
                    warn!(
                        "attempt {}/{}: {}",
                        attempt, max_attempts, response.raw_log
                    );
                    admitted = true;
                    last_timeout = response.raw_log;
                }
                Ok(response) if response.height == 0 && response.code != 0 && admitted => {
                    // The resend is refused (usually "tx already exists in cache") while the
                    // first submission may still land with this sequence.
                    warn!(
                        "attempt {}/{}: resend refused with code {}: {}",
                        attempt, max_attempts, response.code, response.raw_log
                    );
                    return Err(BroadcastError {
                        kind: BroadcastErrorKind::Timeout,
                        detail: format!(
                            "resend refused after an inclusion timeout: {}",
                            response.raw_log
                        ),
                        code: Some(response.code),
                        raw_log: Some(response.raw_log),
                        tx_hash: Some(response.txhash).filter(|hash| !hash.is_empty()),
                        sequence_consumed: true,
                    });
                }
                Ok(response) if response.height == 0 && response.code != 0 => {
                    return Err(BroadcastError::rejected(response, false));
                }
                Ok(response) => return classify(response),
                Err(e) if e.is_inclusion_timeout() => {
                    warn!("attempt {}/{}: {}", attempt, max_attempts, e);
                    admitted = true;
                    last_timeout = e.to_string();
                }
                Err(e) => return Err(BroadcastError::transport(e)),
            }
        }

        Err(BroadcastError {
            kind: BroadcastErrorKind::Timeout,
            detail: format!(
                "gave up after {} attempts: {}",
                max_attempts, last_timeout
            ),
            code: None,
            raw_log: None,
            tx_hash: None,
            sequence_consumed: true,
        })
    }
}

/// Turns the response of an included transaction into an outcome.
fn classify(response: TxResponse) -> Result<TransactionOutcome, BroadcastError> {
    if response.code != 0 {
        debug!(
            "tx {} failed with code {}: {}",
            response.txhash, response.code, response.raw_log
        );
        return Err(BroadcastError::rejected(response, true));
    }
    Ok(TransactionOutcome::from(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNetwork, FakeSigner};

    fn setup(strategy: BroadcastStrategy) -> (Arc<FakeNetwork>, TransactionBroadcaster) {
        let network = Arc::new(FakeNetwork::new("bombay-12"));
        network.fund_account("terra1alice", 1, 0);
        let broadcaster = TransactionBroadcaster::new(
            network.clone(),
            "bombay-12",
            strategy,
            FeeConfig::default(),
        );
        (network, broadcaster)
    }

    fn fast_poll(max_attempts: u32) -> BroadcastStrategy {
        BroadcastStrategy::PollUntilIncluded {
            interval: Duration::from_millis(0),
            max_attempts,
        }
    }

    fn send_msg() -> Vec<Msg> {
        vec![Msg::send("terra1alice", "terra1bob", vec![Coin::new("uusd", 1)])]
    }

    #[test]
    fn it_defaults_to_polling_every_quarter_second() {
        assert_eq!(
            BroadcastStrategy::default(),
            BroadcastStrategy::PollUntilIncluded {
                interval: Duration::from_millis(250),
                max_attempts: 50,
            }
        );
        assert_eq!(
            BroadcastStrategy::blocking(),
            BroadcastStrategy::BlockingWithRetry { max_attempts: 3 }
        );
    }

    #[test]
    fn it_computes_fees_from_gas() {
        let fees = FeeConfig::default();
        assert_eq!(fees.adjusted_gas(100_000), 140_000);
        let fee = fees.fee_for_gas(140_001);
        assert_eq!(fee.amount[0], Coin::new("uusd", 21_001));
        assert_eq!(fee.gas_limit, 140_001);
    }

    #[test]
    fn it_polls_until_included() {
        let (network, broadcaster) = setup(fast_poll(50));
        network.fund("terra1alice", "uusd", 10);
        network.delay_inclusion(3);
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let outcome = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap();
        assert!(outcome.success);
        assert_eq!(network.lookups(), 4);
        assert_eq!(network.sequence_of("terra1alice"), 1);
    }

    #[test]
    fn it_ignores_lookup_errors_while_polling() {
        let (network, broadcaster) = setup(fast_poll(5));
        network.fund("terra1alice", "uusd", 10);
        network.fail_lookups(2);
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        assert!(broadcaster.broadcast(&ctx, send_msg(), 0).is_ok());
        assert_eq!(network.lookups(), 3);
    }

    #[test]
    fn it_times_out_when_never_included() {
        let (network, broadcaster) = setup(fast_poll(50));
        network.fund("terra1alice", "uusd", 10);
        network.delay_inclusion(1_000);
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert_eq!(error.kind, BroadcastErrorKind::Timeout);
        assert!(error.sequence_consumed);
        assert_eq!(network.lookups(), 50);
    }

    #[test]
    fn it_retries_inclusion_timeouts_up_to_three_attempts() {
        let (network, broadcaster) = setup(BroadcastStrategy::blocking());
        network.fund("terra1alice", "uusd", 10);
        network.script_inclusion_timeout();
        network.script_inclusion_timeout();
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let outcome = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap();
        assert!(outcome.success);
        assert_eq!(network.posts(), 3);
    }

    #[test]
    fn it_surfaces_timeout_after_the_retry_budget() {
        let (network, broadcaster) = setup(BroadcastStrategy::blocking());
        network.fund("terra1alice", "uusd", 10);
        for _ in 0..3 {
            network.script_inclusion_timeout();
        }
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert_eq!(error.kind, BroadcastErrorKind::Timeout);
        assert_eq!(network.posts(), 3);
    }

    #[test]
    fn it_keeps_the_sequence_spent_when_a_resend_is_refused_after_a_timeout() {
        let (network, broadcaster) = setup(BroadcastStrategy::blocking());
        network.fund("terra1alice", "uusd", 10);
        network.script_inclusion_timeout();
        network.script_post_response(TxResponse {
            height: 0,
            txhash: "9C0E".into(),
            code: 19,
            raw_log: "tx already exists in cache".into(),
            ..Default::default()
        });
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert_eq!(error.kind, BroadcastErrorKind::Timeout);
        assert!(!error.is_execution_failure());
        assert!(error.sequence_consumed);
        assert_eq!(error.code, Some(19));
        assert_eq!(network.posts(), 2);
    }

    #[test]
    fn it_releases_the_sequence_when_the_first_submission_is_refused() {
        let (network, broadcaster) = setup(BroadcastStrategy::blocking());
        network.fund("terra1alice", "uusd", 10);
        network.script_post_response(TxResponse {
            height: 0,
            txhash: "9C0E".into(),
            code: 13,
            raw_log: "insufficient fee".into(),
            ..Default::default()
        });
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert!(error.is_execution_failure());
        assert!(!error.sequence_consumed);
        assert_eq!(network.posts(), 1);
    }

    #[test]
    fn it_does_not_retry_other_submission_errors() {
        let (network, broadcaster) = setup(BroadcastStrategy::blocking());
        network.fund("terra1alice", "uusd", 10);
        network.script_post_error(RpcError::StatusCode(502));
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert_eq!(error.kind, BroadcastErrorKind::Transport);
        assert!(!error.sequence_consumed);
        assert_eq!(network.posts(), 1);
    }

    #[test]
    fn it_reports_execution_failures_found_by_simulation() {
        let (network, broadcaster) = setup(fast_poll(5));
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        // alice holds no uusd, so the transfer cannot execute
        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert!(error.is_execution_failure());
        assert!(!error.sequence_consumed);
        assert!(error.raw_log.unwrap().contains("insufficient funds"));
        assert_eq!(network.posts(), 0);
        assert_eq!(network.sequence_of("terra1alice"), 0);
    }

    #[test]
    fn it_reports_execution_failures_of_included_transactions() {
        let network = Arc::new(FakeNetwork::new("bombay-12"));
        network.fund_account("terra1alice", 1, 0);
        let fees = FeeConfig {
            gas_limit: Some(200_000),
            ..FeeConfig::default()
        };
        let broadcaster =
            TransactionBroadcaster::new(network.clone(), "bombay-12", fast_poll(5), fees);
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert!(error.is_execution_failure());
        assert!(error.sequence_consumed);
        assert!(error.tx_hash.is_some());
        assert_eq!(network.simulations(), 0);
        assert_eq!(network.sequence_of("terra1alice"), 1);
    }

    #[test]
    fn it_reports_sequence_mismatches_as_rejections() {
        let (network, broadcaster) = setup(fast_poll(5));
        network.fund("terra1alice", "uusd", 10);
        let signer = FakeSigner::new("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 7).unwrap_err();
        assert!(error.is_execution_failure());
        assert_eq!(error.code, Some(32));
        assert!(!error.sequence_consumed);
    }

    #[test]
    fn it_reports_signing_failures() {
        let (_network, broadcaster) = setup(fast_poll(5));
        let signer = FakeSigner::failing("terra1alice");
        let ctx = SignerContext {
            signer: &signer,
            account_number: 1,
        };

        let error = broadcaster.broadcast(&ctx, send_msg(), 0).unwrap_err();
        assert_eq!(error.kind, BroadcastErrorKind::Signing);
    }
}
