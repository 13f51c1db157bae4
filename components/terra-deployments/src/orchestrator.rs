use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use terra_rpc_client::{Coin, RpcError};

use crate::broadcaster::{BroadcastError, TransactionBroadcaster};
use crate::code_cache::{content_hash, CodeCache};
use crate::sequence::SequenceAllocator;
use crate::signer::{Signer, SignerContext};
use crate::types::{Msg, TransactionOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    Broadcast(BroadcastError),
    MissingAttribute {
        event: String,
        key: String,
        tx_hash: String,
    },
    InvalidAttribute {
        key: String,
        value: String,
    },
    Query(RpcError),
    Serialization(String),
    Io(String),
}

impl std::fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentError::Broadcast(e) => write!(f, "{}", e),
            DeploymentError::MissingAttribute {
                event,
                key,
                tx_hash,
            } => write!(
                f,
                "tx {} has no '{}' attribute in a '{}' event",
                tx_hash, key, event
            ),
            DeploymentError::InvalidAttribute { key, value } => {
                write!(f, "unexpected value '{}' for attribute '{}'", value, key)
            }
            DeploymentError::Query(e) => write!(f, "query failed: {}", e),
            DeploymentError::Serialization(e) => write!(f, "unable to encode message: {}", e),
            DeploymentError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl From<BroadcastError> for DeploymentError {
    fn from(error: BroadcastError) -> Self {
        DeploymentError::Broadcast(error)
    }
}

impl DeploymentError {
    pub fn as_broadcast_error(&self) -> Option<&BroadcastError> {
        match self {
            DeploymentError::Broadcast(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedCode {
    pub code_id: u64,
    pub content_hash: String,
    /// The signer's next sequence once this upload is done.
    pub next_sequence: u64,
    pub from_cache: bool,
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value, DeploymentError> {
    serde_json::to_value(payload).map_err(|e| DeploymentError::Serialization(e.to_string()))
}

fn read_attribute<'a>(
    outcome: &'a TransactionOutcome,
    event: &str,
    key: &str,
) -> Result<&'a str, DeploymentError> {
    outcome
        .attribute(event, key)
        .ok_or_else(|| DeploymentError::MissingAttribute {
            event: event.to_string(),
            key: key.to_string(),
            tx_hash: outcome.tx_hash.clone(),
        })
}

/// Uploads, instantiates and drives contracts for signers on one network.
pub struct DeploymentOrchestrator {
    broadcaster: TransactionBroadcaster,
    cache: Arc<CodeCache>,
    network_id: String,
}

impl DeploymentOrchestrator {
    pub fn new(broadcaster: TransactionBroadcaster, cache: Arc<CodeCache>) -> Self {
        let network_id = broadcaster.chain_id().to_string();
        DeploymentOrchestrator {
            broadcaster,
            cache,
            network_id,
        }
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn broadcaster(&self) -> &TransactionBroadcaster {
        &self.broadcaster
    }

    pub fn cache(&self) -> &Arc<CodeCache> {
        &self.cache
    }

    /// Draws a sequence and broadcasts. A sequence the chain never consumed goes back
    /// to the allocator so the next transaction does not leave a gap.
    fn send(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        msgs: Vec<Msg>,
    ) -> Result<TransactionOutcome, DeploymentError> {
        let ctx = SignerContext {
            signer,
            account_number: allocator.account_number(),
        };
        let sequence = allocator.next();
        match self.broadcaster.broadcast(&ctx, msgs, sequence) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if !e.sequence_consumed {
                    allocator.release(sequence);
                }
                Err(e.into())
            }
        }
    }

    pub fn upload_code(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        wasm: &[u8],
        ignore_cache: bool,
    ) -> Result<UploadedCode, DeploymentError> {
        let hash = content_hash(wasm);

        if !ignore_cache {
            if let Some(code_id) = self.cache.lookup(&self.network_id, &hash) {
                info!("code {} already stored as code id {}", &hash[..12], code_id);
                return Ok(UploadedCode {
                    code_id,
                    content_hash: hash,
                    next_sequence: allocator.peek(),
                    from_cache: true,
                });
            }
        }

        let outcome = self.send(
            signer,
            allocator,
            vec![Msg::store_code(signer.address(), wasm)],
        )?;
        let raw_code_id = read_attribute(&outcome, "store_code", "code_id")?;
        let code_id = raw_code_id
            .parse::<u64>()
            .map_err(|_| DeploymentError::InvalidAttribute {
                key: "code_id".into(),
                value: raw_code_id.to_string(),
            })?;

        self.cache.store(&self.network_id, &hash, code_id);
        info!("code {} stored as code id {}", &hash[..12], code_id);

        Ok(UploadedCode {
            code_id,
            content_hash: hash,
            next_sequence: allocator.peek(),
            from_cache: false,
        })
    }

    pub fn upload_code_file(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        path: &Path,
        ignore_cache: bool,
    ) -> Result<UploadedCode, DeploymentError> {
        let wasm = std::fs::read(path).map_err(|e| {
            DeploymentError::Io(format!("unable to read {}: {}", path.display(), e))
        })?;
        self.upload_code(signer, allocator, &wasm, ignore_cache)
    }

    pub fn instantiate_contract<T: Serialize>(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        code_id: u64,
        init_msg: &T,
        admin: Option<&str>,
    ) -> Result<String, DeploymentError> {
        let msg = Msg::instantiate_contract(signer.address(), admin, code_id, to_value(init_msg)?);
        let outcome = self.send(signer, allocator, vec![msg])?;
        let contract_address = read_attribute(&outcome, "instantiate_contract", "contract_address")?;
        info!(
            "code id {} instantiated at {}",
            code_id, contract_address
        );
        Ok(contract_address.to_string())
    }

    pub fn execute_contract<T: Serialize>(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        contract: &str,
        execute_msg: &T,
        coins: Vec<Coin>,
    ) -> Result<TransactionOutcome, DeploymentError> {
        let msg = Msg::execute_contract(signer.address(), contract, to_value(execute_msg)?, coins);
        self.send(signer, allocator, vec![msg])
    }

    pub fn migrate_contract<T: Serialize>(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        contract: &str,
        new_code_id: u64,
        migrate_msg: &T,
    ) -> Result<TransactionOutcome, DeploymentError> {
        let msg = Msg::migrate_contract(
            signer.address(),
            contract,
            new_code_id,
            to_value(migrate_msg)?,
        );
        self.send(signer, allocator, vec![msg])
    }

    pub fn update_admin(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        contract: &str,
        new_admin: &str,
    ) -> Result<TransactionOutcome, DeploymentError> {
        let msg = Msg::update_contract_admin(signer.address(), new_admin, contract);
        self.send(signer, allocator, vec![msg])
    }

    pub fn broadcast_msg(
        &self,
        signer: &dyn Signer,
        allocator: &mut SequenceAllocator,
        msg: Msg,
    ) -> Result<TransactionOutcome, DeploymentError> {
        self.send(signer, allocator, vec![msg])
    }

    pub fn query_contract<T: Serialize>(
        &self,
        contract: &str,
        query: &T,
    ) -> Result<Value, DeploymentError> {
        self.broadcaster
            .network()
            .query_contract(contract, &to_value(query)?)
            .map_err(DeploymentError::Query)
    }

    pub fn get_balance(&self, address: &str, denom: &str) -> Result<u128, DeploymentError> {
        self.broadcaster
            .network()
            .get_balance(address, denom)
            .map_err(DeploymentError::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{BroadcastErrorKind, BroadcastStrategy, FeeConfig};
    use crate::testing::{FakeNetwork, FakeSigner};
    use std::time::Duration;
    use terra_rpc_client::TxResponse;

    const DEPLOYER: &str = "terra1deployer";

    fn setup() -> (Arc<FakeNetwork>, DeploymentOrchestrator) {
        let network = Arc::new(FakeNetwork::new("bombay-12"));
        network.fund_account(DEPLOYER, 3, 0);
        let broadcaster = TransactionBroadcaster::new(
            network.clone(),
            "bombay-12",
            BroadcastStrategy::PollUntilIncluded {
                interval: Duration::from_millis(0),
                max_attempts: 5,
            },
            FeeConfig::default(),
        );
        let orchestrator =
            DeploymentOrchestrator::new(broadcaster, Arc::new(CodeCache::in_memory()));
        (network, orchestrator)
    }

    fn allocator(network: &FakeNetwork) -> SequenceAllocator {
        SequenceAllocator::initialize(network, DEPLOYER).unwrap()
    }

    #[test]
    fn it_uploads_once_per_bytecode() {
        let (network, orchestrator) = setup();
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let first = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm", false)
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.next_sequence, 1);

        let second = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm", false)
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.code_id, first.code_id);
        assert_eq!(second.next_sequence, 1);
        assert_eq!(network.stored_codes(), 1);
        assert_eq!(
            orchestrator
                .cache()
                .lookup("bombay-12", &content_hash(b"token wasm")),
            Some(first.code_id)
        );
    }

    #[test]
    fn it_reuploads_when_ignoring_the_cache() {
        let (network, orchestrator) = setup();
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let first = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm", true)
            .unwrap();
        let second = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm", true)
            .unwrap();
        assert_ne!(first.code_id, second.code_id);
        assert_eq!(second.next_sequence, 2);
        assert_eq!(network.stored_codes(), 2);
        assert_eq!(
            orchestrator
                .cache()
                .lookup("bombay-12", &first.content_hash),
            Some(second.code_id)
        );
    }

    #[test]
    fn it_leaves_the_cache_alone_when_upload_fails() {
        let (network, orchestrator) = setup();
        network.script_post_error(RpcError::StatusCode(502));
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let error = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm", false)
            .unwrap_err();
        assert_eq!(
            error.as_broadcast_error().map(|e| e.kind),
            Some(BroadcastErrorKind::Transport)
        );
        assert!(orchestrator.cache().snapshot().is_empty());
        assert_eq!(allocator.peek(), 0);
    }

    #[test]
    fn it_instantiates_and_reads_the_contract_address() {
        let (network, orchestrator) = setup();
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let code = orchestrator
            .upload_code(&signer, &mut allocator, b"overseer wasm", false)
            .unwrap();
        let address = orchestrator
            .instantiate_contract(
                &signer,
                &mut allocator,
                code.code_id,
                &json!({ "owner": DEPLOYER }),
                Some(DEPLOYER),
            )
            .unwrap();
        assert_eq!(network.contract_admin(&address), Some(DEPLOYER.to_string()));

        orchestrator
            .update_admin(&signer, &mut allocator, &address, &address)
            .unwrap();
        assert_eq!(network.contract_admin(&address), Some(address.clone()));
        assert_eq!(allocator.peek(), 3);
        assert_eq!(network.sequence_of(DEPLOYER), 3);
    }

    #[test]
    fn it_fails_instantiation_of_unknown_code() {
        let (network, orchestrator) = setup();
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let error = orchestrator
            .instantiate_contract(&signer, &mut allocator, 99, &json!({}), None)
            .unwrap_err();
        assert!(error
            .as_broadcast_error()
            .map(|e| e.is_execution_failure())
            .unwrap_or(false));
        // rejected during simulation, so the sequence is handed out again
        assert_eq!(allocator.peek(), 0);
    }

    #[test]
    fn it_migrates_contracts_administered_by_the_signer() {
        let (network, orchestrator) = setup();
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let v1 = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm v1", false)
            .unwrap();
        let v2 = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm v2", false)
            .unwrap();
        let address = orchestrator
            .instantiate_contract(&signer, &mut allocator, v1.code_id, &json!({}), Some(DEPLOYER))
            .unwrap();

        let outcome = orchestrator
            .migrate_contract(&signer, &mut allocator, &address, v2.code_id, &json!({}))
            .unwrap();
        assert_eq!(
            outcome.attribute("migrate_contract", "code_id"),
            Some(v2.code_id.to_string().as_str())
        );
        assert_eq!(network.contract_code_id(&address), Some(v2.code_id));
        assert_eq!(allocator.peek(), 4);

        // without an admin the contract cannot be migrated
        let frozen = orchestrator
            .instantiate_contract(&signer, &mut allocator, v1.code_id, &json!({}), None)
            .unwrap();
        let error = orchestrator
            .migrate_contract(&signer, &mut allocator, &frozen, v2.code_id, &json!({}))
            .unwrap_err();
        assert!(error
            .as_broadcast_error()
            .map(|e| e.is_execution_failure())
            .unwrap_or(false));
        assert_eq!(network.contract_code_id(&frozen), Some(v1.code_id));
        assert_eq!(allocator.peek(), 5);
    }

    #[test]
    fn it_holds_on_to_the_sequence_of_a_possibly_pending_transaction() {
        let network = Arc::new(FakeNetwork::new("bombay-12"));
        network.fund_account(DEPLOYER, 3, 0);
        let broadcaster = TransactionBroadcaster::new(
            network.clone(),
            "bombay-12",
            BroadcastStrategy::blocking(),
            FeeConfig::default(),
        );
        let orchestrator =
            DeploymentOrchestrator::new(broadcaster, Arc::new(CodeCache::in_memory()));
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        network.script_inclusion_timeout();
        network.script_post_response(TxResponse {
            height: 0,
            txhash: "9C0E".into(),
            code: 19,
            raw_log: "tx already exists in cache".into(),
            ..Default::default()
        });
        let error = orchestrator
            .upload_code(&signer, &mut allocator, b"token wasm", false)
            .unwrap_err();
        let broadcast_error = error.as_broadcast_error().unwrap();
        assert_eq!(broadcast_error.kind, BroadcastErrorKind::Timeout);
        assert!(broadcast_error.sequence_consumed);
        assert_eq!(allocator.peek(), 1);
    }

    #[test]
    fn it_reports_missing_attributes() {
        let (network, orchestrator) = setup();
        network.fund(DEPLOYER, "uusd", 100);
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let outcome = orchestrator
            .broadcast_msg(
                &signer,
                &mut allocator,
                Msg::send(DEPLOYER, "terra1bob", vec![Coin::new("uusd", 40)]),
            )
            .unwrap();
        let error = read_attribute(&outcome, "store_code", "code_id").unwrap_err();
        assert!(matches!(error, DeploymentError::MissingAttribute { .. }));
        assert_eq!(network.balance_of("terra1bob", "uusd"), 40);
    }

    #[test]
    fn it_reports_unreadable_artifacts() {
        let (network, orchestrator) = setup();
        let signer = FakeSigner::new(DEPLOYER);
        let mut allocator = allocator(&network);

        let error = orchestrator
            .upload_code_file(
                &signer,
                &mut allocator,
                Path::new("/nonexistent/token.wasm"),
                false,
            )
            .unwrap_err();
        assert!(matches!(error, DeploymentError::Io(_)));
    }
}
