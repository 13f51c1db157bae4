use std::sync::Arc;
use std::time::Duration;

use terra_deployments::types::{SignedTransaction, UnsignedTransaction};
use terra_deployments::{
    content_hash, BroadcastErrorKind, BroadcastStrategy, CodeCache, DeploymentOrchestrator,
    FeeConfig, SequenceAllocator, Signer, SignerError, TransactionBroadcaster,
};
use terra_rpc_client::mock_terra_rpc::MockTerraRpc;
use terra_rpc_client::{Attribute, Event, GasInfo, TerraRpc, TxLog, TxResponse};

const DEPLOYER: &str = "terra1dcegyrekltswvyy0xy69ydgxn9x8x32zdtapd8";

struct StaticSigner;

impl Signer for StaticSigner {
    fn address(&self) -> &str {
        DEPLOYER
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        Ok(SignedTransaction {
            tx_bytes: format!("signed:{}:{}", tx.sequence, tx.fee.gas_limit).into_bytes(),
        })
    }
}

fn store_code_response(txhash: &str, code_id: u64) -> TxResponse {
    TxResponse {
        height: 1200,
        txhash: txhash.to_string(),
        logs: vec![TxLog {
            msg_index: 0,
            log: String::new(),
            events: vec![Event {
                kind: "store_code".into(),
                attributes: vec![
                    Attribute {
                        key: "sender".into(),
                        value: DEPLOYER.into(),
                    },
                    Attribute {
                        key: "code_id".into(),
                        value: code_id.to_string(),
                    },
                ],
            }],
        }],
        gas_used: 1_500_000,
        ..Default::default()
    }
}

fn orchestrator(url: &str, cache: Arc<CodeCache>, strategy: BroadcastStrategy) -> DeploymentOrchestrator {
    let broadcaster = TransactionBroadcaster::new(
        Arc::new(TerraRpc::new(url)),
        "bombay-12",
        strategy,
        FeeConfig::default(),
    );
    DeploymentOrchestrator::new(broadcaster, cache)
}

#[test]
fn uploads_code_through_the_lcd_and_caches_the_code_id() {
    let mut lcd = MockTerraRpc::new();
    let _account = lcd.get_account_mock(DEPLOYER, 77, 12);
    let _simulate = lcd.simulate_mock(GasInfo {
        gas_wanted: 0,
        gas_used: 1_000_000,
    });
    let _post = lcd.post_tx_mock(TxResponse {
        txhash: "5F2A".into(),
        ..Default::default()
    });
    let _lookup = lcd.get_tx_mock(store_code_response("5F2A", 42));

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache").join("code_ids.json");
    let cache = Arc::new(CodeCache::load(&cache_path));
    let orchestrator = orchestrator(
        &lcd.url,
        cache,
        BroadcastStrategy::PollUntilIncluded {
            interval: Duration::from_millis(10),
            max_attempts: 5,
        },
    );

    let rpc = TerraRpc::new(&lcd.url);
    let mut allocator = SequenceAllocator::initialize(&rpc, DEPLOYER).unwrap();
    assert_eq!(allocator.account_number(), 77);

    let uploaded = orchestrator
        .upload_code(&StaticSigner, &mut allocator, b"\0asm token", false)
        .unwrap();
    assert_eq!(uploaded.code_id, 42);
    assert_eq!(uploaded.next_sequence, 13);

    let reloaded = CodeCache::load(&cache_path);
    assert_eq!(
        reloaded.lookup("bombay-12", &content_hash(b"\0asm token")),
        Some(42)
    );

    // a second run reuses the cached code id without touching the sequence
    let again = orchestrator
        .upload_code(&StaticSigner, &mut allocator, b"\0asm token", false)
        .unwrap();
    assert!(again.from_cache);
    assert_eq!(again.next_sequence, 13);
}

#[test]
fn surfaces_simulation_rejections_as_execution_failures() {
    let mut lcd = MockTerraRpc::new();
    let _account = lcd.get_account_mock(DEPLOYER, 77, 3);
    let _simulate = lcd.simulate_error_mock(
        3,
        "failed to execute message; message index: 0: Migration is timelocked: execute wasm contract failed",
    );

    let orchestrator = orchestrator(
        &lcd.url,
        Arc::new(CodeCache::in_memory()),
        BroadcastStrategy::blocking(),
    );
    let rpc = TerraRpc::new(&lcd.url);
    let mut allocator = SequenceAllocator::initialize(&rpc, DEPLOYER).unwrap();

    let error = orchestrator
        .upload_code(&StaticSigner, &mut allocator, b"\0asm overseer", false)
        .unwrap_err();
    let error = error.as_broadcast_error().unwrap();
    assert_eq!(error.kind, BroadcastErrorKind::ExecutionFailed);
    assert_eq!(error.code, Some(3));
    assert!(!error.sequence_consumed);
    assert_eq!(allocator.peek(), 3);
}

#[test]
fn treats_an_unavailable_node_as_a_transport_failure() {
    let mut lcd = MockTerraRpc::new();
    let _account = lcd.get_account_mock(DEPLOYER, 77, 3);

    let orchestrator = orchestrator(
        &lcd.url,
        Arc::new(CodeCache::in_memory()),
        BroadcastStrategy::blocking(),
    );
    let rpc = TerraRpc::new(&lcd.url);
    let mut allocator = SequenceAllocator::initialize(&rpc, DEPLOYER).unwrap();

    // nothing answers the simulation endpoint
    let error = orchestrator
        .upload_code(&StaticSigner, &mut allocator, b"\0asm overseer", false)
        .unwrap_err();
    assert_eq!(
        error.as_broadcast_error().map(|e| e.kind),
        Some(BroadcastErrorKind::Transport)
    );
    assert_eq!(allocator.peek(), 3);
}
