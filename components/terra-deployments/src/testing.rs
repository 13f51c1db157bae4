//! An in-memory chain and signer for exercising deployments without a node.
//!
//! `FakeNetwork` keeps accounts, bank balances, stored code and contract instances. It
//! enforces account sequences the way the ante handler does, runs messages atomically,
//! and can be scripted to misbehave (slow inclusion, failing lookups, node timeouts).
//! Contract behaviour is supplied by the test through [`FakeContract`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use sha2::{Digest, Sha256};
use terra_rpc_client::{
    AccountInfo, Attribute, BroadcastMode, Coin, Event, GasInfo, NodeInfo, RpcError, TxLog,
    TxResponse, TX_INCLUSION_TIMEOUT,
};

use crate::code_cache::content_hash;
use crate::network::NetworkClient;
use crate::signer::{Signer, SignerError};
use crate::types::{Msg, SignedTransaction, UnsignedTransaction};

pub const SEQUENCE_MISMATCH_CODE: u32 = 32;
pub const INSUFFICIENT_FUNDS_CODE: u32 = 5;
pub const CONTRACT_FAILED_CODE: u32 = 4;
pub const UNAUTHORIZED_CODE: u32 = 8;

/// Signs by serializing the transaction as JSON, which `FakeNetwork` decodes.
pub struct FakeSigner {
    address: String,
    failing: bool,
}

impl FakeSigner {
    pub fn new(address: &str) -> FakeSigner {
        FakeSigner {
            address: address.to_string(),
            failing: false,
        }
    }

    pub fn failing(address: &str) -> FakeSigner {
        FakeSigner {
            address: address.to_string(),
            failing: true,
        }
    }
}

impl Signer for FakeSigner {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        if self.failing {
            return Err(SignerError::Command {
                command: "sign".into(),
                stderr: "key not found".into(),
            });
        }
        serde_json::to_vec(tx)
            .map(|tx_bytes| SignedTransaction { tx_bytes })
            .map_err(|e| SignerError::Encoding(e.to_string()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Bank {
    balances: BTreeMap<(String, String), u128>,
}

impl Bank {
    pub fn balance(&self, address: &str, denom: &str) -> u128 {
        self.balances
            .get(&(address.to_string(), denom.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn credit(&mut self, address: &str, denom: &str, amount: u128) {
        *self
            .balances
            .entry((address.to_string(), denom.to_string()))
            .or_insert(0) += amount;
    }

    pub fn debit(&mut self, address: &str, denom: &str, amount: u128) -> Result<(), String> {
        let balance = self.balance(address, denom);
        if balance < amount {
            return Err(format!(
                "{}{} is smaller than {}{}: insufficient funds",
                balance, denom, amount, denom
            ));
        }
        self.balances
            .insert((address.to_string(), denom.to_string()), balance - amount);
        Ok(())
    }

    pub fn transfer(&mut self, from: &str, to: &str, coins: &[Coin]) -> Result<(), String> {
        for coin in coins.iter() {
            let amount = coin.amount_u128().map_err(|e| e.to_string())?;
            self.debit(from, &coin.denom, amount)?;
            self.credit(to, &coin.denom, amount);
        }
        Ok(())
    }
}

/// What a contract sees while handling a message.
pub struct CallContext<'a> {
    pub sender: String,
    pub contract: String,
    pub funds: Vec<Coin>,
    pub bank: &'a mut Bank,
}

impl<'a> CallContext<'a> {
    pub fn sent_amount(&self, denom: &str) -> u128 {
        self.funds
            .iter()
            .filter(|coin| coin.denom == denom)
            .filter_map(|coin| coin.amount_u128().ok())
            .sum()
    }

    /// Pays out of the contract's own bank balance.
    pub fn pay(&mut self, recipient: &str, denom: &str, amount: u128) -> Result<(), String> {
        let contract = self.contract.clone();
        self.bank.debit(&contract, denom, amount)?;
        self.bank.credit(recipient, denom, amount);
        Ok(())
    }
}

pub trait FakeContract: Send {
    fn instantiate(&mut self, _ctx: &mut CallContext, _msg: &Value) -> Result<(), String> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut CallContext, msg: &Value) -> Result<(), String>;

    fn query(&self, msg: &Value) -> Result<Value, String>;

    fn clone_box(&self) -> Box<dyn FakeContract>;
}

/// Accepts every execution and answers every query with `{}`.
#[derive(Clone, Default)]
pub struct NoopContract;

impl FakeContract for NoopContract {
    fn execute(&mut self, _ctx: &mut CallContext, _msg: &Value) -> Result<(), String> {
        Ok(())
    }

    fn query(&self, _msg: &Value) -> Result<Value, String> {
        Ok(json!({}))
    }

    fn clone_box(&self) -> Box<dyn FakeContract> {
        Box::new(self.clone())
    }
}

type ContractFactory = Arc<dyn Fn() -> Box<dyn FakeContract> + Send + Sync>;

struct ContractInstance {
    code_id: u64,
    admin: String,
    behaviour: Box<dyn FakeContract>,
}

impl Clone for ContractInstance {
    fn clone(&self) -> Self {
        ContractInstance {
            code_id: self.code_id,
            admin: self.admin.clone(),
            behaviour: self.behaviour.clone_box(),
        }
    }
}

#[derive(Clone, Default)]
struct ChainState {
    accounts: BTreeMap<String, AccountInfo>,
    bank: Bank,
    /// content hash of each stored code, code id = index + 1
    codes: Vec<String>,
    contracts: BTreeMap<String, ContractInstance>,
    next_contract: u64,
}

struct ExecutionError {
    code: u32,
    log: String,
}

impl ExecutionError {
    fn new(code: u32, log: String) -> ExecutionError {
        ExecutionError { code, log }
    }
}

fn event(kind: &str, attributes: Vec<(&str, String)>) -> Event {
    Event {
        kind: kind.to_string(),
        attributes: attributes
            .into_iter()
            .map(|(key, value)| Attribute {
                key: key.to_string(),
                value,
            })
            .collect(),
    }
}

impl ChainState {
    fn apply(
        &mut self,
        factories: &BTreeMap<String, ContractFactory>,
        msg: &Msg,
    ) -> Result<Vec<Event>, ExecutionError> {
        let ChainState {
            bank,
            codes,
            contracts,
            next_contract,
            ..
        } = self;

        let contract_failure = |e: String| {
            ExecutionError::new(
                CONTRACT_FAILED_CODE,
                format!("failed to execute message; message index: 0: {}", e),
            )
        };

        match msg {
            Msg::StoreCode {
                sender,
                wasm_byte_code,
            } => {
                let bytes = base64::decode(wasm_byte_code)
                    .map_err(|e| ExecutionError::new(2, format!("invalid wasm: {}", e)))?;
                codes.push(content_hash(&bytes));
                Ok(vec![event(
                    "store_code",
                    vec![
                        ("sender", sender.clone()),
                        ("code_id", codes.len().to_string()),
                    ],
                )])
            }
            Msg::InstantiateContract {
                sender,
                admin,
                code_id,
                init_msg,
                init_coins,
            } => {
                let hash = code_hash(codes, *code_id)?;
                let mut behaviour = match factories.get(&hash) {
                    Some(factory) => factory(),
                    None => Box::new(NoopContract),
                };
                *next_contract += 1;
                let address = format!("terra1fakecontract{:020}", next_contract);

                bank.transfer(sender, &address, init_coins)
                    .map_err(|e| ExecutionError::new(INSUFFICIENT_FUNDS_CODE, e))?;
                let mut ctx = CallContext {
                    sender: sender.clone(),
                    contract: address.clone(),
                    funds: init_coins.clone(),
                    bank,
                };
                behaviour
                    .instantiate(&mut ctx, init_msg)
                    .map_err(contract_failure)?;

                contracts.insert(
                    address.clone(),
                    ContractInstance {
                        code_id: *code_id,
                        admin: admin.clone(),
                        behaviour,
                    },
                );
                Ok(vec![event(
                    "instantiate_contract",
                    vec![
                        ("creator", sender.clone()),
                        ("admin", admin.clone()),
                        ("code_id", code_id.to_string()),
                        ("contract_address", address),
                    ],
                )])
            }
            Msg::ExecuteContract {
                sender,
                contract,
                execute_msg,
                coins,
            } => {
                let instance = contracts.get_mut(contract).ok_or_else(|| {
                    contract_failure(format!("contract {} not found", contract))
                })?;
                bank.transfer(sender, contract, coins)
                    .map_err(|e| ExecutionError::new(INSUFFICIENT_FUNDS_CODE, e))?;
                let mut ctx = CallContext {
                    sender: sender.clone(),
                    contract: contract.clone(),
                    funds: coins.clone(),
                    bank,
                };
                instance
                    .behaviour
                    .execute(&mut ctx, execute_msg)
                    .map_err(contract_failure)?;
                Ok(vec![event(
                    "execute_contract",
                    vec![
                        ("sender", sender.clone()),
                        ("contract_address", contract.clone()),
                    ],
                )])
            }
            Msg::MigrateContract {
                admin,
                contract,
                new_code_id,
                ..
            } => {
                code_hash(codes, *new_code_id)?;
                let instance = contracts.get_mut(contract).ok_or_else(|| {
                    contract_failure(format!("contract {} not found", contract))
                })?;
                if &instance.admin != admin {
                    return Err(ExecutionError::new(
                        UNAUTHORIZED_CODE,
                        "migrate contract failed: unauthorized".into(),
                    ));
                }
                instance.code_id = *new_code_id;
                Ok(vec![event(
                    "migrate_contract",
                    vec![
                        ("contract_address", contract.clone()),
                        ("code_id", new_code_id.to_string()),
                    ],
                )])
            }
            Msg::UpdateContractAdmin {
                admin,
                new_admin,
                contract,
            } => {
                let instance = contracts.get_mut(contract).ok_or_else(|| {
                    contract_failure(format!("contract {} not found", contract))
                })?;
                if &instance.admin != admin {
                    return Err(ExecutionError::new(
                        UNAUTHORIZED_CODE,
                        "update contract admin failed: unauthorized".into(),
                    ));
                }
                instance.admin = new_admin.clone();
                Ok(vec![event(
                    "update_contract_admin",
                    vec![
                        ("contract_address", contract.clone()),
                        ("admin", new_admin.clone()),
                    ],
                )])
            }
            Msg::Send {
                from_address,
                to_address,
                amount,
            } => {
                bank.transfer(from_address, to_address, amount)
                    .map_err(|e| ExecutionError::new(INSUFFICIENT_FUNDS_CODE, e))?;
                Ok(vec![event(
                    "transfer",
                    vec![
                        ("recipient", to_address.clone()),
                        ("sender", from_address.clone()),
                    ],
                )])
            }
        }
    }
}

fn code_hash(codes: &[String], code_id: u64) -> Result<String, ExecutionError> {
    code_id
        .checked_sub(1)
        .and_then(|index| codes.get(index as usize))
        .cloned()
        .ok_or_else(|| ExecutionError::new(CONTRACT_FAILED_CODE, format!("no such code id {}", code_id)))
}

#[derive(Default)]
struct FakeChain {
    chain_id: String,
    height: u64,
    state: ChainState,
    txs: BTreeMap<String, TxResponse>,
    factories: BTreeMap<String, ContractFactory>,
    scripted_posts: VecDeque<Result<TxResponse, RpcError>>,
    lookup_misses: u32,
    lookup_errors: u32,
    posts: u32,
    lookups: u32,
    simulations: u32,
    account_lookups: u32,
}

impl FakeChain {
    fn decode(tx_bytes: &[u8]) -> Result<UnsignedTransaction, RpcError> {
        serde_json::from_slice(tx_bytes).map_err(|e| RpcError::Node {
            status: 400,
            code: 2,
            message: format!("tx parse error: {}", e),
        })
    }

    /// Ante handler: the first message's signer must exist and the sequence must match.
    fn check_sequence(&self, tx: &UnsignedTransaction) -> Result<String, (u32, String)> {
        let signer = match tx.msgs.first() {
            Some(msg) => msg.signer().to_string(),
            None => return Err((2, "must contain at least one message".into())),
        };
        let account = self
            .state
            .accounts
            .get(&signer)
            .ok_or_else(|| (9, format!("account {} not found", signer)))?;
        if account.sequence != tx.sequence {
            return Err((
                SEQUENCE_MISMATCH_CODE,
                format!(
                    "account sequence mismatch, expected {}, got {}: incorrect account sequence",
                    account.sequence, tx.sequence
                ),
            ));
        }
        Ok(signer)
    }

    fn run(&self, tx: &UnsignedTransaction) -> Result<(ChainState, Vec<TxLog>), ExecutionError> {
        let mut scratch = self.state.clone();
        let mut logs = vec![];
        for (index, msg) in tx.msgs.iter().enumerate() {
            let events = scratch.apply(&self.factories, msg)?;
            logs.push(TxLog {
                msg_index: index as u32,
                log: String::new(),
                events,
            });
        }
        Ok((scratch, logs))
    }
}

fn gas_for(tx: &UnsignedTransaction) -> u64 {
    100_000 + 50_000 * tx.msgs.len() as u64
}

pub struct FakeNetwork {
    chain: Mutex<FakeChain>,
}

impl FakeNetwork {
    pub fn new(chain_id: &str) -> FakeNetwork {
        FakeNetwork {
            chain: Mutex::new(FakeChain {
                chain_id: chain_id.to_string(),
                ..Default::default()
            }),
        }
    }

    fn chain(&self) -> MutexGuard<'_, FakeChain> {
        self.chain.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fund_account(&self, address: &str, account_number: u64, sequence: u64) {
        self.chain().state.accounts.insert(
            address.to_string(),
            AccountInfo {
                address: address.to_string(),
                account_number,
                sequence,
            },
        );
    }

    pub fn fund(&self, address: &str, denom: &str, amount: u128) {
        self.chain().state.bank.credit(address, denom, amount);
    }

    pub fn balance_of(&self, address: &str, denom: &str) -> u128 {
        self.chain().state.bank.balance(address, denom)
    }

    pub fn sequence_of(&self, address: &str) -> u64 {
        self.chain()
            .state
            .accounts
            .get(address)
            .map(|account| account.sequence)
            .unwrap_or(0)
    }

    /// Gives every contract instantiated from `wasm` the behaviour built by `factory`.
    pub fn register_contract<F>(&self, wasm: &[u8], factory: F)
    where
        F: Fn() -> Box<dyn FakeContract> + Send + Sync + 'static,
    {
        self.chain()
            .factories
            .insert(content_hash(wasm), Arc::new(factory));
    }

    pub fn stored_codes(&self) -> usize {
        self.chain().state.codes.len()
    }

    pub fn contract_admin(&self, contract: &str) -> Option<String> {
        self.chain()
            .state
            .contracts
            .get(contract)
            .map(|instance| instance.admin.clone())
    }

    pub fn contract_code_id(&self, contract: &str) -> Option<u64> {
        self.chain()
            .state
            .contracts
            .get(contract)
            .map(|instance| instance.code_id)
    }

    /// The next `lookups` transaction lookups report "not yet included".
    pub fn delay_inclusion(&self, lookups: u32) {
        self.chain().lookup_misses = lookups;
    }

    /// The next `lookups` transaction lookups fail at the transport level.
    pub fn fail_lookups(&self, lookups: u32) {
        self.chain().lookup_errors = lookups;
    }

    pub fn script_inclusion_timeout(&self) {
        self.script_post_error(RpcError::Node {
            status: 500,
            code: 2,
            message: format!("broadcast tx: {}", TX_INCLUSION_TIMEOUT),
        });
    }

    pub fn script_post_error(&self, error: RpcError) {
        self.chain().scripted_posts.push_back(Err(error));
    }

    pub fn script_post_response(&self, response: TxResponse) {
        self.chain().scripted_posts.push_back(Ok(response));
    }

    pub fn posts(&self) -> u32 {
        self.chain().posts
    }

    pub fn lookups(&self) -> u32 {
        self.chain().lookups
    }

    pub fn simulations(&self) -> u32 {
        self.chain().simulations
    }

    pub fn account_lookups(&self) -> u32 {
        self.chain().account_lookups
    }

    pub fn committed_transactions(&self) -> Vec<TxResponse> {
        let chain = self.chain();
        let mut txs: Vec<TxResponse> = chain.txs.values().cloned().collect();
        txs.sort_by_key(|tx| tx.height);
        txs
    }
}

impl NetworkClient for FakeNetwork {
    fn get_account(&self, address: &str) -> Result<AccountInfo, RpcError> {
        let mut chain = self.chain();
        chain.account_lookups += 1;
        chain
            .state
            .accounts
            .get(address)
            .cloned()
            .ok_or_else(|| RpcError::Node {
                status: 404,
                code: 5,
                message: format!("account {} not found", address),
            })
    }

    fn post_transaction(
        &self,
        tx_bytes: &[u8],
        mode: BroadcastMode,
    ) -> Result<TxResponse, RpcError> {
        let mut chain = self.chain();
        chain.posts += 1;
        if let Some(scripted) = chain.scripted_posts.pop_front() {
            return scripted;
        }

        let tx = FakeChain::decode(tx_bytes)?;
        let txhash = hex::encode_upper(Sha256::digest(tx_bytes));

        let signer = match chain.check_sequence(&tx) {
            Ok(signer) => signer,
            Err((code, raw_log)) => {
                return Ok(TxResponse {
                    txhash,
                    code,
                    codespace: "sdk".into(),
                    raw_log,
                    ..Default::default()
                })
            }
        };

        // Past the ante handler the sequence is spent, whatever execution does.
        if let Some(account) = chain.state.accounts.get_mut(&signer) {
            account.sequence += 1;
        }
        chain.height += 1;
        let height = chain.height;

        let response = match chain.run(&tx) {
            Ok((state, logs)) => {
                chain.state = state;
                TxResponse {
                    height,
                    txhash: txhash.clone(),
                    code: 0,
                    raw_log: "[]".into(),
                    logs,
                    gas_wanted: tx.fee.gas_limit,
                    gas_used: gas_for(&tx),
                    ..Default::default()
                }
            }
            Err(e) => TxResponse {
                height,
                txhash: txhash.clone(),
                code: e.code,
                codespace: "wasm".into(),
                raw_log: e.log,
                gas_wanted: tx.fee.gas_limit,
                gas_used: gas_for(&tx),
                ..Default::default()
            },
        };
        chain.txs.insert(txhash.clone(), response.clone());

        match mode {
            BroadcastMode::Sync => Ok(TxResponse {
                txhash,
                raw_log: "[]".into(),
                ..Default::default()
            }),
            BroadcastMode::Block => Ok(response),
        }
    }

    fn get_transaction(&self, txhash: &str) -> Result<Option<TxResponse>, RpcError> {
        let mut chain = self.chain();
        chain.lookups += 1;
        if chain.lookup_errors > 0 {
            chain.lookup_errors -= 1;
            return Err(RpcError::StatusCode(503));
        }
        if chain.lookup_misses > 0 {
            chain.lookup_misses -= 1;
            return Ok(None);
        }
        Ok(chain.txs.get(txhash).cloned())
    }

    fn simulate(&self, tx_bytes: &[u8]) -> Result<GasInfo, RpcError> {
        let mut chain = self.chain();
        chain.simulations += 1;
        let tx = FakeChain::decode(tx_bytes)?;
        chain
            .check_sequence(&tx)
            .map_err(|(code, message)| RpcError::Node {
                status: 400,
                code,
                message,
            })?;
        chain.run(&tx).map_err(|e| RpcError::Node {
            status: 400,
            code: e.code,
            message: e.log,
        })?;
        Ok(GasInfo {
            gas_wanted: 0,
            gas_used: gas_for(&tx),
        })
    }

    fn query_contract(&self, contract_addr: &str, query: &Value) -> Result<Value, RpcError> {
        let chain = self.chain();
        let instance = chain
            .state
            .contracts
            .get(contract_addr)
            .ok_or_else(|| RpcError::Node {
                status: 404,
                code: 5,
                message: format!("contract {} not found", contract_addr),
            })?;
        instance.behaviour.query(query).map_err(|e| RpcError::Node {
            status: 500,
            code: 2,
            message: format!("query wasm contract failed: {}", e),
        })
    }

    fn get_balance(&self, address: &str, denom: &str) -> Result<u128, RpcError> {
        Ok(self.chain().state.bank.balance(address, denom))
    }

    fn get_node_info(&self) -> Result<NodeInfo, RpcError> {
        Ok(NodeInfo {
            network: self.chain().chain_id.clone(),
            version: "fake".into(),
            moniker: "fake".into(),
        })
    }
}
