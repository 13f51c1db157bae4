use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use std::time::Duration;

/// Error reported by the node when a block-mode broadcast outlives its commit window.
pub const TX_INCLUSION_TIMEOUT: &str = "timed out waiting for tx to be included in a block";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    Generic,
    StatusCode(u16),
    Message(String),
    Node {
        status: u16,
        code: u32,
        message: String,
    },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            RpcError::Message(e) => write!(f, "{}", e),
            RpcError::StatusCode(e) => write!(f, "error status code {}", e),
            RpcError::Node {
                status,
                code,
                message,
            } => write!(f, "node error {} (status {}): {}", code, status, message),
            RpcError::Generic => write!(f, "unknown error"),
        }
    }
}

impl RpcError {
    pub fn is_inclusion_timeout(&self) -> bool {
        self.to_string().contains(TX_INCLUSION_TIMEOUT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Returns once the node's admission check (CheckTx) ran.
    Sync,
    /// Returns once the transaction is committed in a block.
    Block,
}

impl BroadcastMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastMode::Sync => "BROADCAST_MODE_SYNC",
            BroadcastMode::Block => "BROADCAST_MODE_BLOCK",
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    pub fn new(denom: &str, amount: u128) -> Coin {
        Coin {
            denom: denom.to_string(),
            amount: amount.to_string(),
        }
    }

    pub fn amount_u128(&self) -> Result<u128, RpcError> {
        self.amount
            .parse()
            .map_err(|_| RpcError::Message(format!("invalid coin amount {}", self.amount)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub address: String,
    pub account_number: u64,
    pub sequence: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: Vec<Attribute>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TxLog {
    #[serde(default)]
    pub msg_index: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub log: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TxResponse {
    #[serde(default, deserialize_with = "u64_from_string")]
    pub height: u64,
    #[serde(default)]
    pub txhash: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub codespace: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub raw_log: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: Vec<TxLog>,
    #[serde(default, deserialize_with = "u64_from_string")]
    pub gas_wanted: u64,
    #[serde(default, deserialize_with = "u64_from_string")]
    pub gas_used: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GasInfo {
    #[serde(default, deserialize_with = "u64_from_string")]
    pub gas_wanted: u64,
    #[serde(default, deserialize_with = "u64_from_string")]
    pub gas_used: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct NodeInfo {
    pub network: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub moniker: String,
}

#[derive(Deserialize, Debug)]
struct BaseAccount {
    #[serde(default)]
    address: String,
    #[serde(default, deserialize_with = "u64_from_string")]
    account_number: u64,
    #[serde(default, deserialize_with = "u64_from_string")]
    sequence: u64,
}

#[derive(Deserialize, Debug)]
struct AccountResponse {
    account: BaseAccount,
}

#[derive(Deserialize, Debug)]
struct TxResponseEnvelope {
    tx_response: TxResponse,
}

#[derive(Deserialize, Debug)]
struct SimulateResponse {
    gas_info: GasInfo,
}

#[derive(Deserialize, Debug)]
struct BalanceResponse {
    balance: Coin,
}

#[derive(Deserialize, Debug)]
struct NodeInfoResponse {
    default_node_info: NodeInfo,
}

#[derive(Deserialize, Debug)]
struct NodeErrorBody {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message: String,
}

fn u64_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(u64),
    }

    match Option::<StringOrNumber>::deserialize(deserializer)? {
        None => Ok(0),
        Some(StringOrNumber::Number(value)) => Ok(value),
        Some(StringOrNumber::String(value)) if value.is_empty() => Ok(0),
        Some(StringOrNumber::String(value)) => value.parse().map_err(serde::de::Error::custom),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn check_response(res: Response) -> Result<Response, RpcError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().map_err(|e| RpcError::Message(e.to_string()))?;
    match serde_json::from_str::<NodeErrorBody>(&body) {
        Ok(error) if !error.message.is_empty() => Err(RpcError::Node {
            status: status.as_u16(),
            code: error.code,
            message: error.message,
        }),
        _ if body.trim().is_empty() => Err(RpcError::StatusCode(status.as_u16())),
        _ => Err(RpcError::Message(body)),
    }
}

pub struct TerraRpc {
    pub url: String,
    pub client: Client,
}

impl TerraRpc {
    pub fn new(url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            url: url.trim_end_matches('/').into(),
            client,
        }
    }

    pub fn get_account(&self, address: &str) -> Result<AccountInfo, RpcError> {
        let request_url = format!(
            "{}/cosmos/auth/v1beta1/accounts/{addr}",
            self.url,
            addr = address
        );

        let res = self
            .client
            .get(request_url)
            .send()
            .map_err(|e| RpcError::Message(e.to_string()))?;
        let res: AccountResponse = check_response(res)?
            .json()
            .map_err(|e| RpcError::Message(e.to_string()))?;

        let address = if res.account.address.is_empty() {
            address.to_string()
        } else {
            res.account.address
        };
        Ok(AccountInfo {
            address,
            account_number: res.account.account_number,
            sequence: res.account.sequence,
        })
    }

    pub fn post_transaction(
        &self,
        tx_bytes: &[u8],
        mode: BroadcastMode,
    ) -> Result<TxResponse, RpcError> {
        let payload = json!({
            "tx_bytes": base64::encode(tx_bytes),
            "mode": mode.as_str(),
        });
        let path = format!("{}/cosmos/tx/v1beta1/txs", self.url);
        let res = self
            .client
            .post(path)
            .json(&payload)
            .send()
            .map_err(|e| RpcError::Message(e.to_string()))?;

        let envelope: TxResponseEnvelope = check_response(res)?
            .json()
            .map_err(|e| RpcError::Message(e.to_string()))?;
        Ok(envelope.tx_response)
    }

    /// Returns `None` while the transaction is not part of a committed block.
    pub fn get_transaction(&self, txhash: &str) -> Result<Option<TxResponse>, RpcError> {
        let request_url = format!("{}/cosmos/tx/v1beta1/txs/{}", self.url, txhash);
        let res = self
            .client
            .get(request_url)
            .send()
            .map_err(|e| RpcError::Message(e.to_string()))?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        match check_response(res) {
            Ok(res) => {
                let envelope: TxResponseEnvelope = res
                    .json()
                    .map_err(|e| RpcError::Message(e.to_string()))?;
                Ok(Some(envelope.tx_response))
            }
            Err(RpcError::Node { message, .. }) if message.contains("not found") => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn simulate_transaction(&self, tx_bytes: &[u8]) -> Result<GasInfo, RpcError> {
        let payload = json!({ "tx_bytes": base64::encode(tx_bytes) });
        let path = format!("{}/cosmos/tx/v1beta1/simulate", self.url);
        let res = self
            .client
            .post(path)
            .json(&payload)
            .send()
            .map_err(|e| RpcError::Message(e.to_string()))?;

        let res: SimulateResponse = check_response(res)?
            .json()
            .map_err(|e| RpcError::Message(e.to_string()))?;
        Ok(res.gas_info)
    }

    pub fn query_contract<T: DeserializeOwned>(
        &self,
        contract_addr: &str,
        query: &serde_json::Value,
    ) -> Result<T, RpcError> {
        #[derive(Deserialize, Debug)]
        struct ContractQueryResult<T> {
            query_result: T,
        }

        let query_msg = serde_json::to_vec(query).map_err(|e| RpcError::Message(e.to_string()))?;
        let path = format!(
            "{}/terra/wasm/v1beta1/contracts/{}/store",
            self.url, contract_addr
        );
        let res = self
            .client
            .get(path)
            .query(&[("query_msg", base64::encode(query_msg))])
            .send()
            .map_err(|e| RpcError::Message(e.to_string()))?;

        let res: ContractQueryResult<T> = check_response(res)?
            .json()
            .map_err(|e| RpcError::Message(e.to_string()))?;
        Ok(res.query_result)
    }

    pub fn get_balance(&self, address: &str, denom: &str) -> Result<u128, RpcError> {
        let path = format!(
            "{}/cosmos/bank/v1beta1/balances/{}/by_denom",
            self.url, address
        );
        let res = self
            .client
            .get(path)
            .query(&[("denom", denom)])
            .send()
            .map_err(|e| RpcError::Message(e.to_string()))?;

        let res: BalanceResponse = check_response(res)?
            .json()
            .map_err(|e| RpcError::Message(e.to_string()))?;
        res.balance.amount_u128()
    }

    pub fn get_node_info(&self) -> Result<NodeInfo, RpcError> {
        let request_url = format!("{}/cosmos/base/tendermint/v1beta1/node_info", self.url);

        self.client
            .get(request_url)
            .send()
            .map_err(|e| RpcError::Message(e.to_string()))
            .and_then(check_response)?
            .json::<NodeInfoResponse>()
            .map(|res| res.default_node_info)
            .map_err(|e| RpcError::Message(e.to_string()))
    }
}
