use serde_json::Value;
use terra_rpc_client::{
    AccountInfo, BroadcastMode, GasInfo, NodeInfo, RpcError, TerraRpc, TxResponse,
};

/// The calls the harness makes against a chain. `TerraRpc` talks to a live LCD,
/// tests plug in an in-memory chain.
pub trait NetworkClient: Send + Sync {
    fn get_account(&self, address: &str) -> Result<AccountInfo, RpcError>;

    fn post_transaction(&self, tx_bytes: &[u8], mode: BroadcastMode)
        -> Result<TxResponse, RpcError>;

    fn get_transaction(&self, txhash: &str) -> Result<Option<TxResponse>, RpcError>;

    fn simulate(&self, tx_bytes: &[u8]) -> Result<GasInfo, RpcError>;

    fn query_contract(&self, contract_addr: &str, query: &Value) -> Result<Value, RpcError>;

    fn get_balance(&self, address: &str, denom: &str) -> Result<u128, RpcError>;

    fn get_node_info(&self) -> Result<NodeInfo, RpcError>;
}

impl NetworkClient for TerraRpc {
    fn get_account(&self, address: &str) -> Result<AccountInfo, RpcError> {
        TerraRpc::get_account(self, address)
    }

    fn post_transaction(
        &self,
        tx_bytes: &[u8],
        mode: BroadcastMode,
    ) -> Result<TxResponse, RpcError> {
        TerraRpc::post_transaction(self, tx_bytes, mode)
    }

    fn get_transaction(&self, txhash: &str) -> Result<Option<TxResponse>, RpcError> {
        TerraRpc::get_transaction(self, txhash)
    }

    fn simulate(&self, tx_bytes: &[u8]) -> Result<GasInfo, RpcError> {
        self.simulate_transaction(tx_bytes)
    }

    fn query_contract(&self, contract_addr: &str, query: &Value) -> Result<Value, RpcError> {
        TerraRpc::query_contract(self, contract_addr, query)
    }

    fn get_balance(&self, address: &str, denom: &str) -> Result<u128, RpcError> {
        TerraRpc::get_balance(self, address, denom)
    }

    fn get_node_info(&self) -> Result<NodeInfo, RpcError> {
        TerraRpc::get_node_info(self)
    }
}
