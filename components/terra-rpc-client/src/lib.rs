extern crate serde;

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate serde_json;

pub mod rpc_client;

#[cfg(any(test, feature = "mock"))]
pub mod mock_terra_rpc;

pub use rpc_client::{
    AccountInfo, Attribute, BroadcastMode, Coin, Event, GasInfo, NodeInfo, RpcError, TerraRpc,
    TxLog, TxResponse, TX_INCLUSION_TIMEOUT,
};
