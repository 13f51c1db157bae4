use mockito::{Matcher, Mock, ServerGuard};

use crate::rpc_client::{GasInfo, NodeInfo, TxResponse};

pub struct MockTerraRpc {
    pub url: String,
    client: ServerGuard,
}

impl Default for MockTerraRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTerraRpc {
    pub fn new() -> Self {
        let client = mockito::Server::new();
        let url = client.url().to_string();
        Self { client, url }
    }

    pub fn get_node_info_mock(&mut self, info: NodeInfo) -> Mock {
        self.client
            .mock("GET", "/cosmos/base/tendermint/v1beta1/node_info")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "default_node_info": info }).to_string())
            .create()
    }

    pub fn get_account_mock(&mut self, address: &str, account_number: u64, sequence: u64) -> Mock {
        self.client
            .mock(
                "GET",
                format!("/cosmos/auth/v1beta1/accounts/{address}").as_str(),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"account":{{"@type":"/cosmos.auth.v1beta1.BaseAccount","address":"{address}","pub_key":null,"account_number":"{account_number}","sequence":"{sequence}"}}}}"#
            ))
            .create()
    }

    pub fn post_tx_mock(&mut self, response: TxResponse) -> Mock {
        self.client
            .mock("POST", "/cosmos/tx/v1beta1/txs")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "tx_response": response }).to_string())
            .create()
    }

    pub fn post_tx_error_mock(&mut self, status: usize, code: u32, message: &str) -> Mock {
        self.client
            .mock("POST", "/cosmos/tx/v1beta1/txs")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(json!({ "code": code, "message": message, "details": [] }).to_string())
            .create()
    }

    pub fn get_tx_mock(&mut self, response: TxResponse) -> Mock {
        self.client
            .mock(
                "GET",
                format!("/cosmos/tx/v1beta1/txs/{}", response.txhash).as_str(),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "tx": null, "tx_response": response }).to_string())
            .create()
    }

    pub fn get_tx_not_found_mock(&mut self, txhash: &str) -> Mock {
        self.client
            .mock("GET", format!("/cosmos/tx/v1beta1/txs/{txhash}").as_str())
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "code": 5, "message": format!("tx not found: {txhash}"), "details": [] })
                    .to_string(),
            )
            .create()
    }

    pub fn simulate_mock(&mut self, gas_info: GasInfo) -> Mock {
        self.client
            .mock("POST", "/cosmos/tx/v1beta1/simulate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "gas_info": gas_info, "result": null }).to_string())
            .create()
    }

    pub fn simulate_error_mock(&mut self, code: u32, message: &str) -> Mock {
        self.client
            .mock("POST", "/cosmos/tx/v1beta1/simulate")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(json!({ "code": code, "message": message, "details": [] }).to_string())
            .create()
    }

    pub fn query_contract_mock(&mut self, contract_addr: &str, result: serde_json::Value) -> Mock {
        self.client
            .mock(
                "GET",
                format!("/terra/wasm/v1beta1/contracts/{contract_addr}/store").as_str(),
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "query_result": result }).to_string())
            .create()
    }

    pub fn get_balance_mock(&mut self, address: &str, denom: &str, amount: u128) -> Mock {
        self.client
            .mock(
                "GET",
                format!("/cosmos/bank/v1beta1/balances/{address}/by_denom").as_str(),
            )
            .match_query(Matcher::UrlEncoded("denom".into(), denom.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "balance": { "denom": denom, "amount": amount.to_string() } }).to_string(),
            )
            .create()
    }
}
