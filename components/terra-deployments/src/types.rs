use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use terra_rpc_client::{Coin, TxResponse};

/// Proto-JSON encodes 64 bit integers as strings.
mod string_u64 {
    use serde::de::{Deserialize, Deserializer, Error};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(D::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "@type")]
pub enum Msg {
    #[serde(rename = "/terra.wasm.v1beta1.MsgStoreCode")]
    StoreCode {
        sender: String,
        /// base64 encoded wasm bytecode
        wasm_byte_code: String,
    },
    #[serde(rename = "/terra.wasm.v1beta1.MsgInstantiateContract")]
    InstantiateContract {
        sender: String,
        #[serde(default)]
        admin: String,
        #[serde(with = "string_u64")]
        code_id: u64,
        init_msg: Value,
        #[serde(default)]
        init_coins: Vec<Coin>,
    },
    #[serde(rename = "/terra.wasm.v1beta1.MsgExecuteContract")]
    ExecuteContract {
        sender: String,
        contract: String,
        execute_msg: Value,
        #[serde(default)]
        coins: Vec<Coin>,
    },
    #[serde(rename = "/terra.wasm.v1beta1.MsgMigrateContract")]
    MigrateContract {
        admin: String,
        contract: String,
        #[serde(with = "string_u64")]
        new_code_id: u64,
        migrate_msg: Value,
    },
    #[serde(rename = "/terra.wasm.v1beta1.MsgUpdateContractAdmin")]
    UpdateContractAdmin {
        admin: String,
        new_admin: String,
        contract: String,
    },
    #[serde(rename = "/cosmos.bank.v1beta1.MsgSend")]
    Send {
        from_address: String,
        to_address: String,
        amount: Vec<Coin>,
    },
}

impl Msg {
    pub fn store_code(sender: &str, wasm_byte_code: &[u8]) -> Msg {
        Msg::StoreCode {
            sender: sender.to_string(),
            wasm_byte_code: base64::encode(wasm_byte_code),
        }
    }

    pub fn instantiate_contract(
        sender: &str,
        admin: Option<&str>,
        code_id: u64,
        init_msg: Value,
    ) -> Msg {
        Msg::InstantiateContract {
            sender: sender.to_string(),
            admin: admin.unwrap_or_default().to_string(),
            code_id,
            init_msg,
            init_coins: vec![],
        }
    }

    pub fn execute_contract(sender: &str, contract: &str, execute_msg: Value, coins: Vec<Coin>) -> Msg {
        Msg::ExecuteContract {
            sender: sender.to_string(),
            contract: contract.to_string(),
            execute_msg,
            coins,
        }
    }

    pub fn migrate_contract(admin: &str, contract: &str, new_code_id: u64, migrate_msg: Value) -> Msg {
        Msg::MigrateContract {
            admin: admin.to_string(),
            contract: contract.to_string(),
            new_code_id,
            migrate_msg,
        }
    }

    pub fn update_contract_admin(admin: &str, new_admin: &str, contract: &str) -> Msg {
        Msg::UpdateContractAdmin {
            admin: admin.to_string(),
            new_admin: new_admin.to_string(),
            contract: contract.to_string(),
        }
    }

    pub fn send(from_address: &str, to_address: &str, amount: Vec<Coin>) -> Msg {
        Msg::Send {
            from_address: from_address.to_string(),
            to_address: to_address.to_string(),
            amount,
        }
    }

    /// The address expected to sign this message.
    pub fn signer(&self) -> &str {
        match self {
            Msg::StoreCode { sender, .. }
            | Msg::InstantiateContract { sender, .. }
            | Msg::ExecuteContract { sender, .. } => sender,
            Msg::MigrateContract { admin, .. } | Msg::UpdateContractAdmin { admin, .. } => admin,
            Msg::Send { from_address, .. } => from_address,
        }
    }

    pub fn type_url(&self) -> &'static str {
        match self {
            Msg::StoreCode { .. } => "/terra.wasm.v1beta1.MsgStoreCode",
            Msg::InstantiateContract { .. } => "/terra.wasm.v1beta1.MsgInstantiateContract",
            Msg::ExecuteContract { .. } => "/terra.wasm.v1beta1.MsgExecuteContract",
            Msg::MigrateContract { .. } => "/terra.wasm.v1beta1.MsgMigrateContract",
            Msg::UpdateContractAdmin { .. } => "/terra.wasm.v1beta1.MsgUpdateContractAdmin",
            Msg::Send { .. } => "/cosmos.bank.v1beta1.MsgSend",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Fee {
    pub amount: Vec<Coin>,
    #[serde(with = "string_u64")]
    pub gas_limit: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub msgs: Vec<Msg>,
    #[serde(default)]
    pub memo: String,
    pub fee: Fee,
    pub chain_id: String,
    pub account_number: u64,
    pub sequence: u64,
}

impl UnsignedTransaction {
    /// Body and auth info in the layout `terrad tx sign` reads, without signatures.
    pub fn to_proto_json(&self) -> Value {
        json!({
            "body": {
                "messages": self.msgs,
                "memo": self.memo,
                "timeout_height": "0",
                "extension_options": [],
                "non_critical_extension_options": [],
            },
            "auth_info": {
                "signer_infos": [],
                "fee": {
                    "amount": self.fee.amount,
                    "gas_limit": self.fee.gas_limit.to_string(),
                    "payer": "",
                    "granter": "",
                },
            },
            "signatures": [],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx_bytes: Vec<u8>,
    pub sequence: u64,
    pub submitted_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(signed: SignedTransaction, sequence: u64) -> PendingTransaction {
        PendingTransaction {
            tx_bytes: signed.tx_bytes,
            sequence,
            submitted_at: Utc::now(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.submitted_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub ty: String,
    pub attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub tx_hash: String,
    pub success: bool,
    pub code: u32,
    pub raw_log: String,
    pub events: Vec<Event>,
    pub height: u64,
    pub gas_used: u64,
}

impl TransactionOutcome {
    /// First value of `key` in the first event of type `event_type` carrying it.
    pub fn attribute(&self, event_type: &str, key: &str) -> Option<&str> {
        self.events
            .iter()
            .filter(|event| event.ty == event_type)
            .find_map(|event| event.attributes.get(key))
            .map(|value| value.as_str())
    }
}

impl From<TxResponse> for TransactionOutcome {
    fn from(response: TxResponse) -> Self {
        let mut events = vec![];
        for log in response.logs.into_iter() {
            for event in log.events.into_iter() {
                let mut attributes = IndexMap::new();
                for attribute in event.attributes.into_iter() {
                    attributes.entry(attribute.key).or_insert(attribute.value);
                }
                events.push(Event {
                    ty: event.kind,
                    attributes,
                });
            }
        }
        TransactionOutcome {
            tx_hash: response.txhash,
            success: response.code == 0,
            code: response.code,
            raw_log: response.raw_log,
            events,
            height: response.height,
            gas_used: response.gas_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terra_rpc_client::{Attribute, Event as RpcEvent, TxLog};

    #[test]
    fn it_serializes_messages_with_type_urls() {
        let msg = Msg::instantiate_contract("terra1sender", None, 12, json!({ "owner": "x" }));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["@type"], "/terra.wasm.v1beta1.MsgInstantiateContract");
        assert_eq!(value["code_id"], "12");
        assert_eq!(value["admin"], "");
        assert_eq!(value["init_msg"]["owner"], "x");

        let back: Msg = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.type_url(), "/terra.wasm.v1beta1.MsgInstantiateContract");
    }

    #[test]
    fn it_flattens_events_keeping_first_attribute_value() {
        let response = TxResponse {
            height: 7,
            txhash: "AA".into(),
            logs: vec![TxLog {
                msg_index: 0,
                log: "".into(),
                events: vec![
                    RpcEvent {
                        kind: "message".into(),
                        attributes: vec![Attribute {
                            key: "action".into(),
                            value: "store_code".into(),
                        }],
                    },
                    RpcEvent {
                        kind: "store_code".into(),
                        attributes: vec![
                            Attribute {
                                key: "code_id".into(),
                                value: "3".into(),
                            },
                            Attribute {
                                key: "code_id".into(),
                                value: "4".into(),
                            },
                        ],
                    },
                ],
            }],
            ..Default::default()
        };

        let outcome = TransactionOutcome::from(response);
        assert!(outcome.success);
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.attribute("store_code", "code_id"), Some("3"));
        assert_eq!(outcome.attribute("store_code", "sender"), None);
    }

    #[test]
    fn it_builds_the_unsigned_proto_json() {
        let tx = UnsignedTransaction {
            msgs: vec![Msg::send("terra1a", "terra1b", vec![Coin::new("uusd", 10)])],
            memo: "".into(),
            fee: Fee {
                amount: vec![Coin::new("uusd", 30_000)],
                gas_limit: 200_000,
            },
            chain_id: "bombay-12".into(),
            account_number: 1,
            sequence: 2,
        };
        let json = tx.to_proto_json();
        assert_eq!(json["body"]["messages"][0]["@type"], "/cosmos.bank.v1beta1.MsgSend");
        assert_eq!(json["auth_info"]["fee"]["gas_limit"], "200000");
        assert_eq!(json["auth_info"]["fee"]["amount"][0]["amount"], "30000");
    }
}
