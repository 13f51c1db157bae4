//! Messages of the overseer, the contract that gates migrations behind a timelock.

use super::{Binary, Duration};

pub const ARTIFACT: &str = "alice_overseer.wasm";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InstantiateMsg {
    pub owner: String,
    pub timelock_duration: Duration,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    /// The registered contract's admin must be the overseer.
    Register { contract_addr: String },
    InitiateMigrate {
        contract_addr: String,
        new_code_id: u64,
        msg: Binary,
    },
    CancelMigrate { contract_addr: String },
    /// Only succeeds once the timelock has expired.
    Migrate { contract_addr: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct MigrateMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timelock_duration: Option<Duration>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Config {},
    MigrateTimelock { contract_addr: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConfigResponse {
    pub owner: String,
    pub timelock_duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_matches_the_contract_wire_format() {
        let msg = ExecuteMsg::InitiateMigrate {
            contract_addr: "terra1token".into(),
            new_code_id: 7,
            msg: Binary::from_json(&MigrateMsg {
                timelock_duration: Some(Duration::Time(60)),
                ..Default::default()
            })
            .unwrap(),
        };
        let value = json!(msg);
        assert_eq!(value["initiate_migrate"]["new_code_id"], 7);
        let payload = base64::decode(value["initiate_migrate"]["msg"].as_str().unwrap()).unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&payload).unwrap(),
            json!({ "timelock_duration": { "time": 60 } })
        );
        assert_eq!(json!(QueryMsg::Config {}), json!({ "config": {} }));
    }
}
