//! Messages of the aUST wrapper token (a CW20 backed by Anchor deposits).

pub const ARTIFACT: &str = "alice_terra_token.wasm";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InstantiateMsg {
    pub owner: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub stable_denom: String,
    pub money_market_addr: String,
    pub aterra_token_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_fee_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_fee_cap: Option<String>,
}

impl InstantiateMsg {
    /// Throwaway token used by the test scenarios.
    pub fn test_token(owner: &str, money_market_addr: &str, aterra_token_addr: &str) -> Self {
        InstantiateMsg {
            owner: owner.to_string(),
            name: "Bob".into(),
            symbol: "ubob".into(),
            decimals: 6,
            stable_denom: "uusd".into(),
            money_market_addr: money_market_addr.to_string(),
            aterra_token_addr: aterra_token_addr.to_string(),
            redeem_fee_ratio: Some("0.005".into()),
            redeem_fee_cap: Some("25_000_000".into()),
        }
    }

    pub fn production_token(owner: &str, money_market_addr: &str, aterra_token_addr: &str) -> Self {
        InstantiateMsg {
            owner: owner.to_string(),
            name: "Alice aUST Wrapper".into(),
            symbol: "aliceUST".into(),
            decimals: 6,
            stable_denom: "uusd".into(),
            money_market_addr: money_market_addr.to_string(),
            aterra_token_addr: aterra_token_addr.to_string(),
            redeem_fee_ratio: None,
            redeem_fee_cap: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    /// Attach the stable denom; defaults the recipient to the sender.
    DepositStable {
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },
    RedeemStable {
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        burn_amount: String,
    },
    Transfer { recipient: String, amount: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Balance { address: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BalanceResponse {
    pub balance: String,
}

impl BalanceResponse {
    pub fn amount(&self) -> Result<u128, String> {
        self.balance
            .parse()
            .map_err(|_| format!("invalid token balance '{}'", self.balance))
    }
}
