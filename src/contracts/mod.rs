pub mod overseer;
pub mod token;

/// Expiration interval, as block count or seconds.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Duration {
    Height(u64),
    Time(u64),
}

/// Arbitrary bytes carried in a message as base64.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Binary(pub Vec<u8>);

impl Binary {
    pub fn from_json<T: serde::Serialize>(value: &T) -> Result<Binary, String> {
        serde_json::to_vec(value)
            .map(Binary)
            .map_err(|e| format!("unable to encode payload: {}", e))
    }
}

impl serde::Serialize for Binary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(&self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Binary {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Binary, D::Error> {
        let encoded = <String as serde::Deserialize>::deserialize(deserializer)?;
        base64::decode(&encoded)
            .map(Binary)
            .map_err(serde::de::Error::custom)
    }
}
