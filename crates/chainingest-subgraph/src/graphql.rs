//! GraphQL documents and response envelope for the Uniswap v3 subgraph.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use chainingest_core::error::IngestError;

/// Hourly candles with a computed price, oldest first.
///
/// The window is `[start, end)`; `priceUSD_gt: 0` drops hours without trades.
pub const HOUR_DATAS_QUERY: &str = r#"query HourDatas($token: String!, $start: Int!, $end: Int!, $first: Int!) {
  tokenHourDatas(
    first: $first
    orderBy: periodStartUnix
    orderDirection: asc
    where: { token: $token, periodStartUnix_gte: $start, periodStartUnix_lt: $end, priceUSD_gt: 0 }
  ) {
    periodStartUnix
    open
    close
    high
    low
    priceUSD
  }
}"#;

/// Descriptive metadata of one token.
pub const TOKEN_QUERY: &str = r#"query Token($id: ID!) {
  tokens(where: { id: $id }) {
    name
    symbol
    totalSupply
    volumeUSD
    decimals
  }
}"#;

/// Request body for [`HOUR_DATAS_QUERY`].
pub fn hour_datas_request(token: &str, start: u64, end: u64, first: u32) -> Value {
    json!({
        "query": HOUR_DATAS_QUERY,
        "variables": { "token": token, "start": start, "end": end, "first": first },
    })
}

/// Request body for [`TOKEN_QUERY`].
pub fn token_request(token: &str) -> Value {
    json!({
        "query": TOKEN_QUERY,
        "variables": { "id": token },
    })
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Pull the array at `data.<field>` out of a GraphQL response body.
///
/// Anything other than a well-formed `data` object holding that array is a
/// protocol error: the request reached the server and was answered, so
/// repeating it would not help.
pub fn extract_array(body: &str, field: &str) -> Result<Vec<Value>, IngestError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| IngestError::SourceProtocol(format!("response is not a GraphQL envelope: {e}")))?;

    if !envelope.errors.is_empty() {
        let messages: Vec<_> = envelope.errors.into_iter().map(|e| e.message).collect();
        return Err(IngestError::SourceProtocol(format!(
            "GraphQL errors: {}",
            messages.join("; ")
        )));
    }

    match envelope.data {
        Some(Value::Object(mut data)) => match data.remove(field) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(IngestError::SourceProtocol(format!(
                "data.{field} is not an array: {other}"
            ))),
            None => Err(IngestError::SourceProtocol(format!("data.{field} is missing"))),
        },
        _ => Err(IngestError::SourceProtocol("response has no data object".into())),
    }
}

/// Token metadata as served by the subgraph.
///
/// Numeric fields are kept as decimal strings; the subgraph serves
/// `BigInt`/`BigDecimal` values that don't fit a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    #[serde(rename = "totalSupply", deserialize_with = "lenient_string")]
    pub total_supply: String,
    #[serde(rename = "volumeUSD", deserialize_with = "lenient_string")]
    pub volume_usd: String,
    #[serde(deserialize_with = "lenient_string")]
    pub decimals: String,
}

/// Accept either a JSON string or a number.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}
