//! Normalizer for `tokenHourDatas` candles.

use serde_json::{Map, Number, Value};

use chainingest_core::error::IngestError;
use chainingest_core::normalizer::{NormalizeContext, Normalizer};
use chainingest_core::types::{CanonicalRecord, RawRecord};

/// Price fields every candle must carry.
pub const PRICE_FIELDS: [&str; 5] = ["open", "close", "high", "low", "priceUSD"];

/// Turns one hourly candle into a canonical record.
///
/// Identity is `"{chain}:{token}:{periodStartUnix}"`, so the same hour of the
/// same token always maps to the same row.
#[derive(Debug, Clone)]
pub struct TokenHourNormalizer {
    chain: String,
    token: String,
    symbol: Option<String>,
}

impl TokenHourNormalizer {
    pub fn new(chain: impl Into<String>, token: impl AsRef<str>) -> Self {
        Self {
            chain: chain.into(),
            token: token.as_ref().to_lowercase(),
            symbol: None,
        }
    }

    /// Stamp the token symbol into every payload.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn identity_key(&self, period_start: u64) -> String {
        format!("{}:{}:{}", self.chain, self.token, period_start)
    }
}

/// Read a price given as a JSON number or a decimal string.
fn numeric(value: &Value) -> Option<Number> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Number::from_f64(f)
}

impl Normalizer for TokenHourNormalizer {
    fn normalize(&self, raw: &RawRecord, ctx: &NormalizeContext) -> Result<CanonicalRecord, IngestError> {
        let fail = |reason: String| IngestError::Normalization {
            record_id: raw.label(),
            reason,
        };

        let period = raw.height.ok_or_else(|| fail("missing periodStartUnix".into()))?;
        let fields = raw
            .fields
            .as_object()
            .ok_or_else(|| fail("candle is not an object".into()))?;

        let mut payload = Map::new();
        payload.insert("token".into(), Value::String(self.token.clone()));
        if let Some(symbol) = &self.symbol {
            payload.insert("symbol".into(), Value::String(symbol.clone()));
        }
        payload.insert("periodStartUnix".into(), Value::from(period));
        for name in PRICE_FIELDS {
            let value = fields
                .get(name)
                .ok_or_else(|| fail(format!("missing {name}")))?;
            let number = numeric(value).ok_or_else(|| fail(format!("{name} is not numeric: {value}")))?;
            payload.insert(name.into(), Value::Number(number));
        }

        Ok(CanonicalRecord {
            identity_key: self.identity_key(period),
            source_id: ctx.source_id.clone(),
            height: period,
            ingested_at: ctx.ingested_at,
            payload: Value::Object(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainingest_core::normalizer::normalize_batch;
    use serde_json::json;

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            source_id: "wbtc".into(),
            ingested_at: 1_700_000_000,
        }
    }

    fn candle(period: u64, fields: Value) -> RawRecord {
        RawRecord {
            id: Some(period.to_string()),
            height: Some(period),
            timestamp: Some(period as i64),
            fields,
        }
    }

    fn normalizer() -> TokenHourNormalizer {
        TokenHourNormalizer::new("ethereum", "0x2260FAC5E5542A773AA44FBCFEDF7C193BC2C599").with_symbol("WBTC")
    }

    #[test]
    fn decimal_strings_become_numbers() {
        let raw = candle(
            1_700_000_400,
            json!({
                "periodStartUnix": 1_700_000_400u64,
                "open": "36500.12", "close": "36610", "high": 36700.5, "low": "36400", "priceUSD": "36610.0"
            }),
        );
        let rec = normalizer().normalize(&raw, &ctx()).unwrap();
        assert_eq!(
            rec.identity_key,
            "ethereum:0x2260fac5e5542a773aa44fbcfedf7c193bc2c599:1700000400"
        );
        assert_eq!(rec.height, 1_700_000_400);
        assert_eq!(rec.source_id, "wbtc");
        assert_eq!(rec.payload["open"], 36500.12);
        assert_eq!(rec.payload["high"], 36700.5);
        assert_eq!(rec.payload["symbol"], "WBTC");
    }

    #[test]
    fn same_hour_same_key() {
        let n = normalizer();
        let a = n
            .normalize(&candle(3600, json!({"open":1,"close":1,"high":1,"low":1,"priceUSD":1})), &ctx())
            .unwrap();
        let b = n
            .normalize(&candle(3600, json!({"open":2,"close":2,"high":2,"low":2,"priceUSD":2})), &ctx())
            .unwrap();
        assert_eq!(a.identity_key, b.identity_key);
    }

    #[test]
    fn rejects_bad_candles() {
        let n = normalizer();
        let no_price = candle(3600, json!({"open":1,"close":1,"high":1,"low":1}));
        let text_price = candle(3600, json!({"open":"n/a","close":1,"high":1,"low":1,"priceUSD":1}));
        let mut no_period = candle(3600, json!({"open":1,"close":1,"high":1,"low":1,"priceUSD":1}));
        no_period.height = None;

        for raw in [no_price, text_price, no_period] {
            let err = n.normalize(&raw, &ctx()).unwrap_err();
            assert!(matches!(err, IngestError::Normalization { .. }));
        }
    }

    #[test]
    fn batch_skips_only_the_bad_candle() {
        let good = |p| candle(p, json!({"open":1,"close":1,"high":1,"low":1,"priceUSD":1}));
        let mut raws: Vec<_> = (1..=9).map(|i| good(i * 3600)).collect();
        raws.push(candle(36_000, json!({"open":1})));

        let batch = normalize_batch(&normalizer(), &raws, &ctx());
        assert_eq!(batch.records.len(), 9);
        assert_eq!(batch.failures.len(), 1);
    }
}
