//! HTTP balance endpoints and equity extraction from their JSON bodies.

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CalibrationError, Result};
use crate::types::AccountSnapshot;

/// Source of JSON account documents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceEndpoint: Send + Sync {
    /// GET `url` and parse the body as JSON.
    async fn get_json(&self, url: &str) -> Result<Value>;
}

/// reqwest-backed endpoint with a hard per-request timeout.
pub struct HttpBalanceEndpoint {
    http_client: reqwest::Client,
}

impl HttpBalanceEndpoint {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl BalanceEndpoint for HttpBalanceEndpoint {
    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(CalibrationError::Api {
                message: format!("Balance request failed: {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Pull equity out of an account document.
///
/// Field priority, first positive value wins:
/// 1. `equity`
/// 2. `bankroll`
/// 3. `available` + `invested_open`
/// 4. `available` + `invested`
/// 5. `balance`
///
/// Numbers may be JSON numbers or numeric strings. Zero and negative values
/// count as absent.
pub fn extract_equity(body: &Value) -> Option<AccountSnapshot> {
    if let Some(equity) = positive_field(body, "equity") {
        return Some(AccountSnapshot::from_equity(equity));
    }
    if let Some(bankroll) = positive_field(body, "bankroll") {
        return Some(AccountSnapshot::from_equity(bankroll));
    }

    for invested_key in ["invested_open", "invested"] {
        if let (Some(available), Some(invested)) =
            (decimal_field(body, "available"), decimal_field(body, invested_key))
        {
            let snapshot = AccountSnapshot::from_parts(available, invested);
            if snapshot.equity > Decimal::ZERO {
                return Some(snapshot);
            }
        }
    }

    positive_field(body, "balance").map(AccountSnapshot::from_equity)
}

fn positive_field(body: &Value, key: &str) -> Option<Decimal> {
    decimal_field(body, key).filter(|v| *v > Decimal::ZERO)
}

fn decimal_field(body: &Value, key: &str) -> Option<Decimal> {
    match body.get(key)? {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn equity(body: Value) -> Option<Decimal> {
        extract_equity(&body).map(|s| s.equity)
    }

    #[test]
    fn test_direct_equity_first() {
        let body = json!({"equity": 42.5, "bankroll": 10, "balance": 3});
        assert_eq!(equity(body), Some(Decimal::new(425, 1)));
    }

    #[test]
    fn test_bankroll_when_equity_missing_or_zero() {
        assert_eq!(equity(json!({"bankroll": 13.06})), Some(Decimal::new(1306, 2)));
        assert_eq!(
            equity(json!({"equity": 0, "bankroll": "20.10"})),
            Some(Decimal::new(2010, 2))
        );
    }

    #[test]
    fn test_invested_open_pair_beats_generic_pair() {
        let body = json!({"available": 10, "invested_open": 5, "invested": 100});
        let snap = extract_equity(&body).unwrap();
        assert_eq!(snap.equity, Decimal::new(15, 0));
        assert_eq!(snap.invested, Some(Decimal::new(5, 0)));
    }

    #[test]
    fn test_generic_pair_then_balance() {
        assert_eq!(
            equity(json!({"available": "7.25", "invested": 2.75})),
            Some(Decimal::new(10, 0))
        );
        assert_eq!(equity(json!({"available": 7.25, "balance": 9})), Some(Decimal::new(9, 0)));
    }

    #[test]
    fn test_non_positive_and_malformed_are_absent() {
        assert_eq!(equity(json!({"equity": -4})), None);
        assert_eq!(equity(json!({"available": 0, "invested": 0})), None);
        assert_eq!(equity(json!({"balance": "n/a"})), None);
        assert_eq!(equity(json!({"equity": true})), None);
        assert_eq!(equity(json!([1, 2, 3])), None);
    }
}
