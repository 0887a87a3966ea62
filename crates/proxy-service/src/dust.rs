//! 잔고 먼지(dust) 필터.
//!
//! `returnCompleteBalances` 응답에서 BTC 환산 가치가 매우 작은 통화의
//! `available` 값을 0으로 표시합니다. 표시용 필터이며 실제 잔고에는
//! 영향을 주지 않습니다.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Map, Value};

use crate::error::{ProxyError, ProxyResult};

/// BTC 환산 먼지 기준.
const BTC_VALUE_THRESHOLD: Decimal = dec!(0.00015);

/// USDT 보유량 먼지 기준.
const USDT_AMOUNT_THRESHOLD: Decimal = dec!(1);

const USDT: &str = "USDT";
const ZERO_AMOUNT: &str = "0.00000000";

/// 숫자 또는 문자열로 인코딩된 금액 파싱.
pub(crate) fn to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// 원래 표현(숫자/문자열)을 유지한 0 값.
fn zero_like(original: &Value) -> Value {
    match original {
        Value::String(_) => Value::String(ZERO_AMOUNT.to_string()),
        _ => Value::from(0),
    }
}

/// 단일 잔고 항목이 먼지인지 판단.
///
/// 가용 잔고가 0인 항목이나 필드가 없는 항목은 먼지로 보지 않습니다.
fn is_dust(currency: &str, balance: &Map<String, Value>) -> bool {
    let field = |name: &str| balance.get(name).and_then(to_decimal);
    let (Some(available), Some(on_orders), Some(btc_value)) =
        (field("available"), field("onOrders"), field("btcValue"))
    else {
        return false;
    };

    if available.is_zero() {
        return false;
    }

    if currency == USDT {
        return available < USDT_AMOUNT_THRESHOLD;
    }

    let value = btc_value
        .checked_div(available + on_orders)
        .and_then(|price| price.checked_mul(available))
        .unwrap_or(Decimal::ZERO);
    value < BTC_VALUE_THRESHOLD
}

/// 전체 잔고 응답에 먼지 필터를 적용합니다.
pub fn hide_dust(raw: &str) -> ProxyResult<String> {
    let parsed: Value = serde_json::from_str(raw)?;
    let Value::Object(mut balances) = parsed else {
        return Err(ProxyError::Parse(
            "complete balances payload is not a JSON object".to_string(),
        ));
    };

    for (currency, entry) in balances.iter_mut() {
        let Value::Object(balance) = entry else {
            continue;
        };
        if is_dust(currency, balance) {
            if let Some(available) = balance.get_mut("available") {
                *available = zero_like(available);
            }
        }
    }

    Ok(serde_json::to_string(&balances)?)
}
