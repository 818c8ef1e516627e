//! Trade intent ingestion.
//!
//! Intents come from an external generator (typically a language model) and
//! are untrusted: every field is re-checked here and the result is an
//! immutable `TradeIntent` or a `CoreError` naming the first violation.

use crate::error::{CoreError, Result};
use crate::{Price, Size, TradeAction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, warn};

/// Largest size or limit price an intent may carry. Keeps every later
/// product and quotient inside `Decimal` range.
pub const MAX_INTENT_MAGNITUDE: Decimal = dec!(1000000000000);

/// Bounds applied to every intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentLimits {
    #[serde(default = "default_min_leverage")]
    pub min_leverage: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Decimal,
    #[serde(default = "default_max_confidence")]
    pub max_confidence: Decimal,
}

fn default_min_leverage() -> u32 {
    1
}

fn default_max_leverage() -> u32 {
    25
}

fn default_min_confidence() -> Decimal {
    dec!(0.1)
}

fn default_max_confidence() -> Decimal {
    Decimal::ONE
}

impl Default for IntentLimits {
    fn default() -> Self {
        Self {
            min_leverage: default_min_leverage(),
            max_leverage: default_max_leverage(),
            min_confidence: default_min_confidence(),
            max_confidence: default_max_confidence(),
        }
    }
}

/// Intent as received, before validation. Numbers may arrive as JSON
/// numbers or strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIntent {
    #[serde(default)]
    pub coin: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub size: Option<Value>,
    #[serde(default)]
    pub leverage: Option<Value>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub limit_price: Option<Value>,
}

/// Validated trade intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub coin: String,
    pub action: TradeAction,
    /// Advisory size; the normalizer may raise it to the asset minimum.
    pub requested_size: Size,
    pub leverage: u32,
    pub confidence: Decimal,
    /// Explicit limit price. Without one the normalizer derives a price
    /// from the reference.
    pub limit_price: Option<Price>,
    /// Carried for audit only.
    pub rationale: String,
}

impl TradeIntent {
    /// Validate a raw intent against `limits`.
    pub fn from_raw(raw: RawIntent, limits: &IntentLimits) -> Result<Self> {
        let coin = raw
            .coin
            .as_deref()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CoreError::InvalidIntent("missing coin".to_string()))?;

        let action = raw
            .action
            .as_deref()
            .ok_or_else(|| CoreError::InvalidIntent(format!("{coin}: missing action")))?
            .parse::<TradeAction>()?;

        let requested_size = match &raw.size {
            Some(v) => Size::new(decimal_field(v, "size")?),
            None if action.opening_side().is_some() => {
                return Err(CoreError::InvalidIntent(format!("{coin}: missing size")));
            }
            None => Size::ZERO,
        };
        if requested_size.inner().is_sign_negative() && !requested_size.is_zero() {
            return Err(CoreError::InvalidSize(format!(
                "{coin}: negative size {requested_size}"
            )));
        }
        check_size_magnitude(&coin, requested_size)?;

        let leverage = match &raw.leverage {
            Some(v) => integer_field(v, "leverage")?,
            None => limits.min_leverage,
        };
        if leverage < limits.min_leverage || leverage > limits.max_leverage {
            return Err(CoreError::LeverageOutOfRange {
                value: leverage,
                min: limits.min_leverage,
                max: limits.max_leverage,
            });
        }

        let confidence = match &raw.confidence {
            Some(v) => decimal_field(v, "confidence")?,
            None => return Err(CoreError::InvalidIntent(format!("{coin}: missing confidence"))),
        };
        if confidence < limits.min_confidence || confidence > limits.max_confidence {
            return Err(CoreError::ConfidenceOutOfRange(confidence.to_string()));
        }

        let limit_price = match &raw.limit_price {
            Some(Value::Null) | None => None,
            Some(v) => {
                let p = Price::new(decimal_field(v, "limit_price")?);
                if !p.is_positive() {
                    return Err(CoreError::InvalidPrice(format!("{coin}: limit price {p}")));
                }
                check_price_magnitude(&coin, p)?;
                Some(p)
            }
        };

        Ok(Self {
            coin,
            action,
            requested_size,
            leverage,
            confidence,
            limit_price,
            rationale: raw.reasoning.unwrap_or_default(),
        })
    }

    /// Re-check leverage, confidence and magnitude bounds on an already
    /// built intent.
    pub fn check_bounds(&self, limits: &IntentLimits) -> Result<()> {
        check_size_magnitude(&self.coin, self.requested_size)?;
        if let Some(p) = self.limit_price {
            check_price_magnitude(&self.coin, p)?;
        }
        if self.leverage < limits.min_leverage || self.leverage > limits.max_leverage {
            return Err(CoreError::LeverageOutOfRange {
                value: self.leverage,
                min: limits.min_leverage,
                max: limits.max_leverage,
            });
        }
        if self.confidence < limits.min_confidence || self.confidence > limits.max_confidence {
            return Err(CoreError::ConfidenceOutOfRange(self.confidence.to_string()));
        }
        Ok(())
    }
}

fn check_size_magnitude(coin: &str, size: Size) -> Result<()> {
    if size.inner().abs() > MAX_INTENT_MAGNITUDE {
        return Err(CoreError::InvalidSize(format!(
            "{coin}: size {size} above {MAX_INTENT_MAGNITUDE}"
        )));
    }
    Ok(())
}

fn check_price_magnitude(coin: &str, price: Price) -> Result<()> {
    if price.inner().abs() > MAX_INTENT_MAGNITUDE {
        return Err(CoreError::InvalidPrice(format!(
            "{coin}: limit price {price} above {MAX_INTENT_MAGNITUDE}"
        )));
    }
    Ok(())
}

fn decimal_field(value: &Value, field: &str) -> Result<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(CoreError::InvalidIntent(format!(
                "{field}: expected number, got {other}"
            )))
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| CoreError::InvalidIntent(format!("{field}: not a decimal: {text}")))
}

fn integer_field(value: &Value, field: &str) -> Result<u32> {
    let d = decimal_field(value, field)?;
    if !d.fract().is_zero() || d.is_sign_negative() {
        return Err(CoreError::InvalidIntent(format!(
            "{field}: expected a whole number, got {d}"
        )));
    }
    d.to_u32()
        .ok_or_else(|| CoreError::InvalidIntent(format!("{field}: out of range: {d}")))
}

/// Locate the outermost JSON array or object embedded in free text
/// (model output often wraps it in prose or code fences).
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let close = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse every intent found in `text`.
///
/// Accepts either an array of intent objects carrying `coin`, or an object
/// keyed by coin. Each entry is validated on its own so one bad record does
/// not discard the rest; the outer error is only for unparseable input.
pub fn parse_intents(text: &str, limits: &IntentLimits) -> Result<Vec<Result<TradeIntent>>> {
    let json = extract_json(text)
        .ok_or_else(|| CoreError::InvalidIntent("no JSON found in intent payload".to_string()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| CoreError::InvalidIntent(format!("malformed intent JSON: {e}")))?;

    let raws: Vec<std::result::Result<RawIntent, CoreError>> = match value {
        Value::Array(items) => items.into_iter().map(raw_from_value).collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(coin, v)| {
                raw_from_value(v).map(|mut raw| {
                    raw.coin.get_or_insert(coin);
                    raw
                })
            })
            .collect(),
        other => {
            return Err(CoreError::InvalidIntent(format!(
                "expected array or object, got {other}"
            )))
        }
    };

    let intents: Vec<_> = raws
        .into_iter()
        .map(|raw| raw.and_then(|r| TradeIntent::from_raw(r, limits)))
        .collect();

    let rejected = intents.iter().filter(|r| r.is_err()).count();
    if rejected > 0 {
        warn!(total = intents.len(), rejected, "Some intents failed validation");
    } else {
        debug!(total = intents.len(), "Parsed intents");
    }
    Ok(intents)
}

fn raw_from_value(value: Value) -> Result<RawIntent> {
    serde_json::from_value(value)
        .map_err(|e| CoreError::InvalidIntent(format!("malformed intent entry: {e}")))
}
