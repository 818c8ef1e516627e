//! Core domain types for the hlx order pipeline.
//!
//! This crate provides the types shared by every stage of the pipeline:
//! - `Price`, `Size`: precision-safe numeric types
//! - `AssetSpec`: per-asset exchange constraints (tick, size precision, leverage cap)
//! - `TradeIntent`: strictly validated intent records and their ingestion
//! - `ReferencePrice`, `AccountState`, `NormalizedOrder`: pipeline inputs and outputs

pub mod decimal;
pub mod error;
pub mod intent;
pub mod market;
pub mod order;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use intent::{parse_intents, IntentLimits, RawIntent, TradeIntent, MAX_INTENT_MAGNITUDE};
pub use market::{AssetId, AssetSpec, MAX_PERP_DECIMALS, MAX_SIG_FIGS};
pub use order::{ClientOrderId, OrderSide, TimeInForce, TradeAction};
pub use types::{AccountState, NormalizedOrder, Position, ReferencePrice};
