//! Decision-cycle driver for the hlx order pipeline.
//!
//! Loads intents every cycle, runs them through `OrderPipeline` (assets in
//! parallel, one intent at a time per asset) and logs what happened.

pub mod app;
pub mod config;
pub mod cycle;
pub mod error;
pub mod intents;

pub use app::Application;
pub use config::{AppConfig, OperatingMode};
pub use cycle::{run_cycle, CycleSummary, ExecutedOrder, FailedIntent};
pub use error::{AppError, AppResult};
pub use intents::{FileIntentSource, IntentBatch, IntentSource, StaticIntentSource};
