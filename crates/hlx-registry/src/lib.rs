//! Asset metadata, reference prices and account state.
//!
//! - `AssetSpecRegistry`: merges static asset config with exchange metadata
//!   and resolves a price-dependent `AssetSpec` each cycle.
//! - `InfoClient`: read-only access to the exchange info endpoint.
//! - `user_state`: clearinghouseState wire types and conversion into
//!   `AccountState`.

pub mod asset_registry;
pub mod client;
pub mod error;
pub mod user_state;

pub use asset_registry::{AssetMetadata, AssetSpecRegistry, RawPerpSpec, RegistryConfig, StaticAssetConfig};
pub use client::{InfoClient, MetaAndPrices};
pub use error::{RegistryError, RegistryResult};
pub use user_state::{
    AssetPositionData, AssetPositionEntry, ClearinghouseStateResponse, LeverageInfo, MarginSummary,
};
