//! HTTP client for the exchange info endpoint.
//!
//! Read-only requests: asset universe (`meta`), mark prices
//! (`metaAndAssetCtxs`) and account state (`clearinghouseState`).

use crate::asset_registry::RawPerpSpec;
use crate::error::{RegistryError, RegistryResult};
use crate::user_state::ClearinghouseStateResponse;
use chrono::{DateTime, Utc};
use hlx_core::{Price, ReferencePrice};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct InfoRequest<'a> {
    #[serde(rename = "type")]
    request_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    universe: Vec<RawPerpSpec>,
}

#[derive(Debug, Deserialize)]
struct RawAssetCtx {
    #[serde(rename = "markPx")]
    mark_px: Option<String>,
}

/// Universe plus mark prices from one `metaAndAssetCtxs` call.
#[derive(Debug, Clone)]
pub struct MetaAndPrices {
    pub universe: Vec<RawPerpSpec>,
    pub prices: HashMap<String, ReferencePrice>,
}

/// Client for the info endpoint.
pub struct InfoClient {
    client: Client,
    info_url: String,
}

impl InfoClient {
    /// Create a new info client.
    ///
    /// # Arguments
    /// * `info_url` - URL of the info endpoint (e.g., "https://api.hyperliquid.xyz/info")
    /// * `timeout` - per-request timeout
    pub fn new(info_url: impl Into<String>, timeout: Duration) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            info_url: info_url.into(),
        })
    }

    pub fn info_url(&self) -> &str {
        &self.info_url
    }

    async fn post<T: DeserializeOwned>(&self, request: &InfoRequest<'_>) -> RegistryResult<T> {
        let response = self.client.post(&self.info_url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            RegistryError::ParseError(format!("{} response: {e}", request.request_type))
        })
    }

    /// Fetch the perp universe. Index in the returned vector is the asset id.
    pub async fn fetch_meta(&self) -> RegistryResult<Vec<RawPerpSpec>> {
        info!(url = %self.info_url, "Fetching meta from exchange");
        let meta: MetaResponse = self
            .post(&InfoRequest {
                request_type: "meta",
                user: None,
            })
            .await?;
        info!(assets = meta.universe.len(), "Fetched meta");
        Ok(meta.universe)
    }

    /// Fetch the universe together with the exchange's mark prices.
    ///
    /// Mark price is the exchange's own reference for its deviation check,
    /// so it is the reference the normalizer must use.
    pub async fn fetch_meta_and_prices(&self) -> RegistryResult<MetaAndPrices> {
        debug!(url = %self.info_url, "Fetching metaAndAssetCtxs");
        let (meta, ctxs): (MetaResponse, Vec<RawAssetCtx>) = self
            .post(&InfoRequest {
                request_type: "metaAndAssetCtxs",
                user: None,
            })
            .await?;
        let fetched_at = Utc::now();
        let prices = pair_mark_prices(&meta.universe, &ctxs, fetched_at);
        debug!(
            assets = meta.universe.len(),
            priced = prices.len(),
            "Fetched metaAndAssetCtxs"
        );
        Ok(MetaAndPrices {
            universe: meta.universe,
            prices,
        })
    }

    /// Mark prices only, keyed by upper-case coin.
    pub async fn fetch_reference_prices(&self) -> RegistryResult<HashMap<String, ReferencePrice>> {
        Ok(self.fetch_meta_and_prices().await?.prices)
    }

    /// Fetch clearinghouse state for a user.
    pub async fn fetch_clearinghouse_state(
        &self,
        user_address: &str,
    ) -> RegistryResult<ClearinghouseStateResponse> {
        debug!(user = %user_address, "Fetching clearinghouseState");
        let state: ClearinghouseStateResponse = self
            .post(&InfoRequest {
                request_type: "clearinghouseState",
                user: Some(user_address),
            })
            .await?;
        debug!(
            positions = state.asset_positions.len(),
            withdrawable = ?state.withdrawable,
            "Fetched clearinghouseState"
        );
        Ok(state)
    }
}

fn pair_mark_prices(
    universe: &[RawPerpSpec],
    ctxs: &[RawAssetCtx],
    fetched_at: DateTime<Utc>,
) -> HashMap<String, ReferencePrice> {
    if universe.len() != ctxs.len() {
        warn!(
            universe = universe.len(),
            ctxs = ctxs.len(),
            "metaAndAssetCtxs length mismatch"
        );
    }
    universe
        .iter()
        .zip(ctxs)
        .filter_map(|(spec, ctx)| {
            let raw = ctx.mark_px.as_deref()?;
            match raw.parse::<Price>() {
                Ok(price) if price.is_positive() => Some((
                    spec.name.to_ascii_uppercase(),
                    ReferencePrice::new(spec.name.to_ascii_uppercase(), price, fetched_at),
                )),
                _ => {
                    warn!(coin = %spec.name, mark_px = %raw, "Unusable mark price");
                    None
                }
            }
        })
        .collect()
}
