//! L1 action signing.
//!
//! Two stages, as the exchange verifies them:
//! 1. `action_hash = keccak256(msgpack(action) || nonce_be || vault_tag || expiry_tag)`
//! 2. EIP-712 signature over the phantom agent `{source, connectionId: action_hash}`
//!
//! The msgpack encoding is key-order sensitive: struct field order below is
//! the order the exchange hashes, and changing it invalidates signatures.

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, PrimitiveSignature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer as AlloySigner;
use alloy::sol;
use alloy::sol_types::eip712_domain;
use alloy::sol_types::SolStruct;
use hlx_core::market::format_decimal;
use hlx_core::NormalizedOrder;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::nonce::NonceManager;

// =============================================================================
// Keys
// =============================================================================

/// Where the signing key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Hex key in an environment variable.
    EnvVar { var_name: String },
    /// Hex key in a file (keep it 0600).
    File { path: PathBuf },
}

/// Holds the signing key. Key material is never logged.
pub struct KeyManager {
    signer: PrivateKeySigner,
}

impl KeyManager {
    /// Load the key and, when `expected_address` is set, check that it
    /// derives to that address.
    pub fn load(source: &KeySource, expected_address: Option<Address>) -> Result<Self, KeyError> {
        let secret = match source {
            KeySource::EnvVar { var_name } => {
                let raw = std::env::var(var_name)
                    .map_err(|_| KeyError::EnvVarNotFound(var_name.clone()))?;
                decode_hex_key(&raw)?
            }
            KeySource::File { path } => {
                let raw = Zeroizing::new(std::fs::read_to_string(path)?);
                decode_hex_key(&raw)?
            }
        };
        Self::from_bytes(&secret, expected_address)
    }

    /// Build from raw key bytes.
    pub fn from_bytes(secret: &[u8], expected_address: Option<Address>) -> Result<Self, KeyError> {
        let signer =
            PrivateKeySigner::from_slice(secret).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        if let Some(expected) = expected_address {
            if signer.address() != expected {
                return Err(KeyError::AddressMismatch {
                    expected,
                    actual: signer.address(),
                });
            }
        }
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

fn decode_hex_key(raw: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    Ok(Zeroizing::new(hex::decode(hex_part)?))
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Failed to decode hex: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: Address, actual: Address },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Wire format
// =============================================================================

/// One order as the exchange hashes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderWire {
    #[serde(rename = "a")]
    pub asset: u32,
    #[serde(rename = "b")]
    pub is_buy: bool,
    #[serde(rename = "p")]
    pub limit_px: String,
    #[serde(rename = "s")]
    pub sz: String,
    #[serde(rename = "r")]
    pub reduce_only: bool,
    #[serde(rename = "t")]
    pub order_type: OrderTypeWire,
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    pub cloid: Option<String>,
}

impl OrderWire {
    /// Wire form of a normalized order. Price and size are already aligned,
    /// so formatting only strips trailing zeros.
    pub fn from_normalized(order: &NormalizedOrder) -> Self {
        Self {
            asset: order.asset.index(),
            is_buy: order.is_buy(),
            limit_px: format_decimal(order.price.inner()),
            sz: format_decimal(order.size.inner()),
            reduce_only: order.reduce_only,
            order_type: OrderTypeWire::limit(order.tif.as_wire()),
            cloid: Some(order.cloid.to_string()),
        }
    }
}

/// `{"limit": {"tif": "Gtc" | "Ioc" | "Alo"}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderTypeWire {
    pub limit: LimitOrderType,
}

impl OrderTypeWire {
    pub fn limit(tif: &str) -> Self {
        Self {
            limit: LimitOrderType {
                tif: tif.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitOrderType {
    pub tif: String,
}

/// `{"type": "order", "orders": [...], "grouping": "na"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub orders: Vec<OrderWire>,
    pub grouping: String,
}

impl OrderAction {
    pub fn single(order: OrderWire) -> Self {
        Self {
            action_type: "order".to_string(),
            orders: vec![order],
            grouping: "na".to_string(),
        }
    }
}

/// `{"type": "updateLeverage", "asset": n, "isCross": bool, "leverage": n}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateLeverageAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub asset: u32,
    #[serde(rename = "isCross")]
    pub is_cross: bool,
    pub leverage: u32,
}

impl UpdateLeverageAction {
    pub fn new(asset: u32, is_cross: bool, leverage: u32) -> Self {
        Self {
            action_type: "updateLeverage".to_string(),
            asset,
            is_cross,
            leverage,
        }
    }
}

/// Every action this crate signs. Serializes as the inner payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Action {
    Order(OrderAction),
    UpdateLeverage(UpdateLeverageAction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Order(_) => "order",
            Self::UpdateLeverage(_) => "updateLeverage",
        }
    }
}

// =============================================================================
// action_hash
// =============================================================================

#[derive(Debug, Clone)]
pub struct SigningInput {
    pub action: Action,
    pub nonce: u64,
    /// Set when trading on behalf of a vault.
    pub vault_address: Option<Address>,
    pub expires_after: Option<u64>,
}

impl SigningInput {
    pub fn action_hash(&self) -> Result<B256, SignerError> {
        let mut data = rmp_serde::to_vec_named(&self.action)
            .map_err(|e| SignerError::SerializationFailed(e.to_string()))?;

        data.extend_from_slice(&self.nonce.to_be_bytes());

        // Vault tag is always present: 0x00, or 0x01 followed by the address.
        match &self.vault_address {
            None => data.push(0x00),
            Some(addr) => {
                data.push(0x01);
                data.extend_from_slice(addr.as_slice());
            }
        }

        // Expiry tag only exists when set.
        if let Some(expires) = self.expires_after {
            data.push(0x00);
            data.extend_from_slice(&expires.to_be_bytes());
        }

        Ok(keccak256(&data))
    }
}

// =============================================================================
// EIP-712
// =============================================================================

pub const EIP712_DOMAIN_NAME: &str = "Exchange";
pub const EIP712_DOMAIN_VERSION: &str = "1";
pub const EIP712_CHAIN_ID: u64 = 1337;
pub const EIP712_VERIFYING_CONTRACT: Address = Address::ZERO;

sol! {
    #[derive(Debug)]
    struct Agent {
        string source;
        bytes32 connectionId;
    }
}

/// EIP-712 signing target: the action hash bound to a network.
#[derive(Debug, Clone)]
pub struct PhantomAgent {
    /// "a" on mainnet, "b" on testnet.
    pub source: String,
    pub connection_id: B256,
}

impl PhantomAgent {
    pub fn new(action_hash: B256, is_mainnet: bool) -> Self {
        Self {
            source: if is_mainnet { "a" } else { "b" }.to_string(),
            connection_id: action_hash,
        }
    }

    pub fn signing_hash(&self) -> B256 {
        let domain = eip712_domain! {
            name: EIP712_DOMAIN_NAME,
            version: EIP712_DOMAIN_VERSION,
            chain_id: EIP712_CHAIN_ID,
            verifying_contract: EIP712_VERIFYING_CONTRACT,
        };
        Agent {
            source: self.source.clone(),
            connectionId: self.connection_id,
        }
        .eip712_signing_hash(&domain)
    }

    pub async fn sign<S: AlloySigner + Send + Sync>(
        &self,
        signer: &S,
    ) -> Result<PrimitiveSignature, alloy::signers::Error> {
        signer.sign_hash(&self.signing_hash()).await
    }
}

// =============================================================================
// Signed output
// =============================================================================

/// `{r, s, v}` as the exchange expects: 0x-prefixed hex, v in 27/28.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

impl ActionSignature {
    /// From `r(32) || s(32) || v(1)`; v of 0/1 is lifted to 27/28.
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        let v_raw = bytes[64];
        Self {
            r: format!("0x{}", hex::encode(&bytes[0..32])),
            s: format!("0x{}", hex::encode(&bytes[32..64])),
            v: if v_raw < 27 { v_raw + 27 } else { v_raw },
        }
    }

    pub fn from_signature(sig: &PrimitiveSignature) -> Self {
        let mut bytes = [0u8; 65];
        bytes[0..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
        bytes[32..64].copy_from_slice(&sig.s().to_be_bytes::<32>());
        bytes[64] = u8::from(sig.v());
        Self::from_bytes(&bytes)
    }
}

/// A signed action, ready to post. Never modified after signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAction {
    pub action: Action,
    pub nonce: u64,
    pub signature: ActionSignature,
    pub vault_address: Option<Address>,
    pub expires_after: Option<u64>,
}

/// A normalized order with the signed action that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOrder {
    pub order: NormalizedOrder,
    pub signed: SignedAction,
}

impl SignedOrder {
    pub fn nonce(&self) -> u64 {
        self.signed.nonce
    }
}

// =============================================================================
// Signer
// =============================================================================

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signing failed: {0}")]
    SigningFailed(#[from] alloy::signers::Error),

    #[error("Action serialization failed: {0}")]
    SerializationFailed(String),
}

/// Signs actions for one credential, drawing nonces from its manager.
pub struct OrderSigner {
    key_manager: Arc<KeyManager>,
    nonces: Arc<NonceManager>,
    is_mainnet: bool,
    vault_address: Option<Address>,
    /// Signature lifetime added to the nonce, when set.
    expires_after_ms: Option<u64>,
}

impl OrderSigner {
    pub fn new(key_manager: Arc<KeyManager>, nonces: Arc<NonceManager>, is_mainnet: bool) -> Self {
        Self {
            key_manager,
            nonces,
            is_mainnet,
            vault_address: None,
            expires_after_ms: None,
        }
    }

    pub fn with_vault(mut self, vault_address: Option<Address>) -> Self {
        self.vault_address = vault_address;
        self
    }

    pub fn with_expiry(mut self, expires_after_ms: Option<u64>) -> Self {
        self.expires_after_ms = expires_after_ms;
        self
    }

    pub fn address(&self) -> Address {
        self.key_manager.address()
    }

    pub fn is_mainnet(&self) -> bool {
        self.is_mainnet
    }

    pub fn nonces(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    /// Sign `action` with a freshly allocated nonce.
    pub async fn sign_action(&self, action: Action) -> Result<SignedAction, SignerError> {
        let nonce = self.nonces.next();
        self.sign_with_nonce(action, nonce).await
    }

    /// Sign `action` with a caller-chosen nonce. Deterministic for identical
    /// inputs.
    pub async fn sign_with_nonce(
        &self,
        action: Action,
        nonce: u64,
    ) -> Result<SignedAction, SignerError> {
        let input = SigningInput {
            action,
            nonce,
            vault_address: self.vault_address,
            expires_after: self.expires_after_ms.map(|ttl| nonce.saturating_add(ttl)),
        };
        let action_hash = input.action_hash()?;
        let signature = PhantomAgent::new(action_hash, self.is_mainnet)
            .sign(self.key_manager.signer())
            .await?;
        debug!(action = input.action.kind(), nonce, "Signed action");

        Ok(SignedAction {
            action: input.action,
            nonce,
            signature: ActionSignature::from_signature(&signature),
            vault_address: input.vault_address,
            expires_after: input.expires_after,
        })
    }

    /// Sign one order. Each call is one submission attempt and consumes one
    /// nonce.
    pub async fn sign_order(&self, order: &NormalizedOrder) -> Result<SignedOrder, SignerError> {
        let action = Action::Order(OrderAction::single(OrderWire::from_normalized(order)));
        let signed = self.sign_action(action).await?;
        Ok(SignedOrder {
            order: order.clone(),
            signed,
        })
    }

    pub async fn sign_update_leverage(
        &self,
        asset: u32,
        is_cross: bool,
        leverage: u32,
    ) -> Result<SignedAction, SignerError> {
        self.sign_action(Action::UpdateLeverage(UpdateLeverageAction::new(
            asset, is_cross, leverage,
        )))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::FixedClock;
    use hlx_core::{AssetId, ClientOrderId, OrderSide, Price, Size, TimeInForce};
    use rust_decimal_macros::dec;

    const TEST_PRIVATE_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const T0: u64 = 1_769_339_470_576;

    fn key_bytes() -> Vec<u8> {
        hex::decode(TEST_PRIVATE_KEY.trim_start_matches("0x")).unwrap()
    }

    fn signer(is_mainnet: bool) -> OrderSigner {
        let keys = Arc::new(KeyManager::from_bytes(&key_bytes(), None).unwrap());
        let nonces = Arc::new(NonceManager::new(Arc::new(FixedClock::new(T0))));
        OrderSigner::new(keys, nonces, is_mainnet)
    }

    fn golden_action() -> Action {
        Action::Order(OrderAction::single(OrderWire {
            asset: 110027,
            is_buy: true,
            limit_px: "105.00".to_string(),
            sz: "0.2".to_string(),
            reduce_only: false,
            order_type: OrderTypeWire::limit("Ioc"),
            cloid: Some("0x0de3e244a8f44fc28a6b7bc852d66d19".to_string()),
        }))
    }

    fn ada_order() -> NormalizedOrder {
        NormalizedOrder {
            coin: "ADA".to_string(),
            asset: AssetId::new(65),
            side: OrderSide::Buy,
            size: Size::new(dec!(16)),
            price: Price::new(dec!(0.6560)),
            leverage: 5,
            required_margin: dec!(2.0992),
            reduce_only: false,
            tif: TimeInForce::GoodTilCancelled,
            cloid: ClientOrderId::parse("0x0de3e244a8f44fc28a6b7bc852d66d19").unwrap(),
        }
    }

    #[test]
    fn test_key_manager_address_check() {
        let keys = KeyManager::from_bytes(&key_bytes(), None).unwrap();
        let expected = keys.address();
        assert!(KeyManager::from_bytes(&key_bytes(), Some(expected)).is_ok());
        assert!(matches!(
            KeyManager::from_bytes(&key_bytes(), Some(Address::ZERO)),
            Err(KeyError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_key_manager_loads_env_var_with_prefix() {
        std::env::set_var("HLX_SIGNER_TEST_KEY", format!("  {TEST_PRIVATE_KEY}\n"));
        let source = KeySource::EnvVar {
            var_name: "HLX_SIGNER_TEST_KEY".to_string(),
        };
        assert!(KeyManager::load(&source, None).is_ok());

        let missing = KeySource::EnvVar {
            var_name: "HLX_SIGNER_TEST_KEY_MISSING".to_string(),
        };
        assert!(matches!(
            KeyManager::load(&missing, None),
            Err(KeyError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_msgpack_matches_exchange_encoding() {
        let bytes = rmp_serde::to_vec_named(&golden_action()).unwrap();
        assert_eq!(
            hex::encode(&bytes),
            "83a474797065a56f72646572a66f72646572739187a161ce0001adcba162c3a170a63130352e3030a173a3302e32a172c2a17481a56c696d697481a3746966a3496f63a163d92230783064653365323434613866343466633238613662376263383532643636643139a867726f7570696e67a26e61"
        );
    }

    #[test]
    fn test_action_hash_golden() {
        let input = SigningInput {
            action: golden_action(),
            nonce: 1769339470576,
            vault_address: None,
            expires_after: None,
        };
        assert_eq!(
            hex::encode(input.action_hash().unwrap()),
            "904c57b8f4b75ac9da005b49298dc39af735ed8c3a89b241f5f1e061e0207868"
        );
    }

    #[test]
    fn test_action_hash_binds_vault_and_expiry() {
        let base = SigningInput {
            action: golden_action(),
            nonce: 1000,
            vault_address: None,
            expires_after: None,
        };
        let with_vault = SigningInput {
            vault_address: Some(Address::repeat_byte(0x42)),
            ..base.clone()
        };
        let with_expiry = SigningInput {
            expires_after: Some(1_700_000_000),
            ..base.clone()
        };
        let h = base.action_hash().unwrap();
        assert_ne!(h, with_vault.action_hash().unwrap());
        assert_ne!(h, with_expiry.action_hash().unwrap());
    }

    #[test]
    fn test_update_leverage_wire_shape() {
        let action = Action::UpdateLeverage(UpdateLeverageAction::new(65, true, 5));
        assert_eq!(
            serde_json::to_string(&action).unwrap(),
            r#"{"type":"updateLeverage","asset":65,"isCross":true,"leverage":5}"#
        );
    }

    #[test]
    fn test_order_wire_from_normalized() {
        let wire = OrderWire::from_normalized(&ada_order());
        assert_eq!(
            serde_json::to_string(&wire).unwrap(),
            r#"{"a":65,"b":true,"p":"0.656","s":"16","r":false,"t":{"limit":{"tif":"Gtc"}},"c":"0x0de3e244a8f44fc28a6b7bc852d66d19"}"#
        );
    }

    #[test]
    fn test_eip712_hashes_match_manual_encoding() {
        let action_hash = B256::from_slice(
            &hex::decode("f01fa6eaca0b8cbd2afe65f8852a2e00d35eae3d19560ece9b8a28614646e849")
                .unwrap(),
        );

        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );
        let mut domain_data = Vec::new();
        domain_data.extend_from_slice(type_hash.as_slice());
        domain_data.extend_from_slice(keccak256(EIP712_DOMAIN_NAME.as_bytes()).as_slice());
        domain_data.extend_from_slice(keccak256(EIP712_DOMAIN_VERSION.as_bytes()).as_slice());
        let mut chain_id = [0u8; 32];
        chain_id[24..].copy_from_slice(&EIP712_CHAIN_ID.to_be_bytes());
        domain_data.extend_from_slice(&chain_id);
        domain_data.extend_from_slice(&[0u8; 32]);
        let domain_separator = keccak256(&domain_data);

        let mut struct_data = Vec::new();
        struct_data.extend_from_slice(keccak256(b"Agent(string source,bytes32 connectionId)").as_slice());
        struct_data.extend_from_slice(keccak256(b"b").as_slice());
        struct_data.extend_from_slice(action_hash.as_slice());
        let struct_hash = keccak256(&struct_data);

        let mut digest = vec![0x19, 0x01];
        digest.extend_from_slice(domain_separator.as_slice());
        digest.extend_from_slice(struct_hash.as_slice());

        assert_eq!(
            PhantomAgent::new(action_hash, false).signing_hash(),
            keccak256(&digest)
        );
    }

    #[tokio::test]
    async fn test_signature_golden() {
        let keys = PrivateKeySigner::from_slice(&key_bytes()).unwrap();
        let action_hash = B256::from_slice(
            &hex::decode("f01fa6eaca0b8cbd2afe65f8852a2e00d35eae3d19560ece9b8a28614646e849")
                .unwrap(),
        );
        let sig = PhantomAgent::new(action_hash, false).sign(&keys).await.unwrap();

        assert_eq!(
            hex::encode(sig.r().to_be_bytes::<32>()),
            "a9e728f2faea4febc0b6eb9c3dbbac04b375eb3869f051030d205318425faebc"
        );
        assert_eq!(
            hex::encode(sig.s().to_be_bytes::<32>()),
            "7b21be7030bb979352b71494708b99d789266f0d0e1242a21e74905b683e4698"
        );
        assert!(!sig.v());

        let wire = ActionSignature::from_signature(&sig);
        assert_eq!(wire.v, 27);
        assert!(wire.r.starts_with("0xa9e728f2"));
    }

    #[tokio::test]
    async fn test_sign_order_consumes_fresh_nonce_each_call() {
        let signer = signer(true);
        let order = ada_order();
        let first = signer.sign_order(&order).await.unwrap();
        let second = signer.sign_order(&order).await.unwrap();

        assert!(second.nonce() > first.nonce());
        assert_ne!(first.signed.signature, second.signed.signature);
        assert_eq!(first.signed.action, second.signed.action);
    }

    #[tokio::test]
    async fn test_signing_deterministic_for_same_nonce() {
        let signer = signer(false);
        let a = signer.sign_with_nonce(golden_action(), 42).await.unwrap();
        let b = signer.sign_with_nonce(golden_action(), 42).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_network_changes_signature() {
        let mainnet = signer(true).sign_with_nonce(golden_action(), 7).await.unwrap();
        let testnet = signer(false).sign_with_nonce(golden_action(), 7).await.unwrap();
        assert_ne!(mainnet.signature, testnet.signature);
    }

    #[tokio::test]
    async fn test_expiry_derived_from_nonce() {
        let signer = signer(true).with_expiry(Some(30_000));
        let signed = signer.sign_with_nonce(golden_action(), 1_000).await.unwrap();
        assert_eq!(signed.expires_after, Some(31_000));
    }
}
