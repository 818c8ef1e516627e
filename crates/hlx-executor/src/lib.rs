//! Order normalization, signing and submission for Hyperliquid perps.
//!
//! # Key Components
//!
//! - [`OrderPipeline`]: intent → normalized order → signed action → exchange
//! - [`SizeAndPriceNormalizer`]: tick, size-precision, minimum-size and
//!   deviation-band rules
//! - [`MarginValidator`]: buffered margin check against a fresh account read
//! - [`LeverageCoordinator`]: per-asset leverage confirmed once per cycle
//! - [`OrderSigner`]: L1 action hashing and EIP-712 phantom-agent signatures
//! - [`NonceManager`]: strictly increasing millisecond nonces
//! - [`SubmissionExecutor`]: classification and bounded retries
//!
//! # Checks before every attempt (in `OrderPipeline`)
//!
//! 1. Account read fails -> `AccountUnavailable` (retryable per policy)
//! 2. Buffered margin short -> `InsufficientMargin`
//! 3. Leverage not confirmed this cycle -> `updateLeverage`, failure -> `LeverageSetup`
//! 4. (all passed) -> sign with a fresh nonce and post

pub mod error;
pub mod leverage;
pub mod margin;
pub mod market_data;
pub mod nonce;
pub mod normalizer;
pub mod pipeline;
pub mod ports;
pub mod sender;
pub mod signer;
pub mod submission;

pub use error::{ExecutorError, ExecutorResult, ValidationError};

pub use leverage::{ExchangeLeverageGateway, LeverageCoordinator, LeverageGateway, LeverageState};
pub use margin::{AccountUnavailablePolicy, MarginConfig, MarginValidator};
pub use normalizer::{NormalizerConfig, SizeAndPriceNormalizer};

pub use market_data::InfoMarketData;
pub use ports::{
    AccountStateSource, ReferencePriceSource, SourceError, StaticAccountSource, StaticPriceSource,
};

pub use nonce::{Clock, FixedClock, NonceError, NonceManager, SystemClock};

pub use signer::{
    Action, ActionSignature, KeyError, KeyManager, KeySource, LimitOrderType, OrderAction,
    OrderSigner, OrderTypeWire, OrderWire, PhantomAgent, SignedAction, SignedOrder, SignerError,
    SigningInput, UpdateLeverageAction,
};

pub use sender::{
    BoxFuture, DryRunSender, DynExchangeSender, ExchangeRequest, ExchangeResponse, ExchangeSender,
    HttpExchangeSender, MockExchangeSender, OrderStatus, TransportError,
};

pub use submission::{
    classify, FillInfo, NoChecks, PreSubmitCheck, RejectReason, RetryPolicy, SubmissionExecutor,
    SubmissionReport, SubmissionResult, SubmissionState, TransientCause,
};

pub use pipeline::{IntentOutcome, OrderPipeline, PipelineConfig};
