//! HttpExchangeSender against a local HTTP server.

use std::sync::Arc;
use std::time::Duration;

use hlx_core::{AssetId, ClientOrderId, NormalizedOrder, OrderSide, Price, Size, TimeInForce};
use hlx_executor::{
    classify, ExchangeRequest, ExchangeResponse, ExchangeSender, FillInfo, FixedClock, HttpExchangeSender,
    KeyManager, NonceManager, OrderSigner, OrderStatus, SubmissionResult, TransportError,
};
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

async fn signed_request() -> ExchangeRequest {
    let keys = Arc::new(KeyManager::from_bytes(&hex::decode(TEST_PRIVATE_KEY).unwrap(), None).unwrap());
    let nonces = Arc::new(NonceManager::new(Arc::new(FixedClock::new(1_769_339_470_576))));
    let signer = OrderSigner::new(keys, nonces, false);
    let order = NormalizedOrder {
        coin: "ADA".to_string(),
        asset: AssetId::new(65),
        side: OrderSide::Buy,
        size: Size::new(dec!(16)),
        price: Price::new(dec!(0.656)),
        leverage: 5,
        required_margin: dec!(2.0992),
        reduce_only: false,
        tif: TimeInForce::GoodTilCancelled,
        cloid: ClientOrderId::new(),
    };
    let signed = signer.sign_order(&order).await.unwrap();
    ExchangeRequest::from_signed(&signed.signed)
}

fn sender(server: &MockServer, timeout: Duration) -> HttpExchangeSender {
    HttpExchangeSender::new(format!("{}/exchange", server.uri()), timeout).unwrap()
}

#[tokio::test]
async fn posts_canonical_body_and_parses_resting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exchange"))
        .and(body_partial_json(json!({
            "action": {"type": "order", "grouping": "na",
                       "orders": [{"a": 65, "b": true, "p": "0.656", "s": "16", "r": false,
                                   "t": {"limit": {"tif": "Gtc"}}}]},
            "vaultAddress": null
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "response": {"type": "order", "data": {"statuses": [{"resting": {"oid": 4242}}]}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = sender(&server, Duration::from_secs(2))
        .post(signed_request().await)
        .await
        .unwrap();
    assert_eq!(response.statuses(), vec![OrderStatus::Resting { oid: 4242 }]);
}

#[tokio::test]
async fn exchange_err_body_is_a_response_not_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "err",
            "response": "User or API Wallet 0x0 does not exist."
        })))
        .mount(&server)
        .await;

    let response = sender(&server, Duration::from_secs(2))
        .post(signed_request().await)
        .await
        .unwrap();
    assert_eq!(
        response,
        ExchangeResponse::err("User or API Wallet 0x0 does not exist.")
    );
    assert!(matches!(classify(Ok(response), false), SubmissionResult::Rejected(_)));
}

#[tokio::test]
async fn status_codes_map_to_transport_errors() {
    for (status, transient) in [(429u16, true), (502, true), (400, false)] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = sender(&server, Duration::from_secs(2))
            .post(signed_request().await)
            .await
            .unwrap_err();
        assert_eq!(err.is_transient(), transient, "status {status}: {err:?}");
        if status == 429 {
            assert_eq!(err, TransportError::RateLimited("nope".to_string()));
        }
    }
}

#[tokio::test]
async fn garbage_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = sender(&server, Duration::from_secs(2))
        .post(signed_request().await)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));
    assert!(err.is_ambiguous());
}

#[tokio::test]
async fn slow_exchange_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({"status": "ok", "response": {"type": "default"}})),
        )
        .mount(&server)
        .await;

    let err = sender(&server, Duration::from_millis(50))
        .post(signed_request().await)
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    assert!(err.is_transient());
}

/// One-shot server that answers 200 with a body shorter than its
/// content-length, then hangs up.
async fn truncating_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 512\r\n\r\n{\"status\":\"ok\",")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });
    format!("http://{addr}/exchange")
}

#[tokio::test]
async fn truncated_body_is_ambiguous() {
    let url = truncating_server().await;
    let err = HttpExchangeSender::new(url, Duration::from_secs(2))
        .unwrap()
        .post(signed_request().await)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ResponseLost { status: 200, .. }), "{err:?}");
    assert!(err.is_ambiguous());
    assert!(err.is_transient());
    assert_eq!(err.label(), "response_lost");

    // A retry answered with a duplicate cloid counts as the first attempt landing.
    let retry = classify(
        Ok(ExchangeResponse::order_error("Duplicate cloid: order already exists")),
        err.is_ambiguous(),
    );
    assert!(matches!(
        retry,
        SubmissionResult::Accepted(FillInfo::DuplicateOfEarlierAttempt { .. })
    ));
}
