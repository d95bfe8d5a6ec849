//! Cloud KMS client against a local fake of the token and KMS endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};

use phone_vault::{
    CredentialSource, EnvelopeCipher, EnvelopeError, GcpKmsClient, KeyClientRegistry, KeyConfig,
    KeyPurpose, KmsBackend, KmsClient, KmsConfig, KmsError,
};

const KEY_PATH: &str = "projects/test/locations/global/keyRings/phones/cryptoKeys/phone";
const DISABLED_KEY_PATH: &str =
    "projects/test/locations/global/keyRings/phones/cryptoKeys/disabled";
const ACCESS_TOKEN: &str = "fake-access-token";
const TEST_PRIVATE_KEY: &str = include_str!("fixtures/test_service_account_key.pem");

#[derive(Default)]
struct FakeKms {
    reject_tokens: bool,
    token_requests: AtomicUsize,
    crypto_requests: AtomicUsize,
}

async fn token(
    State(state): State<Arc<FakeKms>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    if state.reject_tokens {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_grant"}))).into_response();
    }

    let grant_ok = form.get("grant_type").map(String::as_str)
        == Some("urn:ietf:params:oauth:grant-type:jwt-bearer");
    let assertion_ok = form
        .get("assertion")
        .map(|jwt| jwt.split('.').count() == 3)
        .unwrap_or(false);
    if !grant_ok || !assertion_ok {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request"}))).into_response();
    }

    Json(json!({
        "access_token": ACCESS_TOKEN,
        "expires_in": 3600,
        "token_type": "Bearer",
    }))
    .into_response()
}

/// "Encrypts" as key path, a zero byte, then the reversed plaintext.
async fn crypto(
    State(state): State<Arc<FakeKms>>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.crypto_requests.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Bearer {}", ACCESS_TOKEN);
    let bearer = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if bearer != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some((key_path, verb)) = rest.rsplit_once(':') else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if key_path == DISABLED_KEY_PATH {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": 400, "message": "key version is disabled"}})),
        )
            .into_response();
    }

    let mut prefix = key_path.as_bytes().to_vec();
    prefix.push(0);

    match verb {
        "encrypt" => {
            let plaintext = STANDARD
                .decode(body["plaintext"].as_str().unwrap_or_default())
                .unwrap_or_default();
            let mut ciphertext = prefix;
            ciphertext.extend(plaintext.iter().rev());
            let body = json!({"name": key_path, "ciphertext": STANDARD.encode(ciphertext)});
            Json(body).into_response()
        }
        "decrypt" => {
            let ciphertext = STANDARD
                .decode(body["ciphertext"].as_str().unwrap_or_default())
                .unwrap_or_default();
            if !ciphertext.starts_with(&prefix) {
                let body = json!({"error": {"message": "decryption failed"}});
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            let plaintext: Vec<u8> = ciphertext[prefix.len()..].iter().rev().copied().collect();
            if plaintext.is_empty() {
                // The real service omits empty fields
                Json(json!({})).into_response()
            } else {
                Json(json!({"plaintext": STANDARD.encode(plaintext)})).into_response()
            }
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_fake(reject_tokens: bool) -> (SocketAddr, Arc<FakeKms>) {
    let state = Arc::new(FakeKms {
        reject_tokens,
        ..FakeKms::default()
    });
    let app = Router::new()
        .route("/token", post(token))
        .route("/v1/{*rest}", post(crypto))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake kms");
    });
    (addr, state)
}

fn service_account_json(addr: SocketAddr) -> String {
    json!({
        "type": "service_account",
        "client_email": "phone-vault@test.iam.gserviceaccount.com",
        "private_key": TEST_PRIVATE_KEY,
        "token_uri": format!("http://{}/token", addr),
    })
    .to_string()
}

fn client(addr: SocketAddr) -> GcpKmsClient {
    GcpKmsClient::from_service_account_json(
        &service_account_json(addr),
        &format!("http://{}", addr),
        Duration::from_secs(5),
    )
    .expect("client")
}

#[tokio::test]
async fn round_trips_and_reuses_token() {
    let (addr, fake) = spawn_fake(false).await;
    let client = client(addr);

    let inputs: [&[u8]; 3] = [b"+15551234567", b"", "\u{260e} +81 3-1234-5678".as_bytes()];
    for plaintext in inputs {
        let ciphertext = client.encrypt(KEY_PATH, plaintext).await.expect("encrypt");
        assert_ne!(ciphertext, plaintext);
        let decrypted = client.decrypt(KEY_PATH, &ciphertext).await.expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    assert_eq!(fake.token_requests.load(Ordering::SeqCst), 1);
    assert_eq!(fake.crypto_requests.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn remote_errors_carry_status() {
    let (addr, _) = spawn_fake(false).await;
    let client = client(addr);

    let err = client.encrypt(DISABLED_KEY_PATH, b"x").await.expect_err("disabled key");
    match err {
        KmsError::Remote { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("disabled"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn rejected_token_is_an_auth_error() {
    let (addr, _) = spawn_fake(true).await;
    let err = client(addr).connect().await.expect_err("token rejected");
    assert!(matches!(err, KmsError::Auth(_)));
}

#[tokio::test]
async fn cipher_over_registry_round_trips() {
    let (addr, _) = spawn_fake(false).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sa_path = dir.path().join("phone-sa.json");
    std::fs::write(&sa_path, service_account_json(addr)).expect("write service account");

    let registry = KeyClientRegistry::connect(&kms_config(addr, sa_path)).await.expect("connect");
    let handle = registry.resolve(KeyPurpose::PhoneEncryption).expect("handle");
    assert_eq!(handle.client.backend(), "gcp");

    let cipher = EnvelopeCipher::new(Duration::from_secs(5));
    let encoded = cipher.encrypt(handle, b"+15551234567").await.expect("encrypt");
    assert!(STANDARD.decode(&encoded).is_ok());
    assert_eq!(cipher.decrypt(handle, &encoded).await.expect("decrypt"), b"+15551234567");
}

#[tokio::test]
async fn registry_fails_fast_when_token_endpoint_rejects() {
    let (addr, _) = spawn_fake(true).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sa_path = dir.path().join("phone-sa.json");
    std::fs::write(&sa_path, service_account_json(addr)).expect("write service account");

    let err = KeyClientRegistry::connect(&kms_config(addr, sa_path))
        .await
        .expect_err("must not start");
    assert!(matches!(err, EnvelopeError::Connection(_)));
}

fn kms_config(addr: SocketAddr, sa_path: std::path::PathBuf) -> KmsConfig {
    let mut keys = HashMap::new();
    keys.insert(
        KeyPurpose::PhoneEncryption,
        KeyConfig {
            key_path: KEY_PATH.into(),
            credential: CredentialSource::ServiceAccountFile(sa_path),
        },
    );
    KmsConfig {
        backend: KmsBackend::Gcp,
        endpoint: format!("http://{}", addr),
        timeout: Duration::from_secs(5),
        keys,
    }
}
