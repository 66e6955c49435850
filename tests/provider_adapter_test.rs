use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use idgate::errors::ProviderError;
use idgate::oauth::{build_provider, ProviderAdapter};
use idgate::settings::ProviderSettings;
use idgate::testing::TestFixtures;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLIENT_ID: &str = "gateway-client-id";
const KEY_ID: &str = "provider-key-1";

fn provider_settings(name: &str, server: &MockServer) -> ProviderSettings {
    ProviderSettings {
        name: name.to_string(),
        client_id: Some(CLIENT_ID.to_string()),
        client_secret: Some("gateway-client-secret".to_string()),
        client_id_env: Some("IDGATE_TEST_UNSET_CLIENT_ID".to_string()),
        client_secret_env: Some("IDGATE_TEST_UNSET_CLIENT_SECRET".to_string()),
        token_endpoint: Some(format!("{}/token", server.uri())),
        userinfo_endpoint: Some(format!("{}/userinfo", server.uri())),
        jwks_uri: Some(format!("{}/jwks", server.uri())),
        ..Default::default()
    }
}

fn adapter(name: &str, server: &MockServer, cache: Duration) -> Arc<dyn ProviderAdapter> {
    build_provider(
        &provider_settings(name, server),
        "https://gateway.test/callback".to_string(),
        reqwest::Client::new(),
        cache,
    )
    .unwrap()
}

fn provider_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(&TestFixtures::read_fixture("other-privatekey")).unwrap()
}

fn jwks() -> serde_json::Value {
    let public = provider_key().to_public_key();
    json!({
        "keys": [{
            "kty": "RSA",
            "kid": KEY_ID,
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }]
    })
}

fn id_token(kid: &str, claims: &serde_json::Value) -> String {
    let header = json!({"alg": "RS256", "typ": "JWT", "kid": kid});
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let signature = SigningKey::<Sha256>::new(provider_key()).sign(signing_input.as_bytes());
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_vec()))
}

fn google_claims(sub: &str) -> serde_json::Value {
    json!({
        "sub": sub,
        "iss": "https://accounts.google.com",
        "aud": CLIENT_ID,
        "exp": chrono::Utc::now().timestamp() + 600,
        "name": "Grace",
        "email": "grace@example.com",
        "email_verified": true,
    })
}

#[tokio::test]
async fn test_google_code_exchange_and_identity_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "at-1", "token_type": "Bearer"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "g-100",
            "name": "Grace",
            "email": "grace@example.com",
            "verified_email": false,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let google = adapter("google", &server, Duration::ZERO);
    let access_token = google.exchange_code("the-code").await.unwrap();
    assert_eq!(access_token, "at-1");

    let identity = google.fetch_identity(&access_token).await.unwrap();
    assert_eq!(identity.provider, "google");
    assert_eq!(identity.provider_user_id, "g-100");
    assert_eq!(identity.display_name, "Grace");
    assert_eq!(identity.email(), None);
}

#[tokio::test]
async fn test_microsoft_verified_email_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "ms-7",
            "email": "m@example.com",
            "email_verified": true,
        })))
        .mount(&server)
        .await;

    let microsoft = adapter("microsoft", &server, Duration::ZERO);
    let identity = microsoft.fetch_identity("at").await.unwrap();
    assert_eq!(identity.provider_user_id, "ms-7");
    assert_eq!(identity.display_name, "ms-7");
    assert_eq!(identity.email(), Some("m@example.com"));
}

#[tokio::test]
async fn test_code_exchange_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .mount(&server)
        .await;

    let google = adapter("google", &server, Duration::ZERO);
    let err = google.exchange_code("reused-code").await.unwrap_err();
    match err {
        ProviderError::CodeExchange(reason) => assert!(reason.contains("invalid_grant")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_identity_fetch_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let google = adapter("google", &server, Duration::ZERO);
    assert!(matches!(
        google.fetch_identity("expired").await,
        Err(ProviderError::IdentityFetch(_))
    ));
}

#[tokio::test]
async fn test_bearer_token_verified_against_jwks_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
        .expect(1)
        .mount(&server)
        .await;

    let google = adapter("google", &server, Duration::from_secs(3600));
    let token = id_token(KEY_ID, &google_claims("g-1"));

    let identity = google.verify_bearer_token(&token).await.unwrap();
    assert_eq!(identity.provider_user_id, "g-1");
    assert_eq!(identity.email(), Some("grace@example.com"));

    // Served from cache
    assert!(google.verify_bearer_token(&token).await.is_ok());
}

#[tokio::test]
async fn test_unknown_kid_forces_one_refetch_per_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
        .expect(2)
        .mount(&server)
        .await;

    let google = adapter("google", &server, Duration::from_secs(3600));
    assert!(google
        .verify_bearer_token(&id_token(KEY_ID, &google_claims("g-1")))
        .await
        .is_ok());

    let err = google
        .verify_bearer_token(&id_token("rotated-key", &google_claims("g-1")))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::TokenVerification(_)));

    // Further unknown kids inside the interval are answered from the cache
    for kid in ["rotated-key-2", "rotated-key-3"] {
        let err = google
            .verify_bearer_token(&id_token(kid, &google_claims("g-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::TokenVerification(_)));
    }
    assert!(google
        .verify_bearer_token(&id_token(KEY_ID, &google_claims("g-1")))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_bearer_token_claim_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
        .mount(&server)
        .await;
    let google = adapter("google", &server, Duration::ZERO);

    let mut wrong_audience = google_claims("g-1");
    wrong_audience["aud"] = json!("someone-else");
    assert!(google
        .verify_bearer_token(&id_token(KEY_ID, &wrong_audience))
        .await
        .is_err());

    let mut expired = google_claims("g-1");
    expired["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
    assert!(google
        .verify_bearer_token(&id_token(KEY_ID, &expired))
        .await
        .is_err());

    let mut wrong_issuer = google_claims("g-1");
    wrong_issuer["iss"] = json!("https://evil.example.com");
    assert!(google
        .verify_bearer_token(&id_token(KEY_ID, &wrong_issuer))
        .await
        .is_err());

    let token = id_token(KEY_ID, &google_claims("g-1"));
    let (signed, _) = token.rsplit_once('.').unwrap();
    let tampered = format!("{signed}.{}", URL_SAFE_NO_PAD.encode([0u8; 256]));
    assert!(google.verify_bearer_token(&tampered).await.is_err());
}

#[tokio::test]
async fn test_jwks_unavailable_fails_verification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let microsoft = adapter("microsoft", &server, Duration::ZERO);
    let mut claims = google_claims("ms-1");
    claims["iss"] = json!("https://login.microsoftonline.com/tenant/v2.0");
    assert!(matches!(
        microsoft.verify_bearer_token(&id_token(KEY_ID, &claims)).await,
        Err(ProviderError::TokenVerification(_))
    ));
}
