//! Common test utilities for integration tests
//!
//! Shared infrastructure for minting App Check tokens with throwaway RSA
//! keys and serving them from a mock JWKS endpoint.

#![allow(dead_code)]

use appcheck::{AppCheckConfig, StaticKeySource, TokenVerifier};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const PROJECT_ID: &str = "test-project";
pub const ISSUER: &str = "https://firebaseappcheck.googleapis.com/12345678";
pub const APP_ID: &str = "app-123";

/// RSA key pair with its JWK form
pub struct TestKey {
    pub kid: String,
    pub private_pem: Vec<u8>,
    pub public_pem: Vec<u8>,
    pub jwk: serde_json::Value,
}

/// Key published in the JWKS
pub static SIGNING_KEY: Lazy<TestKey> = Lazy::new(|| TestKey::generate("signing-key-1"));

/// Key that is never published until a test rotates it in
pub static ROTATED_KEY: Lazy<TestKey> = Lazy::new(|| TestKey::generate("signing-key-2"));

impl TestKey {
    /// Generate a 2048-bit RSA key pair
    pub fn generate(kid: &str) -> Self {
        use rsa::pkcs8::LineEnding;
        use rsa::traits::PublicKeyParts;
        use rsa::{RsaPrivateKey, pkcs8::EncodePrivateKey, pkcs8::EncodePublicKey};

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key")
            .as_bytes()
            .to_vec();

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .expect("Failed to encode public key")
            .as_bytes()
            .to_vec();

        let jwk = json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        });

        Self {
            kid: kid.to_string(),
            private_pem,
            public_pem,
            jwk,
        }
    }

    /// Sign `claims` as an App Check token (RS256, typ JWT, this key's kid)
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign `claims` with a caller-built header
    pub fn sign_with_header(&self, header: &Header, claims: &serde_json::Value) -> String {
        let key = EncodingKey::from_rsa_pem(&self.private_pem).expect("Invalid RSA key");
        encode(header, claims, &key).expect("Failed to encode test JWT")
    }
}

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Valid App Check claims expiring `exp_offset_secs` from now
pub fn app_check_claims(exp_offset_secs: i64) -> serde_json::Value {
    let now = current_timestamp();
    json!({
        "iss": ISSUER,
        "sub": APP_ID,
        "aud": [format!("projects/{PROJECT_ID}"), "projects/1234567890"],
        "exp": now + exp_offset_secs,
        "iat": now - 60,
    })
}

/// Build a JWKS document
pub fn jwks(keys: &[&TestKey]) -> serde_json::Value {
    json!({ "keys": keys.iter().map(|k| k.jwk.clone()).collect::<Vec<_>>() })
}

/// Verifier over a static key set holding only [`SIGNING_KEY`]
pub fn static_verifier(config: AppCheckConfig) -> TokenVerifier {
    let keys = StaticKeySource::from_json(&jwks(&[&SIGNING_KEY]).to_string())
        .expect("Failed to build static key source");
    TokenVerifier::with_key_source(config, Arc::new(keys)).expect("Failed to build verifier")
}

/// Mock App Check JWKS endpoint
pub struct MockJwksServer {
    pub server: MockServer,
    pub jwks_url: String,
}

impl MockJwksServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let jwks_url = format!("{}/jwks", server.uri());
        Self { server, jwks_url }
    }

    /// Serve `keys` on every request
    pub async fn mock_jwks(&self, keys: &[&TestKey]) {
        self.mount(ResponseTemplate::new(200).set_body_json(jwks(keys)), None)
            .await;
    }

    /// Serve `keys` with a `Cache-Control: max-age` header, `times` times
    pub async fn mock_jwks_with_max_age(&self, keys: &[&TestKey], max_age: u64, times: Option<u64>) {
        let response = ResponseTemplate::new(200)
            .set_body_json(jwks(keys))
            .insert_header("cache-control", format!("public, max-age={max_age}").as_str());
        self.mount(response, times).await;
    }

    /// Serve `keys` for the first `times` requests only
    pub async fn mock_jwks_times(&self, keys: &[&TestKey], times: u64) {
        self.mount(
            ResponseTemplate::new(200).set_body_json(jwks(keys)),
            Some(times),
        )
        .await;
    }

    /// Respond with an error status
    pub async fn mock_status(&self, status: u16) {
        self.mount(ResponseTemplate::new(status), None).await;
    }

    /// Respond with a raw body
    pub async fn mock_body(&self, body: &str) {
        self.mount(
            ResponseTemplate::new(200).set_body_string(body.to_string()),
            None,
        )
        .await;
    }

    /// Number of JWKS requests received so far
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }

    /// Config for [`PROJECT_ID`] pointing at this server
    pub fn config(&self) -> AppCheckConfig {
        AppCheckConfig::new(PROJECT_ID).with_jwks_url(&self.jwks_url)
    }

    async fn mount(&self, response: ResponseTemplate, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(response);
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }
}

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("appcheck=debug")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp() {
        let ts = current_timestamp();
        assert!(ts > 1700000000); // After Nov 2023
    }

    #[test]
    fn test_jwk_has_rsa_components() {
        let jwk = &SIGNING_KEY.jwk;
        assert_eq!(jwk["kid"], "signing-key-1");
        assert_eq!(jwk["e"], "AQAB");
        assert!(jwk["n"].as_str().unwrap().len() > 300);
    }
}
