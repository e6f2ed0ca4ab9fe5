//! App Check token verification
//!
//! [`TokenVerifier::verify_token`] runs a fixed, fail-fast pipeline:
//!
//! 1. Structural parse of the compact JWS (three base64url segments)
//! 2. Header checks: `alg` must be RS256, `typ` must be `JWT`
//! 3. Key resolution by `kid` through the [`KeySource`]
//! 4. RS256 signature verification
//! 5. `exp` / `iat` / `nbf` checks
//! 6. Claim shape checks (`aud`, `iss`, `sub` present and typed)
//! 7. Audience must contain `projects/{project_id}`
//! 8. Issuer must start with the App Check issuer URL
//! 9. Subject must be non-empty
//!
//! Each stage either passes or returns its own [`AppCheckError`] variant.
//!
//! # Algorithm confusion
//!
//! The `alg` header is compared as a raw string before any key is touched,
//! so `none`, `HS256` signed with the public key as an HMAC secret, or any
//! other substitution is rejected before signature verification runs.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, TokenData, Validation, decode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::claims::{Claim, RawClaims, VerifiedToken};
use crate::config::{AppCheckConfig, TokenTypePolicy};
use crate::error::{AppCheckError, Result};
use crate::jwks::{JwksKeySource, KeySource};
use crate::{APP_CHECK_ISSUER, SIGNING_ALGORITHM, TOKEN_TYPE};

/// JOSE header fields the verifier looks at
#[derive(Debug, Default, Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Claim<String>,
    #[serde(default)]
    typ: Claim<String>,
    #[serde(default)]
    kid: Claim<String>,
}

/// Verifier for Firebase App Check tokens
///
/// Cheap to share: wrap it in an [`Arc`] and call
/// [`verify_token`](TokenVerifier::verify_token) from any number of tasks.
///
/// # Example
///
/// ```rust,no_run
/// # use appcheck::{AppCheckConfig, TokenVerifier};
/// # tokio_test::block_on(async {
/// let verifier = TokenVerifier::new(AppCheckConfig::new("my-project")).await?;
///
/// let token = "eyJraWQiOiJ...";
/// let verified = verifier.verify_token(token).await?;
/// println!("request from app {}", verified.app_id);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct TokenVerifier {
    /// Project id audiences are checked against
    project_id: String,
    /// `projects/{project_id}`
    expected_audience: String,
    /// Signing key lookup
    key_source: Arc<dyn KeySource>,
    /// Tolerance for time-based claims
    clock_skew_leeway: Duration,
    /// `typ` header policy
    token_type_policy: TokenTypePolicy,
    /// Longest token accepted for parsing
    max_token_length: usize,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("project_id", &self.project_id)
            .field("clock_skew_leeway", &self.clock_skew_leeway)
            .field("token_type_policy", &self.token_type_policy)
            .field("max_token_length", &self.max_token_length)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a verifier backed by the JWKS endpoint in `config`
    ///
    /// The key set is fetched before this returns; a verifier is never
    /// usable with an empty key cache.
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::InvalidConfiguration`] for an empty project
    /// id or a non-HTTPS JWKS URL, and [`AppCheckError::KeySourceUnavailable`]
    /// if the initial JWKS fetch fails.
    pub async fn new(config: AppCheckConfig) -> Result<Self> {
        config.validate()?;
        let key_source = JwksKeySource::connect(&config).await?;
        Self::with_key_source(config, Arc::new(key_source))
    }

    /// Create a verifier using an existing key source
    ///
    /// Use this to share one [`JwksKeySource`] between verifiers or to test
    /// against a [`StaticKeySource`](crate::StaticKeySource).
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::InvalidConfiguration`] for an empty project id.
    pub fn with_key_source(config: AppCheckConfig, key_source: Arc<dyn KeySource>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            expected_audience: config.expected_audience(),
            project_id: config.project_id,
            key_source,
            clock_skew_leeway: config.clock_skew_leeway,
            token_type_policy: config.token_type_policy,
            max_token_length: config.max_token_length,
        })
    }

    /// The project id tokens must be issued for
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Verify an App Check token
    ///
    /// # Errors
    ///
    /// Returns the [`AppCheckError`] of the first check that fails. Any error
    /// means the request should be rejected.
    pub async fn verify_token(&self, token: &str) -> Result<VerifiedToken> {
        match self.verify_at(token, Utc::now()).await {
            Ok(verified) => {
                debug!(
                    project_id = %self.project_id,
                    app_id = %verified.app_id,
                    "App Check token verified"
                );
                Ok(verified)
            }
            Err(e) => {
                debug!(
                    project_id = %self.project_id,
                    kind = ?e.kind(),
                    error = %e,
                    "App Check token rejected"
                );
                Err(e)
            }
        }
    }

    async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken> {
        let header = self.parse_header(token)?;

        self.check_header(&header)?;

        let kid = match header.kid {
            Claim::Present(kid) => kid,
            _ => {
                return Err(AppCheckError::UnknownKey(
                    "token header has no kid".to_string(),
                ));
            }
        };
        let key = self.key_source.lookup(&kid).await?;

        // Only the signature is checked here; claim rules below are stricter
        // than (and ordered differently from) the library's built-in ones
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let TokenData { claims, .. }: TokenData<RawClaims> = decode(token, &key, &validation)?;

        let times = claims.check_times(now, self.clock_skew_leeway)?;
        claims.check_shape()?;
        let audiences = claims.audiences(&self.expected_audience)?;
        let issuer = claims.issuer(APP_CHECK_ISSUER)?;
        let subject = claims.subject()?;

        Ok(VerifiedToken {
            issuer: issuer.to_string(),
            subject: subject.to_string(),
            audiences: audiences.to_vec(),
            expires_at: times.expires_at,
            issued_at: times.issued_at,
            app_id: subject.to_string(),
        })
    }

    /// Split the compact form and decode the header
    fn parse_header(&self, token: &str) -> Result<RawHeader> {
        if token.len() > self.max_token_length {
            return Err(AppCheckError::MalformedToken(format!(
                "token exceeds {} bytes",
                self.max_token_length
            )));
        }

        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AppCheckError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ));
        };

        // An empty signature is structurally valid (`alg: none` tokens carry one)
        // and is rejected by the header or signature checks instead
        for (name, segment) in [("header", header), ("payload", payload)] {
            if segment.is_empty() {
                return Err(AppCheckError::MalformedToken(format!("empty {name} segment")));
            }
        }

        let header_bytes = decode_segment("header", header)?;
        decode_segment("payload", payload)?;
        decode_segment("signature", signature)?;

        serde_json::from_slice(&header_bytes)
            .map_err(|e| AppCheckError::MalformedToken(format!("invalid header JSON: {e}")))
    }

    fn check_header(&self, header: &RawHeader) -> Result<()> {
        match &header.alg {
            Claim::Present(alg) if alg == SIGNING_ALGORITHM => {}
            Claim::Present(alg) => return Err(AppCheckError::IncorrectAlgorithm(alg.clone())),
            Claim::Missing => return Err(AppCheckError::IncorrectAlgorithm("missing".to_string())),
            Claim::Malformed => {
                return Err(AppCheckError::IncorrectAlgorithm("not a string".to_string()));
            }
        }

        match (&header.typ, self.token_type_policy) {
            (Claim::Present(typ), _) if typ == TOKEN_TYPE => Ok(()),
            (Claim::Missing, TokenTypePolicy::AllowMissing) => Ok(()),
            (Claim::Present(typ), _) => Err(AppCheckError::IncorrectTokenType(typ.clone())),
            (Claim::Missing, TokenTypePolicy::Required) => {
                Err(AppCheckError::IncorrectTokenType("missing".to_string()))
            }
            (Claim::Malformed, _) => Err(AppCheckError::IncorrectTokenType("not a string".to_string())),
        }
    }
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AppCheckError::MalformedToken(format!("invalid {name} encoding: {e}")))
}
