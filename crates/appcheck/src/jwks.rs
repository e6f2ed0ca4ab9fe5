//! App Check signing keys
//!
//! This module resolves a JWT `kid` to the RSA public key that verifies it.
//!
//! - [`JwksKeySource`] fetches the App Check JWKS once at construction and
//!   keeps it in an immutable snapshot that is swapped atomically on refresh
//! - [`StaticKeySource`] serves a fixed key set (tests, pre-fetched keys)
//!
//! # Refresh policy
//!
//! - **TTL**: a snapshot is used until `Cache-Control: max-age` (or the
//!   configured TTL) elapses, then one refresh is attempted; if it fails the
//!   stale snapshot keeps serving
//! - **Refresh on miss**: an unknown `kid` triggers at most one refresh per
//!   lookup to pick up rotated keys
//! - **Rate limiting**: refreshes are single-flight and at least
//!   `min_refresh_interval` apart

use arc_swap::ArcSwap;
use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

use crate::config::AppCheckConfig;
use crate::error::{AppCheckError, Result};

/// Source of the public keys App Check tokens are signed with
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Resolve a key id to an RS256 decoding key
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::UnknownKey`] if no key has this id, or
    /// [`AppCheckError::KeySourceUnavailable`] if the keys could not be loaded.
    async fn lookup(&self, kid: &str) -> Result<DecodingKey>;
}

/// Immutable view of one fetched key set
#[derive(Clone)]
struct KeySnapshot {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl KeySnapshot {
    fn from_jwks(jwks: &JwkSet, ttl: Duration) -> Self {
        let keys = jwks
            .keys
            .iter()
            .filter_map(|jwk| match usable_key(jwk) {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    warn!(kid = ?jwk.common.key_id, reason, "Skipping unusable JWK");
                    None
                }
            })
            .collect();

        Self {
            keys,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }

    fn get(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.get(kid).cloned()
    }

    fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for KeySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySnapshot")
            .field("key_ids", &self.key_ids())
            .field("fetched_at", &self.fetched_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Accept only RSA signing keys that carry a `kid` and are usable with RS256
fn usable_key(jwk: &Jwk) -> std::result::Result<(String, DecodingKey), &'static str> {
    let kid = jwk.common.key_id.clone().ok_or("missing kid")?;

    if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
        return Err("not an RSA key");
    }
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return Err("encryption key");
    }
    if jwk
        .common
        .key_algorithm
        .as_ref()
        .is_some_and(|alg| *alg != KeyAlgorithm::RS256)
    {
        return Err("algorithm is not RS256");
    }

    let key = DecodingKey::from_jwk(jwk).map_err(|_| "invalid RSA components")?;
    Ok((kid, key))
}

/// Outcome of a refresh attempt that did not fail
enum Refresh {
    /// A snapshot newer than the one the caller saw
    Fresh(Arc<KeySnapshot>),
    /// The last attempt was too recent; nothing was fetched
    Throttled,
}

/// JWKS-backed key source with TTL caching and refresh on unknown `kid`
///
/// # Example
///
/// ```rust,no_run
/// # use appcheck::{AppCheckConfig, JwksKeySource, KeySource};
/// # tokio_test::block_on(async {
/// let config = AppCheckConfig::new("my-project");
/// let keys = JwksKeySource::connect(&config).await?;
///
/// let key = keys.lookup("key-id-123").await?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct JwksKeySource {
    /// JWKS endpoint URL
    jwks_url: String,
    /// HTTP client
    http_client: reqwest::Client,
    /// Current key set; readers never block
    snapshot: ArcSwap<KeySnapshot>,
    /// Serializes refreshes and records when the last one started
    last_attempt: Mutex<Option<Instant>>,
    /// TTL used when the response carries no max-age
    default_ttl: Duration,
    /// Cap for max-age
    max_ttl: Duration,
    /// Minimum time between refresh attempts
    min_refresh_interval: Duration,
}

impl std::fmt::Debug for JwksKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksKeySource")
            .field("jwks_url", &self.jwks_url)
            .field("snapshot", &self.snapshot.load_full())
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish()
    }
}

impl JwksKeySource {
    /// Fetch the key set from `config.jwks_url` and build the key source
    ///
    /// The verifier must never run with an empty cache, so any failure of
    /// this first fetch fails construction.
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::InvalidConfiguration`] if the URL is not
    /// HTTPS (plain HTTP is accepted for loopback hosts only), and
    /// [`AppCheckError::KeySourceUnavailable`] if the JWKS cannot be fetched,
    /// parsed, or holds no usable RS256 key.
    pub async fn connect(config: &AppCheckConfig) -> Result<Self> {
        let url = validate_jwks_url(&config.jwks_url)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("appcheck/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                AppCheckError::InvalidConfiguration(format!("failed to create HTTP client: {e}"))
            })?;

        let source = Self {
            jwks_url: url.to_string(),
            http_client,
            snapshot: ArcSwap::from_pointee(KeySnapshot {
                keys: HashMap::new(),
                fetched_at: Instant::now(),
                ttl: Duration::ZERO,
            }),
            last_attempt: Mutex::new(None),
            default_ttl: config.cache_ttl,
            max_ttl: config.max_cache_ttl,
            min_refresh_interval: config.min_refresh_interval,
        };

        let initial = source.fetch().await?;
        source.snapshot.store(Arc::new(initial));
        *source.last_attempt.lock().await = Some(Instant::now());

        Ok(source)
    }

    /// Like [`JwksKeySource::connect`], aborting when `cancel` fires
    ///
    /// # Errors
    ///
    /// Same as [`JwksKeySource::connect`]; cancellation reports
    /// [`AppCheckError::KeySourceUnavailable`].
    pub async fn connect_with_cancel(
        config: &AppCheckConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!(jwks_url = %config.jwks_url, "JWKS fetch cancelled");
                Err(AppCheckError::KeySourceUnavailable("initial JWKS fetch cancelled".to_string()))
            }
            result = Self::connect(config) => result,
        }
    }

    /// Get the JWKS endpoint URL
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Key ids in the current snapshot, sorted
    pub fn key_ids(&self) -> Vec<String> {
        self.snapshot.load().key_ids()
    }

    /// Force a refresh, subject to the minimum refresh interval
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::KeySourceUnavailable`] if the fetch fails;
    /// the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let seen = self.snapshot.load_full();
        if let Refresh::Throttled = self.refresh_from(&seen).await? {
            warn!(jwks_url = %self.jwks_url, "JWKS refresh rate limited, using cache");
        }
        Ok(())
    }

    /// Refresh unless another task already replaced `seen` or the last
    /// attempt was too recent
    async fn refresh_from(&self, seen: &Arc<KeySnapshot>) -> Result<Refresh> {
        let mut last_attempt = self.last_attempt.lock().await;

        let current = self.snapshot.load_full();
        if !Arc::ptr_eq(&current, seen) {
            debug!(jwks_url = %self.jwks_url, "JWKS refreshed concurrently, reusing");
            return Ok(Refresh::Fresh(current));
        }

        if let Some(last) = *last_attempt
            && last.elapsed() < self.min_refresh_interval
        {
            return Ok(Refresh::Throttled);
        }
        *last_attempt = Some(Instant::now());

        let fresh = Arc::new(self.fetch().await?);
        self.snapshot.store(Arc::clone(&fresh));
        Ok(Refresh::Fresh(fresh))
    }

    /// Fetch and parse the JWKS document
    async fn fetch(&self) -> Result<KeySnapshot> {
        info!(jwks_url = %self.jwks_url, "Fetching JWKS from endpoint");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_url = %self.jwks_url, error = %e, "Failed to fetch JWKS");
                AppCheckError::KeySourceUnavailable(format!("JWKS fetch failed: {e}"))
            })?;

        if !response.status().is_success() {
            error!(
                jwks_url = %self.jwks_url,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(AppCheckError::KeySourceUnavailable(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let ttl = max_age(response.headers())
            .map_or(self.default_ttl, |ttl| ttl.min(self.max_ttl));

        let jwks: JwkSet = response.json().await.map_err(|e| {
            error!(jwks_url = %self.jwks_url, error = %e, "Failed to parse JWKS JSON");
            AppCheckError::KeySourceUnavailable(format!("invalid JWKS format: {e}"))
        })?;

        let snapshot = KeySnapshot::from_jwks(&jwks, ttl);
        if snapshot.keys.is_empty() {
            return Err(AppCheckError::KeySourceUnavailable(
                "JWKS contains no usable RS256 signing keys".to_string(),
            ));
        }

        info!(
            jwks_url = %self.jwks_url,
            key_count = snapshot.keys.len(),
            ttl_secs = ttl.as_secs(),
            "Successfully fetched JWKS"
        );

        Ok(snapshot)
    }
}

#[async_trait]
impl KeySource for JwksKeySource {
    async fn lookup(&self, kid: &str) -> Result<DecodingKey> {
        let mut snapshot = self.snapshot.load_full();
        let mut refreshed = false;

        if snapshot.is_stale() {
            match self.refresh_from(&snapshot).await {
                Ok(Refresh::Fresh(fresh)) => {
                    snapshot = fresh;
                    refreshed = true;
                }
                Ok(Refresh::Throttled) => {}
                Err(e) => {
                    warn!(jwks_url = %self.jwks_url, error = %e, "JWKS refresh failed, serving stale keys");
                    refreshed = true;
                }
            }
        }

        if let Some(key) = snapshot.get(kid) {
            return Ok(key);
        }

        if refreshed {
            debug!(kid, "Key ID not found in refreshed JWKS");
            return Err(AppCheckError::UnknownKey(kid.to_string()));
        }

        // The key may have been rotated in since the last fetch
        match self.refresh_from(&snapshot).await? {
            Refresh::Fresh(fresh) => fresh.get(kid).ok_or_else(|| {
                debug!(kid, "Key ID not found in JWKS after refresh");
                AppCheckError::UnknownKey(kid.to_string())
            }),
            Refresh::Throttled => {
                warn!(kid, "Key ID not found, JWKS refresh rate limited");
                Err(AppCheckError::UnknownKey(kid.to_string()))
            }
        }
    }
}

/// Key source over a fixed JWKS document
#[derive(Debug, Clone)]
pub struct StaticKeySource {
    snapshot: Arc<KeySnapshot>,
}

impl StaticKeySource {
    /// Build from a parsed key set
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::KeySourceUnavailable`] if no key in the set
    /// is a usable RS256 signing key.
    pub fn from_jwks(jwks: &JwkSet) -> Result<Self> {
        let snapshot = KeySnapshot::from_jwks(jwks, Duration::MAX);
        if snapshot.keys.is_empty() {
            return Err(AppCheckError::KeySourceUnavailable(
                "JWKS contains no usable RS256 signing keys".to_string(),
            ));
        }
        Ok(Self {
            snapshot: Arc::new(snapshot),
        })
    }

    /// Build from a JWKS JSON document
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::KeySourceUnavailable`] if the document does
    /// not parse or holds no usable key.
    pub fn from_json(json: &str) -> Result<Self> {
        let jwks: JwkSet = serde_json::from_str(json)
            .map_err(|e| AppCheckError::KeySourceUnavailable(format!("invalid JWKS format: {e}")))?;
        Self::from_jwks(&jwks)
    }

    /// Key ids in this set, sorted
    pub fn key_ids(&self) -> Vec<String> {
        self.snapshot.key_ids()
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn lookup(&self, kid: &str) -> Result<DecodingKey> {
        self.snapshot
            .get(kid)
            .ok_or_else(|| AppCheckError::UnknownKey(kid.to_string()))
    }
}

/// HTTPS is required; plain HTTP only for loopback (local emulators, tests)
fn validate_jwks_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| AppCheckError::InvalidConfiguration(format!("invalid JWKS URL: {e}")))?;

    let loopback = match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };

    match url.scheme() {
        "https" => Ok(url),
        "http" if loopback => Ok(url),
        _ => Err(AppCheckError::InvalidConfiguration(
            "JWKS endpoint must use HTTPS (HTTP only allowed for localhost)".to_string(),
        )),
    }
}

/// `max-age` directive of a `Cache-Control` header
fn max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;

    value.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|secs| secs.parse::<u64>().ok())
            .map(Duration::from_secs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};
    use serde_json::json;

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": "xGOr-H7A-PWq5VsjlKtmQk7aVvB_NPbK",
            "e": "AQAB"
        })
    }

    fn jwks(keys: Vec<serde_json::Value>) -> JwkSet {
        serde_json::from_value(json!({ "keys": keys })).unwrap()
    }

    #[test]
    fn test_snapshot_keeps_rs256_signing_keys() {
        let mut enc = rsa_jwk("enc-key");
        enc["use"] = json!("enc");
        let mut ps = rsa_jwk("ps-key");
        ps["alg"] = json!("PS256");
        let mut no_kid = rsa_jwk("x");
        no_kid.as_object_mut().unwrap().remove("kid");
        let ec = json!({
            "kty": "EC",
            "kid": "ec-key",
            "crv": "P-256",
            "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
            "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
        });

        let set = jwks(vec![rsa_jwk("good"), enc, ps, no_kid, ec]);
        let snapshot = KeySnapshot::from_jwks(&set, Duration::from_secs(60));

        assert_eq!(snapshot.key_ids(), vec!["good".to_string()]);
        assert!(!snapshot.is_stale());
    }

    #[test]
    fn test_snapshot_staleness() {
        let snapshot = KeySnapshot {
            keys: HashMap::new(),
            fetched_at: Instant::now(),
            ttl: Duration::ZERO,
        };
        assert!(snapshot.is_stale());
    }

    #[test]
    fn test_max_age_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(max_age(&headers), None);

        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=19842, must-revalidate, no-transform"),
        );
        assert_eq!(max_age(&headers), Some(Duration::from_secs(19842)));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert_eq!(max_age(&headers), None);
    }

    #[test]
    fn test_jwks_url_validation() {
        assert!(validate_jwks_url("https://firebaseappcheck.googleapis.com/v1/jwks").is_ok());
        assert!(validate_jwks_url("http://127.0.0.1:8080/jwks").is_ok());
        assert!(validate_jwks_url("http://localhost/jwks").is_ok());
        assert!(validate_jwks_url("http://[::1]:9000/jwks").is_ok());

        for bad in ["http://keys.example.com/jwks", "ftp://localhost/jwks", "not a url"] {
            assert!(
                matches!(
                    validate_jwks_url(bad),
                    Err(AppCheckError::InvalidConfiguration(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_static_source_lookup() {
        let source = StaticKeySource::from_jwks(&jwks(vec![rsa_jwk("a"), rsa_jwk("b")])).unwrap();

        assert_eq!(source.key_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(source.lookup("a").await.is_ok());
        assert!(matches!(
            source.lookup("c").await,
            Err(AppCheckError::UnknownKey(kid)) if kid == "c"
        ));
    }

    #[test]
    fn test_static_source_rejects_empty_set() {
        assert!(matches!(
            StaticKeySource::from_json(r#"{"keys": []}"#),
            Err(AppCheckError::KeySourceUnavailable(_))
        ));
        assert!(matches!(
            StaticKeySource::from_json("not json"),
            Err(AppCheckError::KeySourceUnavailable(_))
        ));
    }
}
