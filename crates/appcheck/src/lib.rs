//! # App Check - Firebase App Check Token Verification
//!
//! Verifies the bearer tokens issued by Firebase App Check, which assert that
//! a request comes from a genuine, registered app instance rather than from
//! a user.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │            TokenVerifier             │
//! │  - header checks (RS256, typ=JWT)    │
//! │  - signature verification            │
//! │  - exp / aud / iss / sub rules       │
//! └──────────────────┬───────────────────┘
//!                    │ lookup(kid)
//! ┌──────────────────┴───────────────────┐
//! │             KeySource                │
//! │  - JWKS fetch at construction        │
//! │  - TTL + Cache-Control refresh       │
//! │  - single refresh on unknown kid     │
//! └──────────────────────────────────────┘
//! ```
//!
//! - [`config`] - [`AppCheckConfig`] and the `typ` header policy
//! - [`jwks`] - [`KeySource`] trait, remote [`JwksKeySource`], [`StaticKeySource`]
//! - [`verifier`] - [`TokenVerifier`], the verification pipeline
//! - [`claims`] - [`VerifiedToken`]
//! - [`error`] - [`AppCheckError`] taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use appcheck::{AppCheckConfig, TokenVerifier};
//!
//! # tokio_test::block_on(async {
//! let verifier = TokenVerifier::new(AppCheckConfig::new("my-project")).await?;
//!
//! match verifier.verify_token("eyJraWQiOi...").await {
//!     Ok(token) => println!("verified app {}", token.app_id),
//!     Err(e) => println!("rejecting request: {e}"),
//! }
//! # Ok::<(), appcheck::AppCheckError>(())
//! # });
//! ```
//!
//! ## Cross-SDK Rules
//!
//! The accept/reject decisions match the other Admin SDKs:
//! - `aud` must *contain* `projects/{project_id}`; other entries are ignored
//! - `iss` is checked by prefix only; the project number suffix is not
//!   validated because the verifier only knows the project id
//! - `sub` is the app id and must be non-empty

pub mod claims;
pub mod config;
pub mod error;
pub mod jwks;
pub mod verifier;

use std::time::Duration;

#[doc(inline)]
pub use claims::VerifiedToken;
#[doc(inline)]
pub use config::{AppCheckConfig, TokenTypePolicy};
#[doc(inline)]
pub use error::{AppCheckError, ErrorKind, Result};
#[doc(inline)]
pub use jwks::{JwksKeySource, KeySource, StaticKeySource};
#[doc(inline)]
pub use verifier::TokenVerifier;

/// JWKS endpoint serving the App Check signing keys
pub const JWKS_URL: &str = "https://firebaseappcheck.googleapis.com/v1beta/jwks";

/// Issuer prefix of every App Check token
pub const APP_CHECK_ISSUER: &str = "https://firebaseappcheck.googleapis.com/";

/// Required value of the `typ` header
pub const TOKEN_TYPE: &str = "JWT";

/// The only accepted `alg` header value
pub const SIGNING_ALGORITHM: &str = "RS256";

/// Clock skew allowed on `exp`, `iat` and `nbf` unless configured otherwise
pub const DEFAULT_CLOCK_SKEW_LEEWAY: Duration = Duration::ZERO;
