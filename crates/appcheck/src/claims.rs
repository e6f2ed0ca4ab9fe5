//! App Check claim decoding and the verified token type
//!
//! The payload is decoded once into [`RawClaims`], whose fields record
//! whether each claim was missing, malformed, or present. The verifier then
//! walks the claims in a fixed order and turns each gap into the matching
//! [`AppCheckError`], so no check ever indexes into untyped JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use crate::error::{AppCheckError, Result};

/// A claim decoded without failing the whole payload
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) enum Claim<T> {
    /// Absent or `null`
    #[default]
    Missing,
    /// Present but not of the expected type
    Malformed,
    /// Present with the expected type
    Present(T),
}

impl<'de, T> Deserialize<'de> for Claim<T>
where
    T: for<'a> Deserialize<'a>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Buffer into a Value first: a type mismatch must not poison the rest of the payload
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(serde_json::Value::Null) => Claim::Missing,
            Some(value) => T::deserialize(value).map_or(Claim::Malformed, Claim::Present),
        })
    }
}

/// App Check claims as found in the token payload
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub iss: Claim<String>,
    #[serde(default)]
    pub sub: Claim<String>,
    #[serde(default)]
    pub aud: Claim<Vec<String>>,
    #[serde(default)]
    pub exp: Claim<f64>,
    #[serde(default)]
    pub iat: Claim<f64>,
    #[serde(default)]
    pub nbf: Claim<f64>,
}

/// `exp` and `iat` after the time checks have passed
#[derive(Debug, Clone, Copy)]
pub(crate) struct TokenTimes {
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

impl RawClaims {
    /// Expiry and issued-at checks
    ///
    /// A token is expired once `now >= exp + leeway`. It is not yet valid
    /// while `iat` (or `nbf`, if present) is later than `now + leeway`.
    pub fn check_times(&self, now: DateTime<Utc>, leeway: Duration) -> Result<TokenTimes> {
        let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
        let now = now.timestamp();

        let exp = numeric_date(&self.exp, "exp")?;
        if now >= exp.timestamp().saturating_add(leeway) {
            return Err(AppCheckError::TokenExpired);
        }

        let iat = numeric_date(&self.iat, "iat")?;
        if iat.timestamp() > now.saturating_add(leeway) {
            return Err(AppCheckError::TokenNotYetValid("iat".to_string()));
        }

        match &self.nbf {
            Claim::Missing => {}
            Claim::Malformed => {
                return Err(AppCheckError::InvalidClaims("nbf must be a number".to_string()));
            }
            Claim::Present(_) => {
                let nbf = numeric_date(&self.nbf, "nbf")?;
                if nbf.timestamp() > now.saturating_add(leeway) {
                    return Err(AppCheckError::TokenNotYetValid("nbf".to_string()));
                }
            }
        }

        Ok(TokenTimes {
            expires_at: exp,
            issued_at: iat,
        })
    }

    /// Required-field and type checks for `aud`, `iss` and `sub`
    ///
    /// A missing `sub` is left for [`RawClaims::subject`] so it reports as
    /// an empty subject; a mistyped one is a claims error here.
    pub fn check_shape(&self) -> Result<()> {
        match self.aud {
            Claim::Present(_) => {}
            Claim::Missing => return Err(AppCheckError::InvalidClaims("aud is missing".to_string())),
            Claim::Malformed => {
                return Err(AppCheckError::InvalidClaims(
                    "aud must be an array of strings".to_string(),
                ));
            }
        }
        match self.iss {
            Claim::Present(_) => {}
            Claim::Missing => return Err(AppCheckError::InvalidClaims("iss is missing".to_string())),
            Claim::Malformed => {
                return Err(AppCheckError::InvalidClaims("iss must be a string".to_string()));
            }
        }
        if self.sub == Claim::Malformed {
            return Err(AppCheckError::InvalidClaims("sub must be a string".to_string()));
        }
        Ok(())
    }

    /// Audience membership check
    pub fn audiences(&self, expected: &str) -> Result<&[String]> {
        match &self.aud {
            Claim::Present(aud) if aud.iter().any(|a| a == expected) => Ok(aud.as_slice()),
            Claim::Present(_) => Err(AppCheckError::IncorrectAudience),
            _ => Err(AppCheckError::InvalidClaims("aud is missing".to_string())),
        }
    }

    /// Issuer prefix check
    ///
    /// Only the prefix is compared. Issuers append the project *number*,
    /// which a verifier configured with a project id cannot know.
    pub fn issuer(&self, prefix: &str) -> Result<&str> {
        match &self.iss {
            Claim::Present(iss) if iss.starts_with(prefix) => Ok(iss.as_str()),
            Claim::Present(iss) => Err(AppCheckError::IncorrectIssuer(iss.clone())),
            _ => Err(AppCheckError::InvalidClaims("iss is missing".to_string())),
        }
    }

    /// Non-empty subject check
    pub fn subject(&self) -> Result<&str> {
        match &self.sub {
            Claim::Present(sub) if !sub.trim().is_empty() => Ok(sub.as_str()),
            Claim::Malformed => Err(AppCheckError::InvalidClaims("sub must be a string".to_string())),
            _ => Err(AppCheckError::EmptySubject),
        }
    }
}

fn numeric_date(claim: &Claim<f64>, name: &str) -> Result<DateTime<Utc>> {
    match claim {
        Claim::Present(secs) if secs.is_finite() => DateTime::from_timestamp(secs.trunc() as i64, 0)
            .ok_or_else(|| AppCheckError::InvalidClaims(format!("{name} is out of range"))),
        Claim::Present(_) | Claim::Malformed => {
            Err(AppCheckError::InvalidClaims(format!("{name} must be a number")))
        }
        Claim::Missing => Err(AppCheckError::InvalidClaims(format!("{name} is missing"))),
    }
}

/// A verified App Check token
///
/// Returned by [`TokenVerifier::verify_token`](crate::TokenVerifier::verify_token)
/// once every check has passed. When serialized it uses the field names
/// shared by the other Admin SDKs (`iss`, `sub`, `aud`, `exp`, `iat`, `app_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedToken {
    /// Issuer (`iss`), the App Check service URL plus project number
    #[serde(rename = "iss")]
    pub issuer: String,

    /// Subject (`sub`), the Firebase app id
    #[serde(rename = "sub")]
    pub subject: String,

    /// Audiences (`aud`) in the order they appeared in the token
    #[serde(rename = "aud")]
    pub audiences: Vec<String>,

    /// Expiration time (`exp`)
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,

    /// Issued-at time (`iat`)
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    /// Application id; always equal to the subject for App Check tokens
    pub app_id: String,
}

impl VerifiedToken {
    /// Whether the token has expired since it was verified
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time left before the token expires, or `None` if it already has
    pub fn time_until_expiry(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }
}
