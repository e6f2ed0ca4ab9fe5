//! App Check verification errors
//!
//! Every rejection surfaces as a distinct [`AppCheckError`] variant so that
//! callers can log *why* a token was refused. Callers should still treat any
//! error as "reject the request"; the kinds exist for observability, not for
//! differentiated recovery.

use thiserror::Error;

/// Result type for App Check operations
pub type Result<T> = std::result::Result<T, AppCheckError>;

/// App Check verification errors
#[derive(Debug, Clone, Error)]
pub enum AppCheckError {
    /// The token is not a well-formed compact JWS
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The `alg` header is not RS256
    #[error("token has incorrect algorithm: {0}")]
    IncorrectAlgorithm(String),

    /// The `typ` header is present (or required) and is not `JWT`
    #[error("token has incorrect type: {0}")]
    IncorrectTokenType(String),

    /// No signing key is known for the token's `kid`
    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    /// The signature does not verify against the resolved key
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The token's `exp` is at or before the current time
    #[error("token has expired")]
    TokenExpired,

    /// The token's `iat` or `nbf` lies in the future
    #[error("token is not yet valid: {0}")]
    TokenNotYetValid(String),

    /// A required claim is missing or has the wrong type
    #[error("token has incorrect claims: {0}")]
    InvalidClaims(String),

    /// The configured project is not listed in `aud`
    #[error("token has incorrect audience")]
    IncorrectAudience,

    /// `iss` is not issued by the App Check service
    #[error("token has incorrect issuer: {0}")]
    IncorrectIssuer(String),

    /// `sub` is missing, empty, or whitespace
    #[error("token has empty or missing subject")]
    EmptySubject,

    /// The JWKS document could not be fetched or parsed
    #[error("signing keys unavailable: {0}")]
    KeySourceUnavailable(String),

    /// The verifier was constructed with unusable settings
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Fieldless discriminant of [`AppCheckError`]
///
/// Useful for matching and metrics labels where the detail text is noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`AppCheckError::MalformedToken`]
    MalformedToken,
    /// See [`AppCheckError::IncorrectAlgorithm`]
    IncorrectAlgorithm,
    /// See [`AppCheckError::IncorrectTokenType`]
    IncorrectTokenType,
    /// See [`AppCheckError::UnknownKey`]
    UnknownKey,
    /// See [`AppCheckError::InvalidSignature`]
    InvalidSignature,
    /// See [`AppCheckError::TokenExpired`]
    TokenExpired,
    /// See [`AppCheckError::TokenNotYetValid`]
    TokenNotYetValid,
    /// See [`AppCheckError::InvalidClaims`]
    InvalidClaims,
    /// See [`AppCheckError::IncorrectAudience`]
    IncorrectAudience,
    /// See [`AppCheckError::IncorrectIssuer`]
    IncorrectIssuer,
    /// See [`AppCheckError::EmptySubject`]
    EmptySubject,
    /// See [`AppCheckError::KeySourceUnavailable`]
    KeySourceUnavailable,
    /// See [`AppCheckError::InvalidConfiguration`]
    InvalidConfiguration,
}

impl AppCheckError {
    /// The kind of this error, without detail text
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedToken(_) => ErrorKind::MalformedToken,
            Self::IncorrectAlgorithm(_) => ErrorKind::IncorrectAlgorithm,
            Self::IncorrectTokenType(_) => ErrorKind::IncorrectTokenType,
            Self::UnknownKey(_) => ErrorKind::UnknownKey,
            Self::InvalidSignature => ErrorKind::InvalidSignature,
            Self::TokenExpired => ErrorKind::TokenExpired,
            Self::TokenNotYetValid(_) => ErrorKind::TokenNotYetValid,
            Self::InvalidClaims(_) => ErrorKind::InvalidClaims,
            Self::IncorrectAudience => ErrorKind::IncorrectAudience,
            Self::IncorrectIssuer(_) => ErrorKind::IncorrectIssuer,
            Self::EmptySubject => ErrorKind::EmptySubject,
            Self::KeySourceUnavailable(_) => ErrorKind::KeySourceUnavailable,
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
        }
    }

    /// Whether the failure came from the key source rather than the token
    ///
    /// A token rejected for this reason may well be valid; the verifier just
    /// could not obtain keys to prove it.
    pub fn is_key_source_failure(&self) -> bool {
        matches!(self, Self::KeySourceUnavailable(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AppCheckError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtKind;

        match err.kind() {
            JwtKind::InvalidSignature => Self::InvalidSignature,
            JwtKind::ExpiredSignature => Self::TokenExpired,
            JwtKind::ImmatureSignature => Self::TokenNotYetValid("nbf".to_string()),
            JwtKind::Base64(_) | JwtKind::InvalidToken => Self::MalformedToken(err.to_string()),
            JwtKind::Json(_) | JwtKind::Utf8(_) => Self::InvalidClaims(err.to_string()),
            JwtKind::InvalidAlgorithm | JwtKind::InvalidAlgorithmName => {
                Self::IncorrectAlgorithm(err.to_string())
            }
            // Any key or crypto backend failure means the signature could not be proven
            _ => Self::InvalidSignature,
        }
    }
}
