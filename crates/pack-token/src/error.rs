/// Token issue/verify error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Signature, structure, algorithm, or payload schema rejected.
    InvalidToken,
    /// Signature valid but `now >= exp`.
    ExpiredToken,
    /// Secret unusable (too short).
    InvalidKey(String),
    /// Claim could not be encoded.
    Encode(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidToken => write!(f, "invalid token"),
            Self::ExpiredToken => write!(f, "token expired"),
            Self::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Self::Encode(msg) => write!(f, "token encoding failed: {msg}"),
        }
    }
}

impl std::error::Error for TokenError {}
