/// Typed errors for the two external collaborators.
///
/// Both are terminal for the triggering action: a verifier failure closes
/// the handshake, an oracle failure denies the requested operation. Neither
/// is retried.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("malformed token")]
    MalformedToken,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedToken => "malformed_token",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Failure talking to the permission oracle's backing store.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AccessError {
    #[error("permission store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_kinds() {
        assert_eq!(AuthError::MissingCredential.error_kind(), "missing_credential");
        assert_eq!(AuthError::Expired.error_kind(), "expired");
        assert_eq!(AuthError::Unavailable("db".into()).error_kind(), "unavailable");
    }

    #[test]
    fn auth_error_display() {
        assert_eq!(AuthError::InvalidSignature.to_string(), "invalid signature");
        assert_eq!(
            AuthError::Unavailable("timeout".into()).to_string(),
            "verifier unavailable: timeout"
        );
    }

    #[test]
    fn access_error_display() {
        let err = AccessError::Unavailable("locked".into());
        assert_eq!(err.to_string(), "permission store unavailable: locked");
    }
}
