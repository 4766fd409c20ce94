use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use pulse_core::ids::UserId;
use pulse_core::{AuthError, Identity, IdentityVerifier, Role};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried inside a signed token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub roles: Vec<Role>,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

impl Claims {
    pub fn new(identity: &Identity, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            roles: identity.roles.clone(),
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

/// Verifies (and, for ops tooling and tests, mints) HMAC-SHA256 signed
/// bearer tokens.
pub struct TokenVerifier {
    key: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| AuthError::Unavailable(e.to_string()))
    }

    /// Sign claims into a wire token.
    pub fn mint(&self, claims: &Claims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).map_err(|_| AuthError::MalformedToken)?;
        let mut mac = self.mac()?;
        mac.update(&payload);
        let sig = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    /// Convenience: mint a token for an identity, valid for `ttl_secs`.
    pub fn mint_for(&self, identity: &Identity, ttl_secs: i64) -> Result<String, AuthError> {
        self.mint(&Claims::new(identity, ttl_secs))
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(AuthError::MalformedToken)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::MalformedToken)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::MalformedToken)?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&sig)
            .map_err(|_| AuthError::InvalidSignature)?;

        serde_json::from_slice(&payload).map_err(|_| AuthError::MalformedToken)
    }
}

#[async_trait]
impl IdentityVerifier for TokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let claims = self.decode(credential)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(Identity::new(claims.sub, claims.email, claims.roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new(
            UserId::from_raw("user_1"),
            "alice@example.com",
            vec![Role::Member],
        )
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::new("test-secret")
    }

    #[tokio::test]
    async fn mint_and_verify_roundtrip() {
        let v = verifier();
        let token = v.mint_for(&identity(), 3600).unwrap();
        let verified = v.verify(&token).await.unwrap();
        assert_eq!(verified.user_id.as_str(), "user_1");
        assert_eq!(verified.email, "alice@example.com");
        assert_eq!(verified.roles, vec![Role::Member]);
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let v = verifier();
        let token = v.mint_for(&identity(), -10).unwrap();
        let err = v.verify(&token).await.unwrap_err();
        assert_eq!(err.error_kind(), "expired");
    }

    #[tokio::test]
    async fn wrong_key_rejected() {
        let token = verifier().mint_for(&identity(), 3600).unwrap();
        let other = TokenVerifier::new("another-secret");
        let err = other.verify(&token).await.unwrap_err();
        assert_eq!(err.error_kind(), "invalid_signature");
    }

    #[tokio::test]
    async fn tampered_payload_rejected() {
        let v = verifier();
        let token = v.mint_for(&identity(), 3600).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_claims = Claims::new(
            &Identity::new(UserId::from_raw("user_2"), "eve@example.com", vec![Role::Admin]),
            3600,
        );
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{forged_payload}.{sig}");
        let err = v.verify(&forged).await.unwrap_err();
        assert_eq!(err.error_kind(), "invalid_signature");
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let v = verifier();
        assert_eq!(
            v.verify("not-a-token").await.unwrap_err().error_kind(),
            "malformed_token"
        );
        assert_eq!(
            v.verify("a.b.c???").await.unwrap_err().error_kind(),
            "malformed_token"
        );
    }

    #[tokio::test]
    async fn empty_credential_is_missing() {
        let v = verifier();
        let err = v.verify("").await.unwrap_err();
        assert_eq!(err.error_kind(), "missing_credential");
    }

    #[test]
    fn claims_expiry_relative_to_issue() {
        let claims = Claims::new(&identity(), 120);
        assert_eq!(claims.exp - claims.iat, 120);
    }
}
