//! Signed bearer tokens: the concrete identity verifier.
//!
//! A token is `base64url(claims-json) . base64url(hmac-sha256)`, carrying
//! the user id, email, roles, and an expiry. Verification is offline; the
//! signing key is shared between the issuer and this server.

mod token;

pub use token::{Claims, TokenVerifier};
