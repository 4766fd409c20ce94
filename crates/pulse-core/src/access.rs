use async_trait::async_trait;

use crate::errors::{AccessError, AuthError};
use crate::identity::Identity;
use crate::ids::TaskId;

/// Turns an opaque credential into a verified identity.
///
/// Consumed exactly once per connection, at handshake time. Implementations
/// may block or perform I/O; a failure rejects the handshake outright.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Answers whether an identity may watch a channel or mutate a task.
///
/// `Err` means the answer could not be produced; callers treat that as a
/// denial of the triggering action.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn can_subscribe(&self, who: &Identity, channel: &str) -> Result<bool, AccessError>;

    async fn can_modify(&self, who: &Identity, task: &TaskId) -> Result<bool, AccessError>;
}
