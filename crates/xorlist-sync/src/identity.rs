use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use xorlist_contracts::{CurrentUser, Identifier};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ClientError {
    pub code: i32,
    pub message: String,
}

impl ClientError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type GetMeReply = oneshot::Sender<Result<CurrentUser, ClientError>>;

/// The slice of a messaging client the whitelist needs: one "get current
/// user" request answered asynchronously through `reply`, from any thread.
/// Dropping `reply` without sending counts as a failed request.
pub trait MessagingClient: Send + Sync {
    fn get_me(&self, reply: GetMeReply);
}

#[derive(Debug, Clone, Default)]
pub struct StaticIdentityClient {
    user: Option<CurrentUser>,
}

impl StaticIdentityClient {
    pub fn new(user: Option<CurrentUser>) -> Self {
        Self { user }
    }
}

impl MessagingClient for StaticIdentityClient {
    fn get_me(&self, reply: GetMeReply) {
        let result = self
            .user
            .clone()
            .ok_or_else(|| ClientError::new(404, "no current user configured"));
        let _ = reply.send(result);
    }
}

/// A client construction failure is kept and reported by every later
/// resolution.
pub struct IdentityResolver {
    client: Result<Arc<dyn MessagingClient>, ClientError>,
    timeout: Duration,
}

impl IdentityResolver {
    pub fn new<F>(factory: F, timeout: Duration) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn MessagingClient>, ClientError>,
    {
        let client = factory();
        if let Err(e) = &client {
            warn!(target: "xorlist::identity", error = %e, "messaging client construction failed");
        }
        Self { client, timeout }
    }

    pub fn with_client(client: Arc<dyn MessagingClient>, timeout: Duration) -> Self {
        Self {
            client: Ok(client),
            timeout,
        }
    }

    pub async fn resolve_current_user_id(&self) -> Result<Identifier, SyncError> {
        let client = self.client.as_ref().map_err(|e| {
            SyncError::Resolution(format!("messaging client construction failed: {e}"))
        })?;

        let (tx, rx) = oneshot::channel();
        client.get_me(tx);
        let user = match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => {
                return Err(SyncError::Timeout {
                    stage: "identity resolution",
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
            Ok(Err(_)) => {
                return Err(SyncError::Resolution(
                    "messaging client dropped the request".to_string(),
                ))
            }
            Ok(Ok(Err(e))) => return Err(SyncError::Resolution(e.to_string())),
            Ok(Ok(Ok(user))) => user,
        };
        debug!(
            target: "xorlist::identity",
            user_id = user.id,
            username = ?user.username,
            "current user resolved"
        );
        Ok(user.id)
    }
}
