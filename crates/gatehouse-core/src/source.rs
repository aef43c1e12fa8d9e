//! Storage collaborators consulted by the token service and policy cache.
//!
//! Only the read side is needed here: the policy cache lists every rule once,
//! and refresh-token redemption looks a user up by name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::token::ClaimsInput;

/// The identity facts a user store returns for a username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub role: String,
}

impl From<&UserRecord> for ClaimsInput {
    fn from(user: &UserRecord) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
        }
    }
}

/// One row of the endpoint → required-role table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Fully-qualified RPC method name, e.g. `/user_v1.UserV1/List`.
    pub endpoint_address: String,
    pub role: String,
}

/// Read access to user records.
#[async_trait]
pub trait UserSource: Send + Sync {
    /// Returns `Ok(None)` when the user does not exist (or was deleted).
    async fn get(&self, username: &str) -> Result<Option<UserRecord>, SourceError>;
}

/// Read access to the access-rule table.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<AccessRule>, SourceError>;
}
