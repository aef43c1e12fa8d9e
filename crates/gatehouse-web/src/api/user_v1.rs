use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::{Call, Handler, Reply, RpcResult, Status, UserRecord};

use super::{decode, reply, validate};
use crate::auth::password;
use crate::dto::{CreateUserRequest, Empty, ListUsersResponse, UserDto, UsernameRequest};
use crate::error::internal;
use crate::store::{StoredUser, UserStore};

pub const CREATE: &str = "/user_v1.UserV1/Create";
pub const GET: &str = "/user_v1.UserV1/Get";
pub const LIST: &str = "/user_v1.UserV1/List";
pub const DELETE: &str = "/user_v1.UserV1/Delete";

pub const DEFAULT_ROLE: &str = "user";
/// Only callers with this role may give a new user a role other than
/// [`DEFAULT_ROLE`].
pub const ADMIN_ROLE: &str = "admin";

pub struct Create {
    pub users: Arc<UserStore>,
}

#[async_trait]
impl Handler for Create {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let caller_is_admin = call.claims().is_some_and(|claims| claims.role == ADMIN_ROLE);
        let req: CreateUserRequest = decode(call.body)?;
        validate_create(&req)
            .map_err(|e| Status::invalid_argument(format!("Request validation failed: {e}")))?;

        let role = req.role.unwrap_or_else(|| DEFAULT_ROLE.to_string());
        if role != DEFAULT_ROLE && !caller_is_admin {
            tracing::warn!(username = %req.username, %role, "role assignment refused");
            return Err(Status::permission_denied(format!(
                "only {ADMIN_ROLE} may create users with role {role}"
            )));
        }
        let password_hash = password::hash_password_blocking(req.password)
            .await
            .map_err(internal)?;

        let record = self.users.create(StoredUser {
            record: UserRecord {
                username: req.username,
                email: req.email,
                role,
            },
            password_hash,
        })?;
        tracing::info!(username = %record.username, role = %record.role, "user created");

        reply(&Empty {})
    }
}

fn validate_create(req: &CreateUserRequest) -> Result<(), &'static str> {
    if !validate::is_password_valid(&req.password) {
        return Err(validate::ERR_PASSWORD);
    }
    if !validate::is_password_confirmed(&req.password, &req.password_confirm) {
        return Err(validate::ERR_PASSWORD_CONFIRMATION);
    }
    if !validate::is_email_valid(&req.email) {
        return Err(validate::ERR_EMAIL);
    }
    if !validate::is_username_valid(&req.username) {
        return Err(validate::ERR_USERNAME);
    }
    if let Some(role) = &req.role {
        if !validate::is_role_valid(role) {
            return Err(validate::ERR_ROLE);
        }
    }
    Ok(())
}

pub struct Get {
    pub users: Arc<UserStore>,
}

#[async_trait]
impl Handler for Get {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let req: UsernameRequest = decode(call.body)?;
        let user = self
            .users
            .find(&req.username)
            .ok_or_else(|| Status::not_found(format!("user {} not found", req.username)))?;
        reply(&UserDto::from(user.record))
    }
}

pub struct List {
    pub users: Arc<UserStore>,
}

#[async_trait]
impl Handler for List {
    async fn call(&self, _call: Call) -> RpcResult<Reply> {
        let users = self.users.list().into_iter().map(UserDto::from).collect();
        reply(&ListUsersResponse { users })
    }
}

pub struct Delete {
    pub users: Arc<UserStore>,
}

#[async_trait]
impl Handler for Delete {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let req: UsernameRequest = decode(call.body)?;
        self.users
            .remove(&req.username)
            .ok_or_else(|| Status::not_found(format!("user {} not found", req.username)))?;
        tracing::info!(username = %req.username, "user deleted");
        reply(&Empty {})
    }
}

#[cfg(test)]
mod tests {
    use gatehouse_core::Code;
    use serde_json::json;

    use super::*;

    fn create_call(body: serde_json::Value) -> Call {
        Call::new(CREATE, body)
    }

    #[tokio::test]
    async fn create_then_get() {
        let users = Arc::new(UserStore::new());
        let create = Create { users: users.clone() };

        let reply = create
            .call(create_call(json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "wonderland1",
                "password_confirm": "wonderland1"
            })))
            .await
            .unwrap();
        assert_eq!(reply, json!({}));

        let stored = users.find("alice").unwrap();
        assert_eq!(stored.record.role, DEFAULT_ROLE);
        assert!(password::verify_password(&stored.password_hash, "wonderland1").unwrap());

        let got = Get { users }
            .call(Call::new(GET, json!({ "username": "alice" })))
            .await
            .unwrap();
        assert_eq!(got["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn create_validates_in_order() {
        let create = Create {
            users: Arc::new(UserStore::new()),
        };

        // Bad password and bad email: the password check reports first.
        let err = create
            .call(create_call(json!({
                "username": "alice",
                "email": "nope",
                "password": "short",
                "password_confirm": "short"
            })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(
            err.message(),
            format!("Request validation failed: {}", validate::ERR_PASSWORD)
        );

        let err = create
            .call(create_call(json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "wonderland1",
                "password_confirm": "wonderland2"
            })))
            .await
            .unwrap_err();
        assert!(err.message().ends_with(validate::ERR_PASSWORD_CONFIRMATION));
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let create = Create {
            users: Arc::new(UserStore::new()),
        };
        let body = json!({
            "username": "bob",
            "email": "bob@example.com",
            "password": "builder123",
            "password_confirm": "builder123"
        });

        create.call(create_call(body.clone())).await.unwrap();
        let err = create.call(create_call(body)).await.unwrap_err();
        assert_eq!(err.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn anonymous_caller_cannot_assign_admin_role() {
        let users = Arc::new(UserStore::new());
        let create = Create {
            users: users.clone(),
        };

        let err = create
            .call(create_call(json!({
                "username": "mallory",
                "email": "mallory@example.com",
                "password": "takeover123",
                "password_confirm": "takeover123",
                "role": ADMIN_ROLE
            })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
        assert!(users.find("mallory").is_none());
    }

    #[tokio::test]
    async fn get_and_delete_unknown_user_is_not_found() {
        let users = Arc::new(UserStore::new());
        let err = Get { users: users.clone() }
            .call(Call::new(GET, json!({ "username": "ghost" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);

        let err = Delete { users }
            .call(Call::new(DELETE, json!({ "username": "ghost" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn missing_field_is_invalid_argument() {
        let err = Get {
            users: Arc::new(UserStore::new()),
        }
        .call(Call::new(GET, json!({})))
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
