use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gatehouse_core::{SourceError, Status, UserRecord, UserSource};

use crate::config::SeedUser;

/// A user record plus its argon2 password hash.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub record: UserRecord,
    pub password_hash: String,
}

/// Concurrent user table keyed by username.
pub struct UserStore {
    users: DashMap<String, StoredUser>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Builds a store from configured seed users. Later duplicates replace
    /// earlier ones.
    pub fn seeded(seed: &[SeedUser]) -> Self {
        let store = Self::new();
        for user in seed {
            store.users.insert(
                user.username.clone(),
                StoredUser {
                    record: UserRecord {
                        username: user.username.clone(),
                        email: user.email.clone(),
                        role: user.role.clone(),
                    },
                    password_hash: user.password_hash.clone(),
                },
            );
        }
        store
    }

    pub fn create(&self, user: StoredUser) -> Result<UserRecord, Status> {
        match self.users.entry(user.record.username.clone()) {
            Entry::Occupied(_) => Err(Status::already_exists(format!(
                "user {} already exists",
                user.record.username
            ))),
            Entry::Vacant(slot) => {
                let record = user.record.clone();
                slot.insert(user);
                Ok(record)
            }
        }
    }

    pub fn find(&self, username: &str) -> Option<StoredUser> {
        self.users.get(username).map(|user| user.value().clone())
    }

    pub fn remove(&self, username: &str) -> Option<StoredUser> {
        self.users.remove(username).map(|(_, user)| user)
    }

    /// All users, sorted by username.
    pub fn list(&self) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self
            .users
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserSource for UserStore {
    async fn get(&self, username: &str) -> Result<Option<UserRecord>, SourceError> {
        Ok(self.find(username).map(|user| user.record))
    }
}

#[cfg(test)]
mod tests {
    use gatehouse_core::Code;

    use super::*;

    fn stored(username: &str, role: &str) -> StoredUser {
        StoredUser {
            record: UserRecord {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                role: role.to_string(),
            },
            password_hash: String::new(),
        }
    }

    #[test]
    fn create_rejects_duplicates() {
        let store = UserStore::new();
        store.create(stored("alice", "user")).unwrap();

        let err = store.create(stored("alice", "admin")).unwrap_err();
        assert_eq!(err.code(), Code::AlreadyExists);
        assert_eq!(store.find("alice").unwrap().record.role, "user");
    }

    #[test]
    fn list_is_sorted() {
        let store = UserStore::new();
        for name in ["carol", "alice", "bob"] {
            store.create(stored(name, "user")).unwrap();
        }
        let names: Vec<_> = store.list().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn seeded_from_config() {
        let store = UserStore::seeded(&[SeedUser {
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            role: "admin".to_string(),
            password_hash: "hash".to_string(),
        }]);
        let root = store.find("root").unwrap();
        assert_eq!(root.record.role, "admin");
        assert_eq!(root.password_hash, "hash");
    }

    #[tokio::test]
    async fn user_source_sees_removals() {
        let store = UserStore::new();
        store.create(stored("dave", "user")).unwrap();
        assert!(store.get("dave").await.unwrap().is_some());

        store.remove("dave");
        assert!(store.get("dave").await.unwrap().is_none());
    }
}
