//! Caller permissions.
//!
//! Callers are identified by name (the subject common name of their client
//! certificate) and looked up in a [`UserTable`]. Creating and stopping jobs
//! requires [`Permission::ReadWrite`]; reading status requires
//! [`Permission::ReadOnly`]. Permissions are matched exactly, a user needs
//! each one it uses.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "READ_ONLY")]
    ReadOnly,
    #[serde(rename = "READ_WRITE")]
    ReadWrite,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::ReadOnly => write!(f, "READ_ONLY"),
            Permission::ReadWrite => write!(f, "READ_WRITE"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("could not extract caller identity")]
    MissingIdentity,

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("user {user} does not have permission {permission}")]
    PermissionDenied { user: String, permission: Permission },

    #[error("invalid user table: {0}")]
    InvalidUserTable(#[from] serde_json::Error),

    #[error("failed to read user table: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub permissions: Vec<Permission>,
}

impl User {
    pub fn new(name: impl Into<String>, permissions: impl Into<Vec<Permission>>) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.into(),
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn verify(&self, permission: Permission) -> Result<(), AuthError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied {
                user: self.name.clone(),
                permission,
            })
        }
    }
}

/// Known users and their permissions.
#[derive(Debug, Clone)]
pub struct UserTable {
    users: HashMap<String, User>,
}

impl Default for UserTable {
    /// `alice` may read and write, `bob` may only read.
    fn default() -> Self {
        Self::new([
            User::new("alice", [Permission::ReadOnly, Permission::ReadWrite]),
            User::new("bob", [Permission::ReadOnly]),
        ])
    }
}

impl UserTable {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.name.clone(), user))
                .collect(),
        }
    }

    /// Parse a JSON object mapping user names to permission lists, e.g.
    /// `{"alice": ["READ_ONLY", "READ_WRITE"]}`.
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let entries: HashMap<String, Vec<Permission>> = serde_json::from_str(json)?;
        Ok(Self::new(
            entries
                .into_iter()
                .map(|(name, permissions)| User::new(name, permissions)),
        ))
    }

    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn find_user(&self, name: &str) -> Result<&User, AuthError> {
        self.users
            .get(name)
            .ok_or_else(|| AuthError::UserNotFound(name.to_string()))
    }

    /// Check that `name` exists and holds `permission`.
    pub fn authorize(&self, name: &str, permission: Permission) -> Result<(), AuthError> {
        self.find_user(name)?.verify(permission)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_table_grants_alice_write_and_bob_read() {
        let table = UserTable::default();
        assert_eq!(table.len(), 2);

        assert!(table.authorize("alice", Permission::ReadWrite).is_ok());
        assert!(table.authorize("alice", Permission::ReadOnly).is_ok());
        assert!(table.authorize("bob", Permission::ReadOnly).is_ok());

        let err = table.authorize("bob", Permission::ReadWrite).unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        assert_eq!(
            err.to_string(),
            "user bob does not have permission READ_WRITE"
        );
    }

    #[test]
    fn unknown_user_is_rejected() {
        let table = UserTable::default();
        let err = table.authorize("mallory", Permission::ReadOnly).unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound(ref name) if name == "mallory"));
        assert_eq!(err.to_string(), "user mallory not found");
    }

    #[test]
    fn write_does_not_imply_read() {
        let table = UserTable::new([User::new("writer", [Permission::ReadWrite])]);
        assert!(table.authorize("writer", Permission::ReadWrite).is_ok());
        assert!(table.authorize("writer", Permission::ReadOnly).is_err());
    }

    #[test]
    fn parses_json_table() {
        let table =
            UserTable::from_json(r#"{"carol": ["READ_ONLY"], "dave": ["READ_ONLY", "READ_WRITE"]}"#)
                .unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.find_user("carol").unwrap().has(Permission::ReadOnly));
        assert!(!table.find_user("carol").unwrap().has(Permission::ReadWrite));
        assert!(table.authorize("dave", Permission::ReadWrite).is_ok());
        assert!(table.find_user("alice").is_err());
    }

    #[test]
    fn rejects_unknown_permission_names() {
        let result = UserTable::from_json(r#"{"carol": ["ADMIN"]}"#);
        assert!(matches!(result, Err(AuthError::InvalidUserTable(_))));
    }

    #[tokio::test]
    async fn loads_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"erin": ["READ_ONLY"]}}"#).unwrap();

        let table = UserTable::load(file.path()).await.unwrap();
        assert!(table.authorize("erin", Permission::ReadOnly).is_ok());
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let result = UserTable::load(Path::new("/nonexistent/users.json")).await;
        assert!(matches!(result, Err(AuthError::Io(_))));
    }
}
