//! Represents a bucket, the top-level container that owns one object tree.

use crate::{
    db,
    errors::{HarborError, HarborResult},
    models::user::AuthUser,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const BUCKET_NAME_MIN_LEN: usize = 3;
pub const BUCKET_NAME_MAX_LEN: usize = 63;

/// Who may read objects in a bucket without owning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum AccessPermission {
    Public = 1,
    Private = 2,
}

/// A storage bucket.
///
/// Live bucket names are globally unique. Soft deletion rewrites the name to
/// `_{id}-{name}` so the original name can be taken again right away.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: i64,

    /// Lowercase, DNS-like bucket name.
    pub name: String,

    /// Owning user.
    pub user_id: i64,

    pub access_permission: AccessPermission,

    #[serde(skip_serializing)]
    pub soft_delete: bool,

    pub created_time: DateTime<Utc>,

    /// Also records when the bucket was soft-deleted.
    #[serde(skip_serializing)]
    pub modified_time: DateTime<Utc>,
}

impl Bucket {
    /// Name of the table holding this bucket's object tree.
    pub fn objects_table(&self) -> String {
        db::objects_table_name(self.id)
    }

    /// Collision-free name the bucket takes once soft-deleted.
    pub fn soft_delete_name(&self) -> String {
        if self.soft_delete {
            return self.name.clone();
        }
        format!("_{}-{}", self.id, self.name)
            .chars()
            .take(BUCKET_NAME_MAX_LEN)
            .collect()
    }

    pub fn is_public(&self) -> bool {
        self.access_permission == AccessPermission::Public
    }

    /// Inactive users never own anything.
    pub fn is_owned_by(&self, user: Option<&AuthUser>) -> bool {
        user.is_some_and(|u| u.is_active && u.id == self.user_id)
    }
}

/// Validate a requested bucket name and return its stored (lowercase) form.
///
/// 3 to 63 characters of ASCII letters, digits and `-`, starting and ending
/// with a letter or digit.
pub fn normalize_bucket_name(name: &str) -> HarborResult<String> {
    let invalid = |reason: &str| HarborError::invalid(format!("bucket name `{name}` {reason}"));

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid(
            "may only contain ASCII letters, digits and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(id: i64, name: &str) -> Bucket {
        let now = Utc::now();
        Bucket {
            id,
            name: name.into(),
            user_id: 42,
            access_permission: AccessPermission::Private,
            soft_delete: false,
            created_time: now,
            modified_time: now,
        }
    }

    #[test]
    fn objects_table_is_derived_from_id() {
        assert_eq!(bucket(17, "photos").objects_table(), "bucket_17");
    }

    #[test]
    fn soft_delete_name_is_decorated_and_truncated() {
        assert_eq!(bucket(5, "photos").soft_delete_name(), "_5-photos");

        let long = "a".repeat(63);
        let renamed = bucket(12345, &long).soft_delete_name();
        assert_eq!(renamed.len(), 63);
        assert!(renamed.starts_with("_12345-aaa"));

        let mut gone = bucket(5, "_5-photos");
        gone.soft_delete = true;
        assert_eq!(gone.soft_delete_name(), "_5-photos");
    }

    #[test]
    fn ownership_requires_active_matching_user() {
        let b = bucket(1, "docs");
        assert!(b.is_owned_by(Some(&AuthUser::new(42))));
        assert!(!b.is_owned_by(Some(&AuthUser::new(7))));
        assert!(!b.is_owned_by(Some(&AuthUser {
            id: 42,
            is_active: false
        })));
        assert!(!b.is_owned_by(None));
        assert!(!b.is_public());
    }

    #[test]
    fn bucket_name_rules() {
        assert_eq!(normalize_bucket_name("My-Bucket1").unwrap(), "my-bucket1");
        assert!(normalize_bucket_name("ab").is_err());
        assert!(normalize_bucket_name(&"a".repeat(64)).is_err());
        assert!(normalize_bucket_name("-abc").is_err());
        assert!(normalize_bucket_name("abc-").is_err());
        assert!(normalize_bucket_name("a_bc").is_err());
        assert!(normalize_bucket_name("a.bc").is_err());
    }
}
