//! Represents a node of a bucket's object tree: a file or a directory.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of a bucket's object table.
///
/// `(parent_id, name)` is unique within the table. `path_name` is a cached
/// copy of the full path and is not used for lookups.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct HarborObject {
    pub id: i64,

    /// Full path from the bucket root, without leading `/`.
    pub path_name: String,

    /// `true` for files, `false` for directories.
    pub is_file: bool,

    /// Id of the containing directory, 0 for the bucket root.
    pub parent_id: i64,

    pub name: String,

    /// Byte size of a file. Always 0 for directories.
    pub size: i64,

    pub upload_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub download_count: i64,

    #[serde(skip_serializing)]
    pub shared: bool,
    #[serde(skip_serializing)]
    pub shared_without_time_limit: bool,
    #[serde(skip_serializing)]
    pub share_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub share_end: Option<DateTime<Utc>>,

    #[serde(skip_serializing)]
    pub soft_deleted: bool,
}

/// Id of the synthetic root directory of every bucket.
pub const ROOT_ID: i64 = 0;

impl HarborObject {
    /// Synthetic root node. It is never stored.
    pub fn root() -> Self {
        Self::new_dir(ROOT_ID, String::new(), "")
    }

    fn new_node(parent_id: i64, path_name: String, name: &str, is_file: bool) -> Self {
        let now = Utc::now();
        Self {
            id: ROOT_ID,
            path_name,
            is_file,
            parent_id,
            name: name.to_string(),
            size: 0,
            upload_time: now,
            update_time: now,
            download_count: 0,
            shared: false,
            shared_without_time_limit: false,
            share_start: None,
            share_end: None,
            soft_deleted: false,
        }
    }

    /// Unsaved directory row.
    pub fn new_dir(parent_id: i64, path_name: String, name: &str) -> Self {
        Self::new_node(parent_id, path_name, name, false)
    }

    /// Unsaved, empty file row.
    pub fn new_file(parent_id: i64, path_name: String, name: &str) -> Self {
        Self::new_node(parent_id, path_name, name, true)
    }

    pub fn is_root(&self) -> bool {
        !self.is_file && self.id == ROOT_ID
    }

    pub fn is_dir(&self) -> bool {
        !self.is_file
    }

    /// Raise the recorded size to `end`. Never shrinks. Returns whether the
    /// size changed.
    pub fn grow_size(&mut self, end: i64) -> bool {
        if end > self.size {
            self.size = end;
            true
        } else {
            false
        }
    }

    pub fn touch(&mut self) {
        self.update_time = Utc::now();
    }

    /// Change sharing. `days == 0` shares without a time limit, `days > 0`
    /// shares for that many days from `now`, `days < 0` or `share == false`
    /// makes the object private.
    pub fn set_shared(&mut self, share: bool, days: i64, now: DateTime<Utc>) {
        if !share || days < 0 {
            self.shared = false;
            self.shared_without_time_limit = false;
            self.share_start = None;
            self.share_end = None;
            return;
        }
        self.shared = true;
        self.share_start = Some(now);
        if days == 0 {
            self.shared_without_time_limit = true;
            self.share_end = None;
        } else {
            self.shared_without_time_limit = false;
            self.share_end = Some(now + Duration::days(days));
        }
    }

    pub fn is_shared_and_in_window(&self, now: DateTime<Utc>) -> bool {
        if !self.shared {
            return false;
        }
        if self.shared_without_time_limit {
            return true;
        }
        let started = self.share_start.is_none_or(|start| start <= now);
        let not_ended = self.share_end.is_some_and(|end| now <= end);
        started && not_ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_a_directory_with_id_zero() {
        let root = HarborObject::root();
        assert!(root.is_root());
        assert!(root.is_dir());
        assert_eq!(root.path_name, "");
    }

    #[test]
    fn size_only_grows() {
        let mut file = HarborObject::new_file(0, "a.txt".into(), "a.txt");
        assert!(file.grow_size(100));
        assert!(!file.grow_size(20));
        assert_eq!(file.size, 100);
    }

    #[test]
    fn share_window_rules() {
        let now = Utc::now();
        let mut file = HarborObject::new_file(0, "a".into(), "a");
        assert!(!file.is_shared_and_in_window(now));

        file.set_shared(true, 0, now);
        assert!(file.is_shared_and_in_window(now + Duration::days(3650)));

        file.set_shared(true, 2, now);
        assert!(file.is_shared_and_in_window(now + Duration::days(1)));
        assert!(!file.is_shared_and_in_window(now + Duration::days(3)));
        assert!(!file.is_shared_and_in_window(now - Duration::hours(1)));

        file.set_shared(true, -1, now);
        assert!(!file.shared);

        file.set_shared(true, 0, now);
        file.set_shared(false, 5, now);
        assert!(!file.is_shared_and_in_window(now));
        assert!(file.share_end.is_none());
    }
}
