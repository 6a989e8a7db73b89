//! Directory tree stored in a bucket's flat object table.
//!
//! Every node is a row `(id, parent_id, name)`; the root is the synthetic id
//! 0 and is never stored. Lookups walk the path one segment at a time using
//! the `(parent_id, name)` unique index. `path_name` is written on every
//! mutation but never read back for resolution.
//!
//! All operations take a `&mut SqliteConnection` so callers decide whether
//! they run on a pooled connection or inside a transaction.

use crate::{
    errors::{HarborError, HarborResult, is_unique_violation},
    models::{
        bucket::Bucket,
        object::{HarborObject, ROOT_ID},
    },
    services::pagination::ListQuery,
};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

/// Longest allowed file or directory name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Strip surrounding whitespace and slashes.
pub fn clear_path(path: &str) -> &str {
    path.trim().trim_matches('/')
}

/// Split `a/b/c.txt` into `("a/b", "c.txt")`. The file name wins when there
/// is only one segment.
pub fn split_path_and_filename(path: &str) -> (&str, &str) {
    let path = clear_path(path);
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Join path pieces with `/`, dropping empty pieces and stray slashes.
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// A node name must be non-empty, contain no `/` and fit in 255 bytes.
pub fn validate_name(name: &str) -> HarborResult<()> {
    if name.is_empty() {
        return Err(HarborError::invalid("name must not be empty"));
    }
    if name.contains('/') {
        return Err(HarborError::invalid(format!(
            "name `{name}` must not contain `/`"
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(HarborError::invalid(format!(
            "name must not be longer than {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    clear_path(path).split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct ObjectTree {
    table: String,
}

impl ObjectTree {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn for_bucket(bucket: &Bucket) -> Self {
        Self::new(bucket.objects_table())
    }

    pub async fn get_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
    ) -> HarborResult<Option<HarborObject>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", self.table);
        Ok(sqlx::query_as::<_, HarborObject>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Node named `name` directly under `parent_id`, file or directory.
    pub async fn child(
        &self,
        conn: &mut SqliteConnection,
        parent_id: i64,
        name: &str,
    ) -> HarborResult<Option<HarborObject>> {
        let sql = format!(
            "SELECT * FROM {} WHERE parent_id = ? AND name = ?",
            self.table
        );
        Ok(sqlx::query_as::<_, HarborObject>(&sql)
            .bind(parent_id)
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Walk `path` from the root. Every segment must be an existing directory.
    pub async fn resolve_directory(
        &self,
        conn: &mut SqliteConnection,
        path: &str,
    ) -> HarborResult<HarborObject> {
        let mut current = HarborObject::root();
        for segment in segments(path) {
            match self.child(conn, current.id, segment).await? {
                Some(node) if node.is_dir() => current = node,
                _ => {
                    return Err(HarborError::not_found(format!(
                        "directory `{}`",
                        clear_path(path)
                    )));
                }
            }
        }
        Ok(current)
    }

    /// File or directory at `path`. The empty path is the root.
    pub async fn resolve_node(
        &self,
        conn: &mut SqliteConnection,
        path: &str,
    ) -> HarborResult<HarborObject> {
        let (dir_path, name) = split_path_and_filename(path);
        if name.is_empty() {
            return Ok(HarborObject::root());
        }
        let parent = self.resolve_directory(conn, dir_path).await?;
        self.child(conn, parent.id, name)
            .await?
            .ok_or_else(|| HarborError::not_found(format!("`{}`", clear_path(path))))
    }

    /// File at `path`, or `None` when it (or its parent directory) is absent.
    pub async fn find_file(
        &self,
        conn: &mut SqliteConnection,
        path: &str,
    ) -> HarborResult<Option<HarborObject>> {
        let (dir_path, name) = split_path_and_filename(path);
        if name.is_empty() {
            return Ok(None);
        }
        let parent = match self.resolve_directory(conn, dir_path).await {
            Ok(parent) => parent,
            Err(HarborError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(self
            .child(conn, parent.id, name)
            .await?
            .filter(|node| node.is_file))
    }

    pub async fn resolve_file(
        &self,
        conn: &mut SqliteConnection,
        path: &str,
    ) -> HarborResult<HarborObject> {
        self.find_file(conn, path)
            .await?
            .ok_or_else(|| HarborError::not_found(format!("object `{}`", clear_path(path))))
    }

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        node: &HarborObject,
    ) -> Result<HarborObject, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                path_name, is_file, parent_id, name, size, upload_time, update_time,
                download_count, shared, shared_without_time_limit, share_start, share_end,
                soft_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
            self.table
        );
        sqlx::query_as::<_, HarborObject>(&sql)
            .bind(&node.path_name)
            .bind(node.is_file)
            .bind(node.parent_id)
            .bind(&node.name)
            .bind(node.size)
            .bind(node.upload_time)
            .bind(node.update_time)
            .bind(node.download_count)
            .bind(node.shared)
            .bind(node.shared_without_time_limit)
            .bind(node.share_start)
            .bind(node.share_end)
            .bind(node.soft_deleted)
            .fetch_one(&mut *conn)
            .await
    }

    /// Persist every mutable column of `node`.
    pub async fn save(&self, conn: &mut SqliteConnection, node: &HarborObject) -> HarborResult<()> {
        let sql = format!(
            r#"
            UPDATE {} SET
                path_name = ?, parent_id = ?, name = ?, size = ?, upload_time = ?,
                update_time = ?, download_count = ?, shared = ?,
                shared_without_time_limit = ?, share_start = ?, share_end = ?
            WHERE id = ?
            "#,
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(&node.path_name)
            .bind(node.parent_id)
            .bind(&node.name)
            .bind(node.size)
            .bind(node.upload_time)
            .bind(node.update_time)
            .bind(node.download_count)
            .bind(node.shared)
            .bind(node.shared_without_time_limit)
            .bind(node.share_start)
            .bind(node.share_end)
            .bind(node.id)
            .execute(&mut *conn)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    HarborError::conflict(format!(
                        "`{}` already exists in the target directory",
                        node.name
                    ))
                } else {
                    HarborError::Metadata(err)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(HarborError::not_found(format!("`{}`", node.path_name)));
        }
        Ok(())
    }

    /// Directory `name` under `parent_path`, created if absent.
    ///
    /// Returns `created = false` for whatever already holds the name, which
    /// may be a file; callers check `is_file`. A concurrent creator losing the
    /// race on the unique index re-reads the winner's row.
    pub async fn get_or_create_child_directory(
        &self,
        conn: &mut SqliteConnection,
        parent_path: &str,
        name: &str,
    ) -> HarborResult<(HarborObject, bool)> {
        validate_name(name)?;
        let parent = self.resolve_directory(conn, parent_path).await?;
        if let Some(existing) = self.child(conn, parent.id, name).await? {
            return Ok((existing, false));
        }

        self.insert_child_directory(conn, &parent, name).await
    }

    /// Insert directory `name` under `parent`. Losing a race on the
    /// `(parent_id, name)` index yields the row that won it.
    async fn insert_child_directory(
        &self,
        conn: &mut SqliteConnection,
        parent: &HarborObject,
        name: &str,
    ) -> HarborResult<(HarborObject, bool)> {
        let dir = HarborObject::new_dir(parent.id, join_path(&[&parent.path_name, name]), name);
        match self.insert(conn, &dir).await {
            Ok(created) => {
                debug!("created directory {} in {}", created.path_name, self.table);
                Ok((created, true))
            }
            Err(err) if is_unique_violation(&err) => {
                match self.child(conn, parent.id, name).await? {
                    Some(existing) => Ok((existing, false)),
                    None => Err(HarborError::conflict(format!(
                        "`{name}` already exists in `{}`",
                        parent.path_name
                    ))),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Create the directory at `path`. Fails with `Conflict` if the name is
    /// already taken by a file or directory.
    pub async fn create_directory(
        &self,
        conn: &mut SqliteConnection,
        path: &str,
    ) -> HarborResult<HarborObject> {
        let (parent_path, name) = split_path_and_filename(path);
        let (node, created) = self
            .get_or_create_child_directory(conn, parent_path, name)
            .await?;
        if !created {
            let kind = if node.is_file { "an object" } else { "a directory" };
            return Err(HarborError::conflict(format!(
                "{kind} named `{name}` already exists"
            )));
        }
        Ok(node)
    }

    /// Listing of the children of the directory at `dir_path`.
    pub async fn list_children(
        &self,
        conn: &mut SqliteConnection,
        dir_path: &str,
    ) -> HarborResult<ListQuery> {
        let dir = self.resolve_directory(conn, dir_path).await?;
        Ok(ListQuery::new(self.table.clone()).filter_eq("parent_id", dir.id))
    }

    /// Existing file at `path`, or a new empty one. The parent directory must
    /// exist. Returns whether the file was created.
    pub async fn create_or_fetch_file(
        &self,
        conn: &mut SqliteConnection,
        path: &str,
    ) -> HarborResult<(HarborObject, bool)> {
        let (dir_path, name) = split_path_and_filename(path);
        validate_name(name)?;
        let parent = self.resolve_directory(conn, dir_path).await?;

        match self.child(conn, parent.id, name).await? {
            Some(node) if node.is_file => return Ok((node, false)),
            Some(_) => {
                return Err(HarborError::conflict(format!(
                    "a directory named `{name}` already exists"
                )));
            }
            None => {}
        }

        let file = HarborObject::new_file(parent.id, join_path(&[&parent.path_name, name]), name);
        match self.insert(conn, &file).await {
            Ok(created) => Ok((created, true)),
            Err(err) if is_unique_violation(&err) => Err(HarborError::conflict(format!(
                "`{name}` was created concurrently"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Rename `node` in place.
    pub async fn rename(
        &self,
        conn: &mut SqliteConnection,
        node: &mut HarborObject,
        new_name: &str,
    ) -> HarborResult<()> {
        validate_name(new_name)?;
        if node.is_root() {
            return Err(HarborError::invalid("the root directory cannot be renamed"));
        }
        if node.name == new_name {
            return Ok(());
        }
        if self.child(conn, node.parent_id, new_name).await?.is_some() {
            return Err(HarborError::conflict(format!(
                "cannot rename: `{new_name}` already exists"
            )));
        }
        let (dir_path, _) = split_path_and_filename(&node.path_name);
        node.path_name = join_path(&[dir_path, new_name]);
        node.name = new_name.to_string();
        node.touch();
        self.save(conn, node).await
    }

    /// Move `node` under the directory at `new_parent_path`, optionally
    /// renaming it on the way.
    pub async fn move_node(
        &self,
        conn: &mut SqliteConnection,
        node: &mut HarborObject,
        new_parent_path: &str,
        new_name: Option<&str>,
    ) -> HarborResult<()> {
        let name = new_name.unwrap_or(&node.name).to_string();
        validate_name(&name)?;
        if node.is_root() {
            return Err(HarborError::invalid("the root directory cannot be moved"));
        }
        let dest = self.resolve_directory(conn, new_parent_path).await?;
        if node.is_dir() && self.is_within(conn, node.id, &dest).await? {
            return Err(HarborError::invalid(
                "a directory cannot be moved into itself",
            ));
        }
        if let Some(existing) = self.child(conn, dest.id, &name).await? {
            if existing.id != node.id {
                return Err(HarborError::conflict(format!(
                    "`{name}` already exists in the target directory"
                )));
            }
            return Ok(());
        }

        node.parent_id = dest.id;
        node.path_name = join_path(&[&dest.path_name, &name]);
        node.name = name;
        node.touch();
        self.save(conn, node).await
    }

    /// Whether `node` is `ancestor_id` or lies somewhere below it. Walks
    /// parent ids, so stale `path_name` values do not matter.
    async fn is_within(
        &self,
        conn: &mut SqliteConnection,
        ancestor_id: i64,
        node: &HarborObject,
    ) -> HarborResult<bool> {
        let mut current = node.clone();
        loop {
            if current.id == ancestor_id {
                return Ok(true);
            }
            if current.parent_id == ROOT_ID {
                return Ok(false);
            }
            match self.get_by_id(conn, current.parent_id).await? {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
    }

    async fn delete_row(&self, conn: &mut SqliteConnection, id: i64) -> HarborResult<u64> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_file(&self, conn: &mut SqliteConnection, node: &HarborObject) -> HarborResult<()> {
        if !node.is_file {
            return Err(HarborError::invalid(format!(
                "`{}` is a directory",
                node.path_name
            )));
        }
        self.delete_row(conn, node.id).await?;
        Ok(())
    }

    pub async fn child_count(&self, conn: &mut SqliteConnection, dir_id: i64) -> HarborResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE parent_id = ?", self.table);
        Ok(sqlx::query_scalar::<_, i64>(&sql)
            .bind(dir_id)
            .fetch_one(&mut *conn)
            .await?)
    }

    pub async fn delete_empty_directory(
        &self,
        conn: &mut SqliteConnection,
        node: &HarborObject,
    ) -> HarborResult<()> {
        if node.is_file {
            return Err(HarborError::invalid(format!(
                "`{}` is not a directory",
                node.path_name
            )));
        }
        if node.id == ROOT_ID {
            return Err(HarborError::invalid("the root directory cannot be deleted"));
        }
        if !self.is_empty(conn, node).await? {
            return Err(HarborError::NotEmpty(format!(
                "directory `{}`",
                node.path_name
            )));
        }
        self.delete_row(conn, node.id).await?;
        Ok(())
    }

    pub async fn is_empty(&self, conn: &mut SqliteConnection, dir: &HarborObject) -> HarborResult<bool> {
        Ok(self.child_count(conn, dir.id).await? == 0)
    }

    pub async fn increase_download_count(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
    ) -> HarborResult<()> {
        let sql = format!(
            "UPDATE {} SET download_count = download_count + 1 WHERE id = ?",
            self.table
        );
        sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
        Ok(())
    }

    /// Set the recorded size directly, bypassing the grow-only rule. Used when
    /// an upload is reset.
    pub async fn set_size(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        size: i64,
    ) -> HarborResult<()> {
        let sql = format!(
            "UPDATE {} SET size = ?, update_time = ? WHERE id = ?",
            self.table
        );
        sqlx::query(&sql)
            .bind(size)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_objects_table, test_support::scratch_db};
    use crate::services::pagination::{Paginator, SqlSource};
    use sqlx::pool::PoolConnection;
    use sqlx::{Sqlite, SqlitePool};
    use tempfile::TempDir;

    async fn tree() -> (TempDir, SqlitePool, PoolConnection<Sqlite>, ObjectTree) {
        let (dir, pool) = scratch_db().await;
        let mut conn = pool.acquire().await.unwrap();
        create_objects_table(&mut conn, 1).await.unwrap();
        (dir, pool, conn, ObjectTree::new("bucket_1"))
    }

    #[test]
    fn path_helpers() {
        assert_eq!(clear_path("  /a/b/ "), "a/b");
        assert_eq!(split_path_and_filename("/a/b/c.txt"), ("a/b", "c.txt"));
        assert_eq!(split_path_and_filename("c.txt"), ("", "c.txt"));
        assert_eq!(split_path_and_filename("/"), ("", ""));
        assert_eq!(join_path(&["", "a/", "/b", ""]), "a/b");
        assert!(validate_name("ok.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[tokio::test]
    async fn empty_path_resolves_to_root() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        let root = tree.resolve_directory(&mut conn, "").await.unwrap();
        assert!(root.is_root());
        let root = tree.resolve_directory(&mut conn, "/").await.unwrap();
        assert!(root.is_root());
    }

    #[tokio::test]
    async fn prefix_creation_matches_direct_traversal() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        let path = ["photos", "2024", "summer"];
        let mut last = None;
        for i in 0..path.len() {
            let parent = path[..i].join("/");
            let (node, created) = tree
                .get_or_create_child_directory(&mut conn, &parent, path[i])
                .await
                .unwrap();
            assert!(created);
            last = Some(node);
        }
        let last = last.unwrap();
        assert_eq!(last.path_name, "photos/2024/summer");

        let resolved = tree
            .resolve_directory(&mut conn, "/photos/2024/summer/")
            .await
            .unwrap();
        assert_eq!(resolved.id, last.id);

        let (again, created) = tree
            .get_or_create_child_directory(&mut conn, "photos/2024", "summer")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, last.id);
    }

    #[tokio::test]
    async fn losing_creator_reads_the_winning_row() {
        let (_dir, pool, mut conn, tree) = tree().await;
        let root = tree.resolve_directory(&mut conn, "").await.unwrap();
        assert!(tree.child(&mut conn, root.id, "inbox").await.unwrap().is_none());

        // Another connection creates the directory after our lookup.
        let mut other = pool.acquire().await.unwrap();
        let winner = tree.create_directory(&mut other, "inbox").await.unwrap();
        drop(other);

        let (node, created) = tree
            .insert_child_directory(&mut conn, &root, "inbox")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(node.id, winner.id);
        assert_eq!(tree.child_count(&mut conn, root.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_intermediate_is_not_created() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        let err = tree
            .get_or_create_child_directory(&mut conn, "a/b", "c")
            .await
            .unwrap_err();
        assert!(matches!(err, HarborError::NotFound(_)));
        assert!(tree.child(&mut conn, 0, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn directory_and_file_cannot_share_a_name() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        tree.create_directory(&mut conn, "docs").await.unwrap();
        let err = tree.create_or_fetch_file(&mut conn, "docs").await.unwrap_err();
        assert!(matches!(err, HarborError::Conflict(_)));

        tree.create_or_fetch_file(&mut conn, "notes.txt").await.unwrap();
        let err = tree.create_directory(&mut conn, "notes.txt").await.unwrap_err();
        assert!(matches!(err, HarborError::Conflict(_)));

        let (node, created) = tree
            .get_or_create_child_directory(&mut conn, "", "notes.txt")
            .await
            .unwrap();
        assert!(!created);
        assert!(node.is_file);
    }

    #[tokio::test]
    async fn file_path_resolution() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        tree.create_directory(&mut conn, "a").await.unwrap();
        let (file, created) = tree.create_or_fetch_file(&mut conn, "a/x.bin").await.unwrap();
        assert!(created);
        assert_eq!(file.path_name, "a/x.bin");
        assert_eq!(file.size, 0);

        let (again, created) = tree.create_or_fetch_file(&mut conn, "/a/x.bin").await.unwrap();
        assert!(!created);
        assert_eq!(again.id, file.id);

        assert_eq!(tree.resolve_file(&mut conn, "a/x.bin").await.unwrap().id, file.id);
        assert!(tree.find_file(&mut conn, "a").await.unwrap().is_none());
        assert!(tree.find_file(&mut conn, "nope/x.bin").await.unwrap().is_none());
        assert!(matches!(
            tree.resolve_directory(&mut conn, "a/x.bin").await,
            Err(HarborError::NotFound(_))
        ));
        assert!(matches!(
            tree.create_or_fetch_file(&mut conn, "missing/x.bin").await,
            Err(HarborError::NotFound(_))
        ));
        assert!(tree.resolve_node(&mut conn, "a").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn rename_checks_siblings() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        tree.create_directory(&mut conn, "d").await.unwrap();
        let (mut a, _) = tree.create_or_fetch_file(&mut conn, "d/a.txt").await.unwrap();
        tree.create_or_fetch_file(&mut conn, "d/b.txt").await.unwrap();

        let err = tree.rename(&mut conn, &mut a, "b.txt").await.unwrap_err();
        assert!(matches!(err, HarborError::Conflict(_)));

        tree.rename(&mut conn, &mut a, "c.txt").await.unwrap();
        let stored = tree.get_by_id(&mut conn, a.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "c.txt");
        assert_eq!(stored.path_name, "d/c.txt");
    }

    #[tokio::test]
    async fn move_recomputes_parent_and_path() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        tree.create_directory(&mut conn, "src").await.unwrap();
        let dst = tree.create_directory(&mut conn, "dst").await.unwrap();
        let (mut file, _) = tree.create_or_fetch_file(&mut conn, "src/f.txt").await.unwrap();
        tree.create_or_fetch_file(&mut conn, "dst/taken.txt").await.unwrap();

        let err = tree
            .move_node(&mut conn, &mut file, "dst", Some("taken.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarborError::Conflict(_)));

        tree.move_node(&mut conn, &mut file, "/dst/", Some("g.txt"))
            .await
            .unwrap();
        let stored = tree.get_by_id(&mut conn, file.id).await.unwrap().unwrap();
        assert_eq!(stored.parent_id, dst.id);
        assert_eq!(stored.path_name, "dst/g.txt");
        let src = tree.resolve_directory(&mut conn, "src").await.unwrap();
        assert!(tree.is_empty(&mut conn, &src).await.unwrap());

        tree.move_node(&mut conn, &mut file, "", None).await.unwrap();
        assert_eq!(tree.resolve_file(&mut conn, "g.txt").await.unwrap().id, file.id);
    }

    #[tokio::test]
    async fn directory_cannot_move_into_itself() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        let mut a = tree.create_directory(&mut conn, "a").await.unwrap();
        tree.create_directory(&mut conn, "a/b").await.unwrap();
        assert!(matches!(
            tree.move_node(&mut conn, &mut a, "a/b", None).await,
            Err(HarborError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn only_empty_directories_are_deleted() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        let dir = tree.create_directory(&mut conn, "tmp").await.unwrap();
        let (file, _) = tree.create_or_fetch_file(&mut conn, "tmp/x").await.unwrap();

        let err = tree.delete_empty_directory(&mut conn, &dir).await.unwrap_err();
        assert!(matches!(err, HarborError::NotEmpty(_)));
        assert!(!tree.is_empty(&mut conn, &dir).await.unwrap());

        tree.delete_file(&mut conn, &file).await.unwrap();
        tree.delete_empty_directory(&mut conn, &dir).await.unwrap();
        assert!(matches!(
            tree.resolve_directory(&mut conn, "tmp").await,
            Err(HarborError::NotFound(_))
        ));
        assert!(
            tree.delete_empty_directory(&mut conn, &HarborObject::root())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn list_children_feeds_the_paginator() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        tree.create_directory(&mut conn, "d").await.unwrap();
        for name in ["1", "2", "3"] {
            tree.create_or_fetch_file(&mut conn, &format!("d/{name}"))
                .await
                .unwrap();
        }
        tree.create_or_fetch_file(&mut conn, "outside").await.unwrap();

        let query = tree.list_children(&mut conn, "d").await.unwrap();
        let page = Paginator::new(2, 0)
            .unwrap()
            .paginate(&mut SqlSource::<HarborObject>::new(&mut conn, query))
            .await
            .unwrap();
        assert_eq!(page.count, 3);
        let names: Vec<_> = page.items.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["3", "2"]);

        assert!(matches!(
            tree.list_children(&mut conn, "nope").await,
            Err(HarborError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn download_count_and_size_updates() {
        let (_dir, _pool, mut conn, tree) = tree().await;
        let (file, _) = tree.create_or_fetch_file(&mut conn, "f").await.unwrap();
        tree.increase_download_count(&mut conn, file.id).await.unwrap();
        tree.increase_download_count(&mut conn, file.id).await.unwrap();
        tree.set_size(&mut conn, file.id, 42).await.unwrap();
        let stored = tree.get_by_id(&mut conn, file.id).await.unwrap().unwrap();
        assert_eq!(stored.download_count, 2);
        assert_eq!(stored.size, 42);
    }
}
