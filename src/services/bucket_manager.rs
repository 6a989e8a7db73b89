//! Bucket lifecycle: creation, lookup, soft deletion, access and renaming.
//!
//! Only live (not soft-deleted) buckets are ever returned.

use crate::{
    db,
    errors::{HarborError, HarborResult, is_unique_violation},
    models::{
        bucket::{AccessPermission, Bucket, normalize_bucket_name},
        user::AuthUser,
    },
    services::pagination::ListQuery,
};
use chrono::Utc;
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info};

const BUCKETS_TABLE: &str = "buckets";

fn name_taken(name: &str) -> HarborError {
    HarborError::conflict(format!("bucket `{name}` already exists"))
}

pub async fn get_bucket_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> HarborResult<Option<Bucket>> {
    Ok(sqlx::query_as::<_, Bucket>(
        "SELECT * FROM buckets WHERE name = ? AND soft_delete = 0",
    )
    .bind(name.to_ascii_lowercase())
    .fetch_optional(&mut *conn)
    .await?)
}

#[cfg(test)]
pub async fn get_bucket_by_id(conn: &mut SqliteConnection, id: i64) -> HarborResult<Option<Bucket>> {
    Ok(
        sqlx::query_as::<_, Bucket>("SELECT * FROM buckets WHERE id = ? AND soft_delete = 0")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

pub async fn get_user_bucket(
    conn: &mut SqliteConnection,
    owner: &AuthUser,
    name: &str,
) -> HarborResult<Option<Bucket>> {
    Ok(sqlx::query_as::<_, Bucket>(
        "SELECT * FROM buckets WHERE user_id = ? AND name = ? AND soft_delete = 0",
    )
    .bind(owner.id)
    .bind(name.to_ascii_lowercase())
    .fetch_optional(&mut *conn)
    .await?)
}

pub async fn get_user_bucket_by_id(
    conn: &mut SqliteConnection,
    owner: &AuthUser,
    id: i64,
) -> HarborResult<Option<Bucket>> {
    Ok(sqlx::query_as::<_, Bucket>(
        "SELECT * FROM buckets WHERE user_id = ? AND id = ? AND soft_delete = 0",
    )
    .bind(owner.id)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Create a private bucket owned by `owner` together with its object table.
///
/// The row and the table are created in one transaction, so a failed table
/// creation leaves no bucket behind.
pub async fn create_bucket(
    conn: &mut SqliteConnection,
    owner: &AuthUser,
    name: &str,
) -> HarborResult<Bucket> {
    let name = normalize_bucket_name(name)?;
    if get_bucket_by_name(conn, &name).await?.is_some() {
        return Err(name_taken(&name));
    }

    let now = Utc::now();
    let mut tx = conn.begin().await?;
    let bucket = sqlx::query_as::<_, Bucket>(
        r#"
        INSERT INTO buckets (name, user_id, access_permission, soft_delete, created_time, modified_time)
        VALUES (?, ?, ?, 0, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&name)
    .bind(owner.id)
    .bind(AccessPermission::Private)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            name_taken(&name)
        } else {
            HarborError::Metadata(err)
        }
    })?;

    db::create_objects_table(&mut *tx, bucket.id).await?;
    tx.commit().await?;

    info!("created bucket {} (id {}) for user {}", bucket.name, bucket.id, owner.id);
    Ok(bucket)
}

/// Listing of `owner`'s live buckets.
pub fn list_user_buckets(owner: &AuthUser) -> ListQuery {
    ListQuery::new(BUCKETS_TABLE)
        .filter_eq("user_id", owner.id)
        .filter_eq("soft_delete", false)
}

/// Soft-delete the buckets in `ids` that `owner` owns. Returns how many were
/// deleted; ids of foreign or already deleted buckets are skipped.
pub async fn soft_delete_user_buckets(
    conn: &mut SqliteConnection,
    owner: &AuthUser,
    ids: &[i64],
) -> HarborResult<u64> {
    let mut deleted = 0;
    for &id in ids {
        let Some(bucket) = get_user_bucket_by_id(conn, owner, id).await? else {
            continue;
        };
        let result = sqlx::query(
            "UPDATE buckets SET name = ?, soft_delete = 1, modified_time = ? WHERE id = ?",
        )
        .bind(bucket.soft_delete_name())
        .bind(Utc::now())
        .bind(bucket.id)
        .execute(&mut *conn)
        .await?;
        deleted += result.rows_affected();
        debug!("soft-deleted bucket {} as {}", bucket.name, bucket.soft_delete_name());
    }
    Ok(deleted)
}

/// Make `owner`'s buckets in `ids` public or private. Returns rows changed.
pub async fn set_user_buckets_access(
    conn: &mut SqliteConnection,
    owner: &AuthUser,
    ids: &[i64],
    public: bool,
) -> HarborResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let permission = if public {
        AccessPermission::Public
    } else {
        AccessPermission::Private
    };

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE buckets SET access_permission = ");
    builder.push_bind(permission);
    builder.push(", modified_time = ");
    builder.push_bind(Utc::now());
    builder.push(" WHERE soft_delete = 0 AND user_id = ");
    builder.push_bind(owner.id);
    builder.push(" AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let result = builder.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Rename one of `owner`'s buckets.
pub async fn rename_bucket(
    conn: &mut SqliteConnection,
    owner: &AuthUser,
    id: i64,
    new_name: &str,
) -> HarborResult<Bucket> {
    let new_name = normalize_bucket_name(new_name)?;
    let mut bucket = get_user_bucket_by_id(conn, owner, id)
        .await?
        .ok_or_else(|| HarborError::not_found(format!("bucket {id}")))?;
    if bucket.name == new_name {
        return Ok(bucket);
    }
    if get_bucket_by_name(conn, &new_name).await?.is_some() {
        return Err(name_taken(&new_name));
    }

    let now = Utc::now();
    sqlx::query("UPDATE buckets SET name = ?, modified_time = ? WHERE id = ?")
        .bind(&new_name)
        .bind(now)
        .bind(bucket.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                name_taken(&new_name)
            } else {
                HarborError::Metadata(err)
            }
        })?;

    bucket.name = new_name;
    bucket.modified_time = now;
    Ok(bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::scratch_db;
    use crate::services::pagination::{Paginator, SqlSource};

    #[tokio::test]
    async fn create_bucket_makes_private_bucket_with_table() {
        let (_dir, pool) = scratch_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let owner = AuthUser::new(1);

        let bucket = create_bucket(&mut conn, &owner, "Photos").await.unwrap();
        assert_eq!(bucket.name, "photos");
        assert_eq!(bucket.access_permission, AccessPermission::Private);
        assert!(bucket.is_owned_by(Some(&owner)));

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(bucket.objects_table())
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(tables, 1);

        let err = create_bucket(&mut conn, &AuthUser::new(2), "photos")
            .await
            .unwrap_err();
        assert!(matches!(err, HarborError::Conflict(_)));
        assert!(matches!(
            create_bucket(&mut conn, &owner, "-bad").await,
            Err(HarborError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn soft_deleted_names_are_reusable() {
        let (_dir, pool) = scratch_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let owner = AuthUser::new(1);
        let first = create_bucket(&mut conn, &owner, "reports").await.unwrap();

        let deleted = soft_delete_user_buckets(&mut conn, &owner, &[first.id])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(get_bucket_by_name(&mut conn, "reports").await.unwrap().is_none());
        assert!(get_bucket_by_id(&mut conn, first.id).await.unwrap().is_none());

        let second = create_bucket(&mut conn, &owner, "reports").await.unwrap();
        assert_ne!(second.id, first.id);

        let renamed: String = sqlx::query_scalar("SELECT name FROM buckets WHERE id = ?")
            .bind(first.id)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(renamed, format!("_{}-reports", first.id));
    }

    #[tokio::test]
    async fn foreign_buckets_are_untouched() {
        let (_dir, pool) = scratch_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let alice = AuthUser::new(1);
        let bob = AuthUser::new(2);
        let bucket = create_bucket(&mut conn, &alice, "alice-data").await.unwrap();

        assert_eq!(
            soft_delete_user_buckets(&mut conn, &bob, &[bucket.id])
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            set_user_buckets_access(&mut conn, &bob, &[bucket.id], true)
                .await
                .unwrap(),
            0
        );
        assert!(get_user_bucket(&mut conn, &bob, "alice-data").await.unwrap().is_none());
        assert!(get_user_bucket(&mut conn, &alice, "alice-data").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn access_toggle() {
        let (_dir, pool) = scratch_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let owner = AuthUser::new(1);
        let a = create_bucket(&mut conn, &owner, "aaa").await.unwrap();
        let b = create_bucket(&mut conn, &owner, "bbb").await.unwrap();

        let changed = set_user_buckets_access(&mut conn, &owner, &[a.id, b.id], true)
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert!(get_bucket_by_id(&mut conn, a.id).await.unwrap().unwrap().is_public());

        set_user_buckets_access(&mut conn, &owner, &[a.id], false)
            .await
            .unwrap();
        assert!(!get_bucket_by_id(&mut conn, a.id).await.unwrap().unwrap().is_public());
        assert!(get_bucket_by_id(&mut conn, b.id).await.unwrap().unwrap().is_public());
    }

    #[tokio::test]
    async fn rename_rules() {
        let (_dir, pool) = scratch_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let owner = AuthUser::new(1);
        let a = create_bucket(&mut conn, &owner, "first").await.unwrap();
        create_bucket(&mut conn, &owner, "second").await.unwrap();

        assert!(matches!(
            rename_bucket(&mut conn, &owner, a.id, "second").await,
            Err(HarborError::Conflict(_))
        ));
        assert_eq!(
            rename_bucket(&mut conn, &owner, a.id, "first").await.unwrap().name,
            "first"
        );
        let renamed = rename_bucket(&mut conn, &owner, a.id, "Third").await.unwrap();
        assert_eq!(renamed.name, "third");
        assert!(get_bucket_by_name(&mut conn, "third").await.unwrap().is_some());
        assert!(matches!(
            rename_bucket(&mut conn, &AuthUser::new(9), a.id, "fourth").await,
            Err(HarborError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_excludes_deleted() {
        let (_dir, pool) = scratch_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let owner = AuthUser::new(1);
        let mut ids = Vec::new();
        for name in ["one", "two", "three"] {
            ids.push(create_bucket(&mut conn, &owner, name).await.unwrap().id);
        }
        create_bucket(&mut conn, &AuthUser::new(2), "other").await.unwrap();
        soft_delete_user_buckets(&mut conn, &owner, &ids[..1]).await.unwrap();

        let page = Paginator::new(10, 0)
            .unwrap()
            .paginate(&mut SqlSource::<Bucket>::new(
                &mut conn,
                list_user_buckets(&owner),
            ))
            .await
            .unwrap();
        let names: Vec<_> = page.items.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["three", "two"]);
        assert_eq!(page.count, 2);
    }
}
