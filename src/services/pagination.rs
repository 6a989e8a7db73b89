//! Offset/limit pagination over filtered table queries.
//!
//! Rows are always ordered newest first (`id DESC`). For large collections
//! the optimized strategy first probes the id at `offset` with a one-row
//! query and then materializes the page with `id <= probe`, which avoids a
//! wide `OFFSET` scan for the page itself.

use crate::errors::{HarborError, HarborResult};
use async_trait::async_trait;
use axum::http::Uri;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, sqlite::SqliteRow};
use std::marker::PhantomData;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterValue {
    Int(i64),
    Bool(bool),
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Description of a listing: one table plus equality filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    table: String,
    filters: Vec<(&'static str, FilterValue)>,
}

impl ListQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    pub fn filter_eq(mut self, column: &'static str, value: impl Into<FilterValue>) -> Self {
        self.filters.push((column, value.into()));
        self
    }

    fn select(&self, columns: &str) -> QueryBuilder<'static, Sqlite> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {columns} FROM {} WHERE 1 = 1", self.table));
        for (column, value) in &self.filters {
            builder.push(format!(" AND {column} = "));
            match *value {
                FilterValue::Int(v) => builder.push_bind(v),
                FilterValue::Bool(v) => builder.push_bind(v),
            };
        }
        builder
    }

    fn count_query(&self) -> QueryBuilder<'static, Sqlite> {
        self.select("COUNT(*)")
    }

    fn page_query(&self, offset: i64, limit: i64) -> QueryBuilder<'static, Sqlite> {
        let mut builder = self.select("*");
        builder.push(" ORDER BY id DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);
        builder
    }

    fn id_at_query(&self, offset: i64) -> QueryBuilder<'static, Sqlite> {
        let mut builder = self.select("id");
        builder.push(" ORDER BY id DESC LIMIT 1 OFFSET ");
        builder.push_bind(offset);
        builder
    }

    fn from_id_query(&self, max_id: i64, limit: i64) -> QueryBuilder<'static, Sqlite> {
        let mut builder = self.select("*");
        builder.push(" AND id <= ");
        builder.push_bind(max_id);
        builder.push(" ORDER BY id DESC LIMIT ");
        builder.push_bind(limit);
        builder
    }
}

/// Row source the paginator pulls from.
#[async_trait]
pub trait PageSource: Send {
    type Item: Send;

    async fn count(&mut self) -> HarborResult<i64>;

    async fn fetch(&mut self, offset: i64, limit: i64) -> HarborResult<Vec<Self::Item>>;

    /// Id of the row at `offset`, if any.
    async fn id_at(&mut self, offset: i64) -> HarborResult<Option<i64>>;

    /// Up to `limit` rows with `id <= max_id`, newest first.
    async fn fetch_from_id(&mut self, max_id: i64, limit: i64) -> HarborResult<Vec<Self::Item>>;
}

/// [`PageSource`] that runs a [`ListQuery`] on a SQLite connection.
pub struct SqlSource<'c, T> {
    conn: &'c mut SqliteConnection,
    query: ListQuery,
    _row: PhantomData<fn() -> T>,
}

impl<'c, T> SqlSource<'c, T> {
    pub fn new(conn: &'c mut SqliteConnection, query: ListQuery) -> Self {
        Self {
            conn,
            query,
            _row: PhantomData,
        }
    }
}

#[async_trait]
impl<T> PageSource for SqlSource<'_, T>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin + 'static,
{
    type Item = T;

    async fn count(&mut self) -> HarborResult<i64> {
        let mut builder = self.query.count_query();
        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    async fn fetch(&mut self, offset: i64, limit: i64) -> HarborResult<Vec<T>> {
        let mut builder = self.query.page_query(offset, limit);
        Ok(builder
            .build_query_as::<T>()
            .fetch_all(&mut *self.conn)
            .await?)
    }

    async fn id_at(&mut self, offset: i64) -> HarborResult<Option<i64>> {
        let mut builder = self.query.id_at_query(offset);
        Ok(builder
            .build_query_scalar::<i64>()
            .fetch_optional(&mut *self.conn)
            .await?)
    }

    async fn fetch_from_id(&mut self, max_id: i64, limit: i64) -> HarborResult<Vec<T>> {
        let mut builder = self.query.from_id_query(max_id, limit);
        Ok(builder
            .build_query_as::<T>()
            .fetch_all(&mut *self.conn)
            .await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Naive,
    /// Skip-probe once the row count exceeds `threshold`.
    Optimized { threshold: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    pub limit: i64,
    pub offset: i64,
    pub strategy: Strategy,
}

impl Paginator {
    pub fn new(limit: i64, offset: i64) -> HarborResult<Self> {
        if limit <= 0 {
            return Err(HarborError::invalid("limit must be a positive integer"));
        }
        if offset < 0 {
            return Err(HarborError::invalid("offset must not be negative"));
        }
        Ok(Self {
            limit,
            offset,
            strategy: Strategy::Naive,
        })
    }

    pub fn optimized(mut self, threshold: i64) -> Self {
        self.strategy = Strategy::Optimized { threshold };
        self
    }

    pub async fn paginate<S: PageSource>(&self, source: &mut S) -> HarborResult<Page<S::Item>> {
        let count = source.count().await?;
        let items = if count == 0 || self.offset >= count {
            Vec::new()
        } else {
            match self.strategy {
                Strategy::Optimized { threshold } if count > threshold => {
                    debug!("skip-probe pagination at offset {}", self.offset);
                    match source.id_at(self.offset).await? {
                        Some(id) => source.fetch_from_id(id, self.limit).await?,
                        None => Vec::new(),
                    }
                }
                _ => source.fetch(self.offset, self.limit).await?,
            }
        };
        Ok(Page {
            items,
            count,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageNumbers {
    pub current: i64,
    #[serde(rename = "final")]
    pub final_page: i64,
}

impl<T> Page<T> {
    pub fn page_numbers(&self) -> PageNumbers {
        let skipped = self.offset / self.limit;
        let remaining = (self.count - self.offset).max(0);
        let final_page = (remaining.div_euclid(self.limit) + i64::from(remaining % self.limit != 0))
            .saturating_add(skipped)
            .max(1);
        let current = skipped.saturating_add(1).min(final_page);
        PageNumbers {
            current,
            final_page,
        }
    }

    pub fn has_previous(&self) -> bool {
        self.offset > 0
    }

    pub fn has_next(&self) -> bool {
        self.offset.saturating_add(self.limit) < self.count
    }

    pub fn previous_link(&self, uri: &Uri, host: Option<&str>) -> Option<String> {
        if !self.has_previous() {
            return None;
        }
        let (offset, limit) = if self.offset < self.limit {
            (0, self.offset)
        } else {
            (self.offset - self.limit, self.limit)
        };
        Some(rewrite_paging(uri, host, offset, limit))
    }

    pub fn next_link(&self, uri: &Uri, host: Option<&str>) -> Option<String> {
        if !self.has_next() {
            return None;
        }
        Some(rewrite_paging(
            uri,
            host,
            self.offset.saturating_add(self.limit),
            self.limit,
        ))
    }
}

/// Rebuild the request URL with new `offset`/`limit`, keeping every other
/// query parameter as sent.
fn rewrite_paging(uri: &Uri, host: Option<&str>, offset: i64, limit: i64) -> String {
    let mut pairs: Vec<String> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            let key = urlencoding::decode(key).map(|k| k.into_owned()).unwrap_or_default();
            key != "offset" && key != "limit"
        })
        .map(str::to_string)
        .collect();
    pairs.push(format!("offset={offset}"));
    pairs.push(format!("limit={limit}"));

    let path_and_query = format!("{}?{}", uri.path(), pairs.join("&"));
    match host {
        Some(host) => format!("http://{host}{path_and_query}"),
        None => path_and_query,
    }
}
