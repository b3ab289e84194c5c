//! Persisted route definitions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::PipelineResult;

/// A named, declaratively defined processing route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Route key.
    pub key: String,

    /// Opaque route definition understood by the engine.
    pub content: String,
}

impl Route {
    /// Create a route definition.
    pub fn new(key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
        }
    }
}

/// Storage of route definitions.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// All persisted routes, ordered by key.
    async fn find_all(&self) -> PipelineResult<Vec<Route>>;

    /// The persisted route with the given key.
    async fn find(&self, key: &str) -> PipelineResult<Option<Route>>;
}

/// Route store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryRouteStore {
    routes: RwLock<BTreeMap<String, Route>>,
}

impl InMemoryRouteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given routes.
    pub fn with_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            routes: RwLock::new(routes.into_iter().map(|r| (r.key.clone(), r)).collect()),
        }
    }

    /// Insert or replace a route.
    pub async fn save(&self, route: Route) {
        self.routes.write().await.insert(route.key.clone(), route);
    }

    /// Remove a route. Returns the removed definition.
    pub async fn remove(&self, key: &str) -> Option<Route> {
        self.routes.write().await.remove(key)
    }

    /// Number of stored routes.
    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }
}

#[async_trait]
impl RouteStore for InMemoryRouteStore {
    async fn find_all(&self) -> PipelineResult<Vec<Route>> {
        Ok(self.routes.read().await.values().cloned().collect())
    }

    async fn find(&self, key: &str) -> PipelineResult<Option<Route>> {
        Ok(self.routes.read().await.get(key).cloned())
    }
}

#[cfg(feature = "postgres")]
pub use postgres::PgRouteStore;

#[cfg(feature = "postgres")]
mod postgres {
    use async_trait::async_trait;
    use sqlx::PgPool;
    use tracing::instrument;

    use super::{Route, RouteStore};
    use crate::error::PipelineResult;

    /// Route store backed by the `provisioning_routes` table.
    ///
    /// ```sql
    /// CREATE TABLE provisioning_routes (
    ///     key        TEXT PRIMARY KEY,
    ///     content    TEXT NOT NULL,
    ///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    /// );
    /// ```
    #[derive(Debug, Clone)]
    pub struct PgRouteStore {
        pool: PgPool,
    }

    impl PgRouteStore {
        /// Create a new store.
        #[must_use]
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        /// Insert or replace a route.
        #[instrument(skip(self, route), fields(route_key = %route.key))]
        pub async fn save(&self, route: &Route) -> PipelineResult<()> {
            sqlx::query(
                r"
                INSERT INTO provisioning_routes (key, content)
                VALUES ($1, $2)
                ON CONFLICT (key) DO UPDATE SET content = EXCLUDED.content, updated_at = NOW()
                ",
            )
            .bind(&route.key)
            .bind(&route.content)
            .execute(&self.pool)
            .await?;

            Ok(())
        }
    }

    #[derive(sqlx::FromRow)]
    struct RouteRow {
        key: String,
        content: String,
    }

    impl From<RouteRow> for Route {
        fn from(row: RouteRow) -> Self {
            Route::new(row.key, row.content)
        }
    }

    #[async_trait]
    impl RouteStore for PgRouteStore {
        #[instrument(skip(self))]
        async fn find_all(&self) -> PipelineResult<Vec<Route>> {
            let rows: Vec<RouteRow> = sqlx::query_as(
                r"
                SELECT key, content
                FROM provisioning_routes
                ORDER BY key
                ",
            )
            .fetch_all(&self.pool)
            .await?;

            Ok(rows.into_iter().map(Route::from).collect())
        }

        #[instrument(skip(self))]
        async fn find(&self, key: &str) -> PipelineResult<Option<Route>> {
            let row: Option<RouteRow> = sqlx::query_as(
                r"
                SELECT key, content
                FROM provisioning_routes
                WHERE key = $1
                ",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

            Ok(row.map(Route::from))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_all_ordered_by_key() {
        let store = InMemoryRouteStore::with_routes(vec![
            Route::new("updateUser", "{}"),
            Route::new("createUser", "{}"),
        ]);

        let keys: Vec<String> = store
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["createUser", "updateUser"]);
    }

    #[tokio::test]
    async fn test_save_replaces_content() {
        let store = InMemoryRouteStore::new();
        store.save(Route::new("createUser", "v1")).await;
        store.save(Route::new("createUser", "v2")).await;

        assert_eq!(store.len().await, 1);
        let route = store.find("createUser").await.unwrap().unwrap();
        assert_eq!(route.content, "v2");
    }

    #[tokio::test]
    async fn test_find_missing() {
        let store = InMemoryRouteStore::new();
        assert!(store.find("deleteUser").await.unwrap().is_none());
        assert!(store.is_empty().await);
        assert!(store.remove("deleteUser").await.is_none());
    }
}
