//! Test harness for database repository testing.
//!
//! - SQLite: fast in-memory databases with real migrations
//! - PostgreSQL: testcontainers-based instances with real migrations

#[cfg(feature = "database-sqlite")]
use sqlx::SqlitePool;

use crate::db::DbPool;

/// Create an in-memory SQLite pool for testing.
///
/// A single connection, because every `:memory:` connection is its own
/// database.
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// In-memory SQLite `DbPool` with migrations applied.
#[cfg(feature = "database-sqlite")]
pub async fn sqlite_db() -> DbPool {
    let pool = create_sqlite_pool().await;
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(&pool)
        .await
        .expect("Failed to run SQLite migrations");
    DbPool::from_sqlite(pool)
}

/// PostgreSQL test harness using testcontainers.
#[cfg(feature = "database-postgres")]
pub mod postgres {
    use std::sync::OnceLock;

    use sqlx::PgPool;
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    use crate::db::DbPool;

    struct SharedContainer {
        #[allow(dead_code)] // Keeps the container alive for the test run.
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    static SHARED_CONTAINER: OnceLock<OnceCell<SharedContainer>> = OnceLock::new();

    async fn get_shared_container() -> &'static SharedContainer {
        let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
        cell.get_or_init(|| async {
            let container = Postgres::default()
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            SharedContainer {
                container,
                connection_string: format!(
                    "postgres://postgres:postgres@{host}:{port}/postgres"
                ),
            }
        })
        .await
    }

    /// One shared container, one unique schema per test for isolation.
    pub async fn create_isolated_postgres_pool() -> PgPool {
        let shared = get_shared_container().await;

        let admin_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&shared.connection_string)
            .await
            .expect("Failed to connect to PostgreSQL");

        let schema_name = format!("test_{}", uuid::Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA \"{schema_name}\""))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test schema");

        let isolated_url = format!(
            "{}?options=-c search_path={}",
            shared.connection_string, schema_name
        );
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&isolated_url)
            .await
            .expect("Failed to connect to isolated schema")
    }

    /// Isolated PostgreSQL `DbPool` with migrations applied.
    pub async fn postgres_db() -> DbPool {
        let pool = create_isolated_postgres_pool().await;
        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(&pool)
            .await
            .expect("Failed to run PostgreSQL migrations");
        DbPool::from_postgres(pool, None)
    }
}
