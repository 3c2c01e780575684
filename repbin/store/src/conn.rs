//! Connection pooling across the two supported backends.
//!
//! Every CRUD module matches on [`DbConn`] once and calls ordinary `diesel::sql_query`
//! statements against whichever concrete connection it finds — the schema is identical
//! across backends (see [`crate::schema_sql`]), only bind-placeholder syntax differs, so
//! each backend arm carries its own query text, mirroring the original per-driver query maps.

use diesel::r2d2::ConnectionManager;
#[cfg(feature = "sqlite")]
use diesel::r2d2::CustomizeConnection;
#[cfg(feature = "postgres")]
use diesel::PgConnection;
#[cfg(feature = "sqlite")]
use diesel::SqliteConnection;
#[cfg(feature = "sqlite")]
use diesel::connection::SimpleConnection;

use crate::error::{StoreError, StoreResult};

/// SQLite disables foreign-key enforcement per connection by default; without this, the
/// `global_index.message_id ... ON DELETE CASCADE` constraint (`schema_sql.rs`) is inert
/// and expired/fetched rows leave orphaned `global_index` entries behind.
#[cfg(feature = "sqlite")]
#[derive(Debug)]
struct EnableSqliteForeignKeys;

#[cfg(feature = "sqlite")]
impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for EnableSqliteForeignKeys {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub enum DbPool {
    #[cfg(feature = "sqlite")]
    Sqlite(r2d2::Pool<ConnectionManager<SqliteConnection>>),
    #[cfg(feature = "postgres")]
    Postgres(r2d2::Pool<ConnectionManager<PgConnection>>),
}

pub enum DbConn {
    #[cfg(feature = "sqlite")]
    Sqlite(r2d2::PooledConnection<ConnectionManager<SqliteConnection>>),
    #[cfg(feature = "postgres")]
    Postgres(r2d2::PooledConnection<ConnectionManager<PgConnection>>),
}

impl DbPool {
    /// Build a pool for `driver` ("sqlite" or "postgres") against `url`.
    ///
    /// For sqlite, `url` is a filesystem path (or `:memory:`); for postgres it is a
    /// standard `postgres://` connection string.
    pub fn connect(driver: &str, url: &str, max_size: u32) -> StoreResult<Self> {
        match driver {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let manager = ConnectionManager::<SqliteConnection>::new(url);
                let pool = r2d2::Pool::builder()
                    .max_size(max_size)
                    .connection_customizer(Box::new(EnableSqliteForeignKeys))
                    .build(manager)?;
                Ok(DbPool::Sqlite(pool))
            }
            #[cfg(feature = "postgres")]
            "postgres" => {
                let manager = ConnectionManager::<PgConnection>::new(url);
                let pool = r2d2::Pool::builder().max_size(max_size).build(manager)?;
                Ok(DbPool::Postgres(pool))
            }
            other => Err(StoreError::UnsupportedDriver(other.to_string())),
        }
    }

    pub fn get(&self) -> StoreResult<DbConn> {
        match self {
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => Ok(DbConn::Sqlite(pool.get()?)),
            #[cfg(feature = "postgres")]
            DbPool::Postgres(pool) => Ok(DbConn::Postgres(pool.get()?)),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => "postgres",
        }
    }
}
