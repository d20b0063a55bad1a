//! Database migrations
//!
//! Timestamps are stored as `bigint` epoch milliseconds.

use crate::{DbConfig, DbError, DbResult};
use scylla::Session;
use tracing::{debug, info};

/// Current schema version written to `schema_version`
pub const SCHEMA_VERSION: i32 = 1;

/// Table definitions, applied in order
const TABLES: &[(&str, &str)] = &[
    (
        "batches",
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            batch_id uuid PRIMARY KEY,
            driver_id bigint,
            warehouse_id bigint,
            status text,
            created_at bigint,
            started_at bigint,
            completed_at bigint,
            route_data text,
            total_distance_meters bigint,
            total_duration_seconds bigint,
            current_index int
        )
        "#,
    ),
    (
        "stops_by_batch",
        r#"
        CREATE TABLE IF NOT EXISTS stops_by_batch (
            batch_id uuid,
            stop_sequence int,
            order_id bigint,
            assigned_at bigint,
            PRIMARY KEY (batch_id, stop_sequence)
        ) WITH CLUSTERING ORDER BY (stop_sequence ASC)
        "#,
    ),
    (
        "stops_by_order",
        r#"
        CREATE TABLE IF NOT EXISTS stops_by_order (
            order_id bigint,
            assigned_at bigint,
            batch_id uuid,
            stop_sequence int,
            PRIMARY KEY (order_id, assigned_at, batch_id)
        ) WITH CLUSTERING ORDER BY (assigned_at DESC, batch_id ASC)
        "#,
    ),
    (
        "location_samples",
        r#"
        CREATE TABLE IF NOT EXISTS location_samples (
            batch_id uuid,
            recorded_at bigint,
            path_index int,
            latitude double,
            longitude double,
            address text,
            PRIMARY KEY (batch_id, recorded_at, path_index)
        ) WITH CLUSTERING ORDER BY (recorded_at ASC, path_index ASC)
        "#,
    ),
    (
        "warehouses",
        r#"
        CREATE TABLE IF NOT EXISTS warehouses (
            warehouse_id bigint PRIMARY KEY,
            name text,
            address text,
            latitude double,
            longitude double
        )
        "#,
    ),
    (
        "orders",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id bigint PRIMARY KEY,
            latitude double,
            longitude double,
            delivery_address text,
            status text
        )
        "#,
    ),
    (
        "schema_version",
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id int PRIMARY KEY,
            version int,
            applied_at bigint
        )
        "#,
    ),
];

/// Keyspace DDL for a config
pub fn keyspace_statement(config: &DbConfig) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
         {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        config.keyspace, config.replication_factor
    )
}

/// Create the keyspace; run before the session switches into it
pub async fn create_keyspace(session: &Session, config: &DbConfig) -> DbResult<()> {
    session
        .query_unpaged(keyspace_statement(config), &[])
        .await
        .map_err(|e| DbError::Migration(format!("keyspace {}: {}", config.keyspace, e)))?;
    Ok(())
}

/// Run all migrations
pub async fn run_all(session: &Session) -> DbResult<()> {
    info!("Running database migrations...");

    let version = get_schema_version(session).await;
    info!("Current schema version: {}", version);

    if version >= SCHEMA_VERSION {
        info!("Schema is up to date");
        return Ok(());
    }

    for (name, ddl) in TABLES {
        debug!("Creating table {}", name);
        session
            .query_unpaged(*ddl, &[])
            .await
            .map_err(|e| DbError::Migration(format!("table {}: {}", name, e)))?;
    }

    session
        .query_unpaged(
            "INSERT INTO schema_version (id, version, applied_at) VALUES (1, ?, ?)",
            (SCHEMA_VERSION, chrono::Utc::now().timestamp_millis()),
        )
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    info!("Migrations complete (version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version, 0 when the table does not exist yet
async fn get_schema_version(session: &Session) -> i32 {
    let Ok(result) = session
        .query_unpaged("SELECT version FROM schema_version WHERE id = 1", &[])
        .await
    else {
        return 0;
    };

    result
        .into_rows_result()
        .ok()
        .and_then(|rows| rows.maybe_first_row::<(Option<i32>,)>().ok().flatten())
        .and_then(|(version,)| version)
        .unwrap_or(0)
}

// ============================================================================
// TESTS
// ============================================================================
