//! Database migrations
//!
//! This module manages the SQLite schema for the knowledge graph store.
//! Migrations are versioned and applied automatically on database connection.
//!
//! The schema has two layers:
//! - Base ingestion tables (commands, flags, sources, resources,
//!   resource_fields, resource_field_targets, summary_resource_targets,
//!   summary_sources) populated by the loaders with upsert-by-identity
//!   semantics.
//! - Derived tables (command_resource_links, command_field_links,
//!   command_filter_paths, summary_dimensions, summary_metrics,
//!   command_summary_dimensions, command_summary_metrics) that are deleted
//!   and rebuilt on every compile run.
//!
//! Similarity scoring is exposed as read-only views over these tables, so
//! scores always reflect the current store state.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: knowledge graph schema (tables + derived views)
const MIGRATION_V1: &str = r#"
    -- Commands ingested from artifacts; identity is a stable hash of
    -- the command's full path string.
    CREATE TABLE IF NOT EXISTS commands (
        id TEXT PRIMARY KEY,
        full_path TEXT NOT NULL,
        description TEXT NOT NULL,
        permissions TEXT,
        side_effects TEXT,
        validation_notes TEXT
    );

    CREATE TABLE IF NOT EXISTS flags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        command_id TEXT NOT NULL,
        name TEXT NOT NULL,
        aliases TEXT,
        required INTEGER NOT NULL,
        type TEXT NOT NULL,
        description TEXT NOT NULL,
        default_value TEXT,
        validation TEXT,
        FOREIGN KEY(command_id) REFERENCES commands(id)
    );

    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        command_id TEXT NOT NULL,
        repo_name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        FOREIGN KEY(command_id) REFERENCES commands(id)
    );

    CREATE TABLE IF NOT EXISTS resources (
        name TEXT PRIMARY KEY,
        label_fields TEXT,
        server_types TEXT
    );

    CREATE TABLE IF NOT EXISTS resource_fields (
        resource TEXT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        description TEXT,
        is_label INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (resource, name),
        FOREIGN KEY(resource) REFERENCES resources(name)
    );

    CREATE TABLE IF NOT EXISTS resource_field_targets (
        resource TEXT NOT NULL,
        field TEXT NOT NULL,
        target_resource TEXT NOT NULL,
        PRIMARY KEY (resource, field, target_resource),
        FOREIGN KEY(resource) REFERENCES resources(name)
    );

    CREATE TABLE IF NOT EXISTS command_resource_links (
        command_id TEXT NOT NULL,
        resource TEXT NOT NULL,
        verb TEXT NOT NULL,
        command_kind TEXT NOT NULL,
        source TEXT NOT NULL,
        evidence TEXT,
        PRIMARY KEY (command_id, resource, verb, command_kind, source),
        FOREIGN KEY(command_id) REFERENCES commands(id)
    );

    CREATE TABLE IF NOT EXISTS command_field_links (
        command_id TEXT NOT NULL,
        resource TEXT NOT NULL,
        field TEXT NOT NULL,
        field_kind TEXT NOT NULL,
        relation TEXT NOT NULL,
        flag_name TEXT NOT NULL,
        match_kind TEXT NOT NULL,
        modifier TEXT,
        PRIMARY KEY (command_id, resource, field, relation, flag_name),
        FOREIGN KEY(command_id) REFERENCES commands(id)
    );

    CREATE TABLE IF NOT EXISTS command_filter_paths (
        command_id TEXT NOT NULL,
        resource TEXT NOT NULL,
        flag_name TEXT NOT NULL,
        path TEXT NOT NULL,
        target_resource TEXT NOT NULL,
        target_field TEXT,
        hop_count INTEGER NOT NULL,
        match_kind TEXT NOT NULL,
        modifier TEXT,
        source TEXT NOT NULL,
        PRIMARY KEY (command_id, flag_name, path),
        FOREIGN KEY(command_id) REFERENCES commands(id)
    );

    CREATE TABLE IF NOT EXISTS summary_resource_targets (
        summary_resource TEXT NOT NULL,
        primary_resource TEXT NOT NULL,
        condition TEXT,
        PRIMARY KEY (summary_resource, primary_resource, condition),
        FOREIGN KEY(summary_resource) REFERENCES resources(name),
        FOREIGN KEY(primary_resource) REFERENCES resources(name)
    );

    CREATE TABLE IF NOT EXISTS summary_sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        summary_resource TEXT NOT NULL,
        repo_name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        FOREIGN KEY(summary_resource) REFERENCES resources(name)
    );

    CREATE TABLE IF NOT EXISTS summary_dimensions (
        summary_resource TEXT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        source_path TEXT NOT NULL,
        PRIMARY KEY (summary_resource, name, kind),
        FOREIGN KEY(summary_resource) REFERENCES resources(name)
    );

    CREATE TABLE IF NOT EXISTS summary_metrics (
        summary_resource TEXT NOT NULL,
        name TEXT NOT NULL,
        source_path TEXT NOT NULL,
        PRIMARY KEY (summary_resource, name),
        FOREIGN KEY(summary_resource) REFERENCES resources(name)
    );

    CREATE TABLE IF NOT EXISTS command_summary_dimensions (
        command_id TEXT NOT NULL,
        summary_resource TEXT NOT NULL,
        name TEXT NOT NULL,
        source_path TEXT NOT NULL,
        PRIMARY KEY (command_id, summary_resource, name),
        FOREIGN KEY(command_id) REFERENCES commands(id),
        FOREIGN KEY(summary_resource) REFERENCES resources(name)
    );

    CREATE TABLE IF NOT EXISTS command_summary_metrics (
        command_id TEXT NOT NULL,
        summary_resource TEXT NOT NULL,
        name TEXT NOT NULL,
        source_path TEXT NOT NULL,
        PRIMARY KEY (command_id, summary_resource, name),
        FOREIGN KEY(command_id) REFERENCES commands(id),
        FOREIGN KEY(summary_resource) REFERENCES resources(name)
    );

    -- Derived views. These are never materialized; downstream tools read
    -- them directly so they always reflect current table contents.

    CREATE VIEW IF NOT EXISTS command_resources AS
    SELECT
        id AS command_id,
        full_path,
        CASE
            WHEN full_path LIKE 'view % list'
                THEN substr(full_path, 6, instr(substr(full_path, 6), ' ') - 1)
            WHEN full_path LIKE 'view % show'
                THEN substr(full_path, 6, instr(substr(full_path, 6), ' ') - 1)
        END AS resource,
        CASE
            WHEN full_path LIKE 'view % list' THEN 'list'
            WHEN full_path LIKE 'view % show' THEN 'show'
        END AS verb
    FROM commands
    WHERE full_path LIKE 'view % list' OR full_path LIKE 'view % show';

    CREATE VIEW IF NOT EXISTS resource_graph_edges AS
    SELECT
        resource AS source_resource,
        field AS relationship,
        target_resource,
        'relationship' AS edge_kind,
        NULL AS condition
    FROM resource_field_targets
    UNION ALL
    SELECT
        summary_resource AS source_resource,
        'summarizes' AS relationship,
        primary_resource AS target_resource,
        'summary' AS edge_kind,
        condition
    FROM summary_resource_targets;

    CREATE VIEW IF NOT EXISTS resource_filter_path_neighbors AS
    SELECT
        resource AS source_resource,
        target_resource,
        path,
        target_field,
        hop_count,
        match_kind,
        modifier,
        COUNT(DISTINCT command_id) AS command_count,
        COUNT(DISTINCT flag_name) AS flag_count
    FROM command_filter_paths
    GROUP BY resource, target_resource, path, target_field, hop_count, match_kind, modifier;

    CREATE VIEW IF NOT EXISTS summary_resource_features AS
    SELECT
        summary_resource,
        'summary_dimension' AS feature_kind,
        name AS feature_name,
        kind AS feature_detail,
        source_path
    FROM summary_dimensions
    UNION ALL
    SELECT
        summary_resource,
        'summary_metric' AS feature_kind,
        name AS feature_name,
        NULL AS feature_detail,
        source_path
    FROM summary_metrics;

    CREATE VIEW IF NOT EXISTS summary_resource_neighbors AS
    SELECT
        summary_resource AS source_resource,
        primary_resource AS target_resource,
        condition,
        'summary' AS edge_kind
    FROM summary_resource_targets
    UNION ALL
    SELECT
        primary_resource AS source_resource,
        summary_resource AS target_resource,
        condition,
        'summary_of' AS edge_kind
    FROM summary_resource_targets;

    CREATE VIEW IF NOT EXISTS resource_feature_links AS
    SELECT
        resource,
        'command_field' AS feature_kind,
        field AS feature_name,
        relation AS feature_detail,
        command_id AS source_ref
    FROM command_field_links
    UNION ALL
    SELECT
        summary_resource AS resource,
        'summary_dimension' AS feature_kind,
        name AS feature_name,
        kind AS feature_detail,
        source_path AS source_ref
    FROM summary_dimensions
    UNION ALL
    SELECT
        summary_resource AS resource,
        'summary_metric' AS feature_kind,
        name AS feature_name,
        NULL AS feature_detail,
        source_path AS source_ref
    FROM summary_metrics
    UNION ALL
    SELECT
        resource,
        'filter_target' AS feature_kind,
        target_resource AS feature_name,
        path AS feature_detail,
        command_id AS source_ref
    FROM command_filter_paths;

    CREATE VIEW IF NOT EXISTS resource_feature_similarity AS
    WITH distinct_features AS (
        SELECT DISTINCT
            resource,
            feature_kind,
            feature_name,
            COALESCE(feature_detail, '') AS feature_detail
        FROM resource_feature_links
    )
    SELECT
        a.resource AS source_resource,
        b.resource AS target_resource,
        a.feature_kind,
        COUNT(*) AS shared_features
    FROM distinct_features a
    JOIN distinct_features b
        ON a.feature_kind = b.feature_kind
        AND a.feature_name = b.feature_name
        AND a.feature_detail = b.feature_detail
        AND a.resource < b.resource
    GROUP BY a.resource, b.resource, a.feature_kind;

    CREATE VIEW IF NOT EXISTS resource_neighbor_components AS
    WITH symmetric_components AS (
        SELECT
            source_resource,
            target_resource,
            CASE feature_kind
                WHEN 'command_field' THEN 'shared_command_field'
                WHEN 'summary_dimension' THEN 'shared_summary_dimension'
                WHEN 'summary_metric' THEN 'shared_summary_metric'
                WHEN 'filter_target' THEN 'shared_filter_target'
                ELSE feature_kind
            END AS component_kind,
            shared_features AS component_count,
            NULL AS detail
        FROM resource_feature_similarity
    ),
    direct_components AS (
        SELECT
            source_resource,
            target_resource,
            CASE edge_kind
                WHEN 'summary' THEN 'summary'
                ELSE 'relationship'
            END AS component_kind,
            1 AS component_count,
            CASE
                WHEN edge_kind = 'summary' AND condition IS NOT NULL THEN condition
                ELSE relationship
            END AS detail
        FROM resource_graph_edges
        UNION ALL
        SELECT
            source_resource,
            target_resource,
            'filter_path' AS component_kind,
            flag_count AS component_count,
            path AS detail
        FROM resource_filter_path_neighbors
    )
    SELECT source_resource, target_resource, component_kind, component_count, detail
    FROM direct_components
    UNION ALL
    SELECT source_resource, target_resource, component_kind, component_count, detail
    FROM symmetric_components
    UNION ALL
    SELECT target_resource AS source_resource,
           source_resource AS target_resource,
           component_kind,
           component_count,
           detail
    FROM symmetric_components;

    CREATE VIEW IF NOT EXISTS resource_neighbor_scores AS
    WITH weights(component_kind, weight) AS (
        VALUES
            ('relationship', 3.0),
            ('summary', 2.5),
            ('filter_path', 1.5),
            ('shared_command_field', 1.0),
            ('shared_summary_dimension', 0.8),
            ('shared_summary_metric', 0.8),
            ('shared_filter_target', 0.5)
    ),
    components AS (
        SELECT
            source_resource,
            target_resource,
            component_kind,
            CASE WHEN component_count > 10 THEN 10 ELSE component_count END AS capped_count
        FROM resource_neighbor_components
    ),
    scored AS (
        SELECT
            c.source_resource,
            c.target_resource,
            c.component_kind,
            c.capped_count,
            w.weight,
            (c.capped_count * w.weight) AS component_score
        FROM components c
        JOIN weights w ON w.component_kind = c.component_kind
    )
    SELECT
        source_resource,
        target_resource,
        SUM(component_score) AS score,
        SUM(capped_count) AS evidence_count,
        SUM(CASE WHEN component_kind = 'relationship' THEN capped_count ELSE 0 END) AS relationship_count,
        SUM(CASE WHEN component_kind = 'summary' THEN capped_count ELSE 0 END) AS summary_count,
        SUM(CASE WHEN component_kind = 'filter_path' THEN capped_count ELSE 0 END) AS filter_path_count,
        SUM(CASE WHEN component_kind = 'shared_command_field' THEN capped_count ELSE 0 END)
            AS shared_command_field_count,
        SUM(CASE WHEN component_kind = 'shared_summary_dimension' THEN capped_count ELSE 0 END)
            AS shared_summary_dimension_count,
        SUM(CASE WHEN component_kind = 'shared_summary_metric' THEN capped_count ELSE 0 END)
            AS shared_summary_metric_count,
        SUM(CASE WHEN component_kind = 'shared_filter_target' THEN capped_count ELSE 0 END)
            AS shared_filter_target_count
    FROM scored
    GROUP BY source_resource, target_resource;
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // Get the latest version
    let row: Option<(i32,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Knowledge graph schema");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        // Should start with no migrations
        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        // Run migrations
        run_migrations(&pool).await.unwrap();

        // Should be at current version
        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        // Run migrations twice
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables = vec![
            "commands",
            "flags",
            "sources",
            "resources",
            "resource_fields",
            "resource_field_targets",
            "command_resource_links",
            "command_field_links",
            "command_filter_paths",
            "summary_resource_targets",
            "summary_sources",
            "summary_dimensions",
            "summary_metrics",
            "command_summary_dimensions",
            "command_summary_metrics",
        ];

        for table in tables {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_views_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let views = vec![
            "command_resources",
            "resource_graph_edges",
            "resource_filter_path_neighbors",
            "summary_resource_features",
            "summary_resource_neighbors",
            "resource_feature_links",
            "resource_feature_similarity",
            "resource_neighbor_components",
            "resource_neighbor_scores",
        ];

        for view in views {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", view))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("View {} should exist", view));
            assert_eq!(result.0, 0, "View {} should be empty", view);
        }
    }

    #[tokio::test]
    async fn test_neighbor_scores_weighting() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO resources (name, label_fields) VALUES ('invoices', '[]'), ('customers', '[]')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO resource_fields (resource, name, kind) VALUES ('invoices', 'customer', 'relationship')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO resource_field_targets (resource, field, target_resource) \
             VALUES ('invoices', 'customer', 'customers')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let (score,): (f64,) = sqlx::query_as(
            "SELECT score FROM resource_neighbor_scores \
             WHERE source_resource = 'invoices' AND target_resource = 'customers'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        // A single declared relationship carries weight 3.0
        assert_eq!(score, 3.0);
    }
}
