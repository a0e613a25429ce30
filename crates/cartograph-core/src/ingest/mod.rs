//! Ingestion: artifacts and schema maps into the store
//!
//! Base tables use upsert-by-identity semantics: each command is replaced
//! wholesale (its flags and sources deleted and reinserted) so re-ingesting
//! a subset of artifacts never loses unrelated data. The resource and
//! summary maps are single authoritative files, so their tables are fully
//! replaced on every load.

use std::collections::HashSet;
use std::path::Path;

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::artifact::{CommandArtifact, ResourceMap, SummaryMap};
use crate::error::{Error, Result};

/// Outcome of an artifact ingestion pass
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Ingest every artifact JSON file under `dir`.
///
/// Malformed or invalid files are skipped and logged; ingestion is
/// isolated per artifact. Files are visited in sorted order so repeated
/// runs ingest identically.
pub async fn ingest_artifacts(pool: &SqlitePool, dir: &Path) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut paths = Vec::new();
    collect_json_files(dir, &mut paths)?;
    paths.sort();

    for path in paths {
        let artifact = match read_artifact(&path) {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Skipping artifact");
                report.skipped += 1;
                continue;
            }
        };
        upsert_artifact(pool, &artifact).await?;
        report.inserted += 1;
    }

    info!(
        inserted = report.inserted,
        skipped = report.skipped,
        "Artifact ingestion finished"
    );
    Ok(report)
}

fn collect_json_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

fn read_artifact(path: &Path) -> Result<CommandArtifact> {
    let contents = std::fs::read_to_string(path)?;
    let artifact: CommandArtifact = serde_json::from_str(&contents)?;
    artifact.validate()
}

/// Upsert one command and fully replace its flags and sources
pub async fn upsert_artifact(pool: &SqlitePool, artifact: &CommandArtifact) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO commands (
            id, full_path, description, permissions, side_effects, validation_notes
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&artifact.id)
    .bind(&artifact.full_path)
    .bind(&artifact.description)
    .bind(&artifact.permissions)
    .bind(&artifact.side_effects)
    .bind(&artifact.validation_notes)
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM flags WHERE command_id = ?")
        .bind(&artifact.id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM sources WHERE command_id = ?")
        .bind(&artifact.id)
        .execute(pool)
        .await?;

    for flag in &artifact.flags {
        let aliases = match &flag.aliases {
            Some(aliases) if !aliases.is_empty() => Some(serde_json::to_string(aliases)?),
            _ => None,
        };
        sqlx::query(
            r#"
            INSERT INTO flags (
                command_id, name, aliases, required, type, description, default_value, validation
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&artifact.id)
        .bind(&flag.name)
        .bind(aliases)
        .bind(flag.required)
        .bind(&flag.flag_type)
        .bind(&flag.description)
        .bind(&flag.default)
        .bind(&flag.validation)
        .execute(pool)
        .await?;
    }

    for source in &artifact.sources {
        sqlx::query("INSERT INTO sources (command_id, repo_name, file_path) VALUES (?, ?, ?)")
            .bind(&artifact.id)
            .bind(&source.repo_name)
            .bind(&source.file_path)
            .execute(pool)
            .await?;
    }

    debug!(command_id = %artifact.id, full_path = %artifact.full_path, "Artifact upserted");
    Ok(())
}

/// Load the resource map; missing file is fatal (the compiler cannot run
/// without the base resource graph)
pub fn load_resource_map(path: &Path) -> Result<ResourceMap> {
    if !path.exists() {
        return Err(Error::ResourceMapMissing(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Load the summary map; a missing file is simply an empty map
pub fn load_summary_map(path: &Path) -> Result<SummaryMap> {
    if !path.exists() {
        return Ok(SummaryMap::default());
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Replace the resource schema tables from the resource map.
///
/// Every resource gets the two implicit attributes (`created-at`,
/// `updated-at`). Relationship fields are inserted with kind
/// `relationship`, each with one target row per resource it may point to.
pub async fn apply_resource_map(pool: &SqlitePool, map: &ResourceMap) -> Result<()> {
    sqlx::query("DELETE FROM resource_field_targets").execute(pool).await?;
    sqlx::query("DELETE FROM resource_fields").execute(pool).await?;
    sqlx::query("DELETE FROM resources").execute(pool).await?;

    for (resource_name, spec) in &map.resources {
        let label_fields = serde_json::to_string(&spec.label_fields)?;
        let server_types = if spec.server_types.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&spec.server_types)?)
        };
        sqlx::query("INSERT INTO resources (name, label_fields, server_types) VALUES (?, ?, ?)")
            .bind(resource_name)
            .bind(label_fields)
            .bind(server_types)
            .execute(pool)
            .await?;

        for attr in &spec.attributes {
            sqlx::query(
                r#"
                INSERT INTO resource_fields (resource, name, kind, description, is_label)
                VALUES (?, ?, 'attribute', NULL, ?)
                "#,
            )
            .bind(resource_name)
            .bind(attr)
            .bind(spec.label_fields.contains(attr))
            .execute(pool)
            .await?;
        }

        // Implicit attributes present on every resource
        for common_attr in ["created-at", "updated-at"] {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO resource_fields (resource, name, kind, description, is_label)
                VALUES (?, ?, 'attribute', NULL, 0)
                "#,
            )
            .bind(resource_name)
            .bind(common_attr)
            .execute(pool)
            .await?;
        }
    }

    for (resource_name, rels) in &map.relationships {
        if !map.resources.contains_key(resource_name) {
            warn!(resource = %resource_name, "Relationships reference unknown resource; skipping");
            continue;
        }
        for (rel_name, rel_spec) in rels {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO resource_fields (resource, name, kind, description, is_label)
                VALUES (?, ?, 'relationship', NULL, 0)
                "#,
            )
            .bind(resource_name)
            .bind(rel_name)
            .execute(pool)
            .await?;
            for target in &rel_spec.resources {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO resource_field_targets (resource, field, target_resource)
                    VALUES (?, ?, ?)
                    "#,
                )
                .bind(resource_name)
                .bind(rel_name)
                .bind(target)
                .execute(pool)
                .await?;
            }
        }
    }

    info!(resources = map.resources.len(), "Resource map applied");
    Ok(())
}

/// Replace the summary-resource tables from the summary map.
///
/// Rows referencing resources absent from the store are skipped, never
/// fatal.
pub async fn apply_summary_map(pool: &SqlitePool, map: &SummaryMap) -> Result<()> {
    sqlx::query("DELETE FROM summary_resource_targets").execute(pool).await?;
    sqlx::query("DELETE FROM summary_sources").execute(pool).await?;

    let known: HashSet<String> = sqlx::query_as::<_, (String,)>("SELECT name FROM resources")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(name,)| name)
        .collect();

    for (summary_resource, spec) in &map.summaries {
        if !known.contains(summary_resource) {
            warn!(summary = %summary_resource, "Summary names unknown resource; skipping");
            continue;
        }

        for primary in &spec.primary_resources {
            if !known.contains(primary) {
                continue;
            }
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO summary_resource_targets
                (summary_resource, primary_resource, condition)
                VALUES (?, ?, NULL)
                "#,
            )
            .bind(summary_resource)
            .bind(primary)
            .execute(pool)
            .await?;
        }

        for condition in &spec.conditions {
            let condition_json = match &condition.filter {
                Some(filter) => Some(serde_json::to_string(filter)?),
                None => None,
            };
            for primary in &condition.primary_resources {
                if !known.contains(primary) {
                    continue;
                }
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO summary_resource_targets
                    (summary_resource, primary_resource, condition)
                    VALUES (?, ?, ?)
                    "#,
                )
                .bind(summary_resource)
                .bind(primary)
                .bind(&condition_json)
                .execute(pool)
                .await?;
            }
        }

        for source in &spec.sources {
            sqlx::query(
                "INSERT INTO summary_sources (summary_resource, repo_name, file_path) VALUES (?, ?, ?)",
            )
            .bind(summary_resource)
            .bind(&source.repo_name)
            .bind(&source.file_path)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn setup() -> Database {
        Database::in_memory().await.expect("in-memory db")
    }

    fn sample_artifact() -> CommandArtifact {
        serde_json::from_str(
            r#"{
                "id": "cmd-1",
                "full_path": "view invoices list",
                "description": "List invoices",
                "flags": [
                    {"name": "--status", "required": false, "type": "string", "description": "status"},
                    {"name": "--customer-id", "required": false, "type": "string", "description": "customer"}
                ],
                "sources": [{"repo_name": "cli", "file_path": "internal/cli/invoices_list.go"}]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_flags() {
        let db = setup().await;
        let mut artifact = sample_artifact();
        upsert_artifact(db.pool(), &artifact).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM flags")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);

        // Re-ingest with fewer flags; old flags must not survive
        artifact.flags.truncate(1);
        upsert_artifact(db.pool(), &artifact).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM flags")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let (commands,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM commands")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(commands, 1);
    }

    #[tokio::test]
    async fn test_ingest_skips_malformed_files() {
        let db = setup().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.json"),
            serde_json::to_string(&sample_artifact()).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("empty_path.json"), r#"{"full_path": ""}"#).unwrap();

        let report = ingest_artifacts(db.pool(), dir.path()).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_apply_resource_map_adds_implicit_attributes() {
        let db = setup().await;
        let map: ResourceMap = serde_json::from_str(
            r#"{
                "resources": {"invoices": {"label_fields": ["number"], "attributes": ["number"]}},
                "relationships": {"invoices": {"customer": {"resources": ["customers"]}}}
            }"#,
        )
        .unwrap();
        apply_resource_map(db.pool(), &map).await.unwrap();

        let fields: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, kind FROM resource_fields WHERE resource = 'invoices' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["created-at", "customer", "number", "updated-at"]);

        let (kind,): (String,) = sqlx::query_as(
            "SELECT kind FROM resource_fields WHERE resource = 'invoices' AND name = 'customer'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(kind, "relationship");
    }

    #[tokio::test]
    async fn test_apply_summary_map_skips_unknown_resources() {
        let db = setup().await;
        let resources: ResourceMap = serde_json::from_str(
            r#"{"resources": {"invoices": {}, "invoice-summaries": {}}, "relationships": {}}"#,
        )
        .unwrap();
        apply_resource_map(db.pool(), &resources).await.unwrap();

        let map: SummaryMap = serde_json::from_str(
            r#"{"summaries": {
                "invoice-summaries": {"primary_resources": ["invoices", "ghosts"]},
                "ghost-summaries": {"primary_resources": ["invoices"]}
            }}"#,
        )
        .unwrap();
        apply_summary_map(db.pool(), &map).await.unwrap();

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT summary_resource, primary_resource FROM summary_resource_targets",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(rows, vec![("invoice-summaries".to_string(), "invoices".to_string())]);
    }
}
