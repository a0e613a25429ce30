//! Compilation pipeline
//!
//! Runs the full artifact-to-knowledge-graph build in dependency order:
//! schema maps first, then artifacts, then classification, then the
//! derived link tables. Every derived stage rebuilds from scratch, so a
//! second compile over unchanged inputs produces identical contents.

use std::path::PathBuf;

use tracing::info;

use crate::classify::build_command_resource_links;
use crate::error::Result;
use crate::ingest::{
    apply_resource_map, apply_summary_map, ingest_artifacts, load_resource_map, load_summary_map,
};
use crate::matcher::build_command_field_links;
use crate::matcher::fallback::FallbackResolver;
use crate::paths::build_command_filter_paths;
use crate::scan::{SummarySourceScanner, build_command_summary_links, build_summary_dimensions};
use crate::storage::Database;

/// Inputs for one compilation run
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Directory of command artifact JSON files
    pub artifacts_dir: PathBuf,
    /// Path to the resource map (required)
    pub resource_map: PathBuf,
    /// Path to the summary map (optional on disk; absent means empty)
    pub summary_map: PathBuf,
    /// CLI repo checkout, used for summarize endpoint sniffing
    pub cli_root: Option<PathBuf>,
    /// Maximum relationship hops for filter path resolution
    pub max_hops: usize,
}

/// What one compilation run produced
#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    pub artifacts_ingested: usize,
    pub artifacts_skipped: usize,
    pub resource_links: u64,
    pub field_links_deterministic: usize,
    pub field_links_fallback: usize,
    pub flags_unmatched: usize,
    pub filter_paths: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// Compile artifacts and schema maps into the knowledge graph.
///
/// `fallback` enables LLM flag mapping for flags the deterministic rules
/// cannot place; `scanner` supplies summary dimensions and metrics from
/// server sources. Either can be a no-op without affecting the rest of
/// the pipeline.
pub async fn compile(
    db: &Database,
    options: &CompileOptions,
    fallback: Option<&mut FallbackResolver>,
    scanner: &dyn SummarySourceScanner,
) -> Result<CompileReport> {
    let mut report = CompileReport::default();

    // Schema maps before artifacts: a missing resource map is fatal,
    // everything downstream keys off the resource set it defines.
    let resource_map = load_resource_map(&options.resource_map)?;
    apply_resource_map(db.pool(), &resource_map).await?;
    let summary_map = load_summary_map(&options.summary_map)?;
    apply_summary_map(db.pool(), &summary_map).await?;

    let ingest = ingest_artifacts(db.pool(), &options.artifacts_dir).await?;
    report.artifacts_ingested = ingest.inserted;
    report.artifacts_skipped = ingest.skipped;

    report.resource_links =
        build_command_resource_links(db.pool(), options.cli_root.as_deref()).await?;

    build_summary_dimensions(db.pool(), scanner).await?;
    build_command_summary_links(db.pool()).await?;

    let field_report = build_command_field_links(db.pool(), fallback).await?;
    report.field_links_deterministic = field_report.deterministic;
    report.field_links_fallback = field_report.fallback;
    report.flags_unmatched = field_report.unmatched;
    report.cache_hits = field_report.cache_hits;
    report.cache_misses = field_report.cache_misses;

    report.filter_paths = build_command_filter_paths(db.pool(), options.max_hops).await?;

    info!(
        artifacts = report.artifacts_ingested,
        resource_links = report.resource_links,
        field_links = report.field_links_deterministic + report.field_links_fallback,
        filter_paths = report.filter_paths,
        "Compilation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::NullScanner;

    fn write(path: &std::path::Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn options(root: &std::path::Path) -> CompileOptions {
        CompileOptions {
            artifacts_dir: root.join("artifacts"),
            resource_map: root.join("resource_map.json"),
            summary_map: root.join("summary_map.json"),
            cli_root: None,
            max_hops: 3,
        }
    }

    fn seed_inputs(root: &std::path::Path) {
        write(
            &root.join("resource_map.json"),
            r#"{
                "resources": {
                    "invoices": {"attributes": ["status", "total"]},
                    "customers": {"attributes": ["segment"]}
                },
                "relationships": {
                    "invoices": {"customer": {"resources": ["customers"]}}
                }
            }"#,
        );
        write(
            &root.join("artifacts/view_invoices_list.json"),
            r#"{
                "full_path": "view invoices list",
                "flags": [
                    {"name": "--status", "required": false, "type": "string", "description": "filter by status"},
                    {"name": "--segment", "required": false, "type": "string", "description": "filter by customer segment"}
                ]
            }"#,
        );
    }

    #[tokio::test]
    async fn test_compile_end_to_end_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        seed_inputs(dir.path());
        let db = Database::in_memory().await.unwrap();

        let report = compile(&db, &options(dir.path()), None, &NullScanner)
            .await
            .unwrap();

        assert_eq!(report.artifacts_ingested, 1);
        assert_eq!(report.resource_links, 1);
        assert_eq!(report.field_links_deterministic, 1);
        // --segment resolves through the relationship graph instead
        assert_eq!(report.filter_paths, 1);
    }

    #[tokio::test]
    async fn test_missing_resource_map_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().await.unwrap();

        let result = compile(&db, &options(dir.path()), None, &NullScanner).await;
        assert!(matches!(
            result,
            Err(crate::Error::ResourceMapMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_recompile_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        seed_inputs(dir.path());
        let db = Database::in_memory().await.unwrap();

        compile(&db, &options(dir.path()), None, &NullScanner)
            .await
            .unwrap();
        let counts_before = table_counts(&db).await;
        compile(&db, &options(dir.path()), None, &NullScanner)
            .await
            .unwrap();
        let counts_after = table_counts(&db).await;

        assert_eq!(counts_before, counts_after);
    }

    async fn table_counts(db: &Database) -> Vec<(String, i64)> {
        let tables = [
            "commands",
            "flags",
            "resources",
            "resource_fields",
            "command_resource_links",
            "command_field_links",
            "command_filter_paths",
        ];
        let mut counts = Vec::new();
        for table in tables {
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(db.pool())
                .await
                .unwrap();
            counts.push((table.to_string(), count));
        }
        counts
    }
}
