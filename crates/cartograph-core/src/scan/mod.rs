//! Summary source scanning
//!
//! Summary resources carry no field schema of their own; their group-by
//! dimensions and metrics live in server model source files. The scanner
//! walks those files with line-level heuristics (method blocks bounded by
//! `def`/`end` depth, constant arrays bounded by bracket depth) and pulls
//! out declared attribute and metric names. Everything downstream treats
//! the extracted names as plain strings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::Result;

static ATTRIBUTE_NEW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Attribute\.new\(\s*"([^"]+)""#).unwrap_or_else(|_| unreachable!()));
static METRIC_NEW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Metric\.new\(\s*"([^"]+)""#).unwrap_or_else(|_| unreachable!()));
static ATTRIBUTE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"attribute:\s*"([^"]+)""#).unwrap_or_else(|_| unreachable!()));

/// Dimensions and metrics found in one summary model file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryScan {
    pub dimensions: BTreeSet<String>,
    pub metrics: BTreeSet<String>,
}

/// Seam for reading summary definitions out of server sources
pub trait SummarySourceScanner: Send + Sync {
    /// Scan one repo-relative file path. `Ok(None)` means the file could
    /// not be read and the summary resource should be skipped.
    fn scan_file(&self, relative_path: &str) -> Result<Option<SummaryScan>>;
}

/// Scanner that finds nothing, for compilations without a server checkout
#[derive(Debug, Clone, Copy, Default)]
pub struct NullScanner;

impl SummarySourceScanner for NullScanner {
    fn scan_file(&self, _relative_path: &str) -> Result<Option<SummaryScan>> {
        Ok(None)
    }
}

/// Scans Ruby model files under a server checkout
#[derive(Debug, Clone)]
pub struct RubyModelScanner {
    root: PathBuf,
}

impl RubyModelScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SummarySourceScanner for RubyModelScanner {
    fn scan_file(&self, relative_path: &str) -> Result<Option<SummaryScan>> {
        let abs_path = self.root.join(relative_path);
        let contents = match std::fs::read_to_string(&abs_path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %abs_path.display(), error = %err, "Skipping unreadable summary source");
                return Ok(None);
            }
        };
        let lines: Vec<&str> = contents.lines().collect();

        let mut scan = SummaryScan::default();

        let group_block = extract_constant_block(&lines, "GROUP_BY_ATTRIBUTES");
        scan.dimensions.extend(capture_all(&ATTRIBUTE_KEY, &group_block));

        let metrics_block = extract_constant_block(&lines, "METRICS");
        scan.metrics.extend(capture_all(&ATTRIBUTE_KEY, &metrics_block));

        let summary_attrs = extract_method_block(&lines, "summary_attributes");
        scan.dimensions.extend(capture_all(&ATTRIBUTE_NEW, &summary_attrs));

        let attrs = extract_method_block(&lines, "attributes");
        scan.dimensions.extend(capture_all(&ATTRIBUTE_NEW, &attrs));

        let metrics_method = extract_method_block(&lines, "metrics");
        scan.metrics.extend(capture_all(&METRIC_NEW, &metrics_method));

        Ok(Some(scan))
    }
}

fn capture_all(pattern: &Regex, block: &str) -> BTreeSet<String> {
    pattern
        .captures_iter(block)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Collect the body of a Ruby method, tracking nested `def`/`end` depth
fn extract_method_block(lines: &[&str], method_name: &str) -> String {
    let start = match Regex::new(&format!(r"^\s*def\s+{}\b", regex::escape(method_name))) {
        Ok(pattern) => pattern,
        Err(_) => return String::new(),
    };
    static DEF: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*def\b").unwrap_or_else(|_| unreachable!()));
    static END: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*end\b").unwrap_or_else(|_| unreachable!()));

    let mut collecting = false;
    let mut depth = 0i32;
    let mut block = Vec::new();
    for line in lines {
        if !collecting {
            if start.is_match(line) {
                collecting = true;
                depth = 1;
            }
            continue;
        }
        if DEF.is_match(line) {
            depth += 1;
        }
        if END.is_match(line) {
            depth -= 1;
            if depth == 0 {
                break;
            }
        }
        block.push(*line);
    }
    block.join("\n")
}

/// Collect a Ruby constant assignment, tracking bracket depth
fn extract_constant_block(lines: &[&str], const_name: &str) -> String {
    let start = match Regex::new(&format!(r"\b{}\b\s*=", regex::escape(const_name))) {
        Ok(pattern) => pattern,
        Err(_) => return String::new(),
    };

    let mut collecting = false;
    let mut depth = 0i32;
    let mut block = Vec::new();
    for line in lines {
        if !collecting && start.is_match(line) {
            collecting = true;
        }
        if !collecting {
            continue;
        }
        block.push(*line);
        depth += line.matches('[').count() as i32;
        depth -= line.matches(']').count() as i32;
        if depth <= 0 {
            break;
        }
    }
    block.join("\n")
}

/// Rebuild `summary_dimensions` and `summary_metrics` by scanning each
/// summary resource's server model file
pub async fn build_summary_dimensions(
    pool: &SqlitePool,
    scanner: &dyn SummarySourceScanner,
) -> Result<()> {
    sqlx::query("DELETE FROM summary_dimensions")
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM summary_metrics")
        .execute(pool)
        .await?;

    let source_rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT summary_resource, repo_name, file_path FROM summary_sources \
         ORDER BY summary_resource, file_path",
    )
    .fetch_all(pool)
    .await?;

    let mut summary_files: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (summary_resource, repo_name, file_path) in source_rows {
        if repo_name != "server" || !file_path.ends_with(".rb") {
            continue;
        }
        summary_files.entry(summary_resource).or_default().push(file_path);
    }

    let mut scanned = 0usize;
    for (summary_resource, files) in &summary_files {
        // Prefer the model file; any source is better than none
        let server_path = files
            .iter()
            .find(|path| path.contains("/models/") && path.contains("summary"))
            .unwrap_or(&files[0]);

        let Some(scan) = scanner.scan_file(server_path)? else {
            continue;
        };
        scanned += 1;

        for name in &scan.dimensions {
            sqlx::query(
                "INSERT OR IGNORE INTO summary_dimensions \
                 (summary_resource, name, kind, source_path) VALUES (?, ?, 'group_by', ?)",
            )
            .bind(summary_resource)
            .bind(name)
            .bind(server_path)
            .execute(pool)
            .await?;
        }
        for name in &scan.metrics {
            sqlx::query(
                "INSERT OR IGNORE INTO summary_metrics \
                 (summary_resource, name, source_path) VALUES (?, ?, ?)",
            )
            .bind(summary_resource)
            .bind(name)
            .bind(server_path)
            .execute(pool)
            .await?;
        }
    }

    info!(
        summaries = summary_files.len(),
        scanned, "Summary dimension scan finished"
    );
    Ok(())
}

/// Rebuild the per-command dimension and metric tables for every
/// summarize-classified command
pub async fn build_command_summary_links(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM command_summary_dimensions")
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM command_summary_metrics")
        .execute(pool)
        .await?;

    let mut summary_dimensions: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    let dim_rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT summary_resource, name, source_path FROM summary_dimensions",
    )
    .fetch_all(pool)
    .await?;
    for (summary_resource, name, source_path) in dim_rows {
        summary_dimensions
            .entry(summary_resource)
            .or_default()
            .push((name, source_path));
    }

    let mut summary_metrics: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    let metric_rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT summary_resource, name, source_path FROM summary_metrics")
            .fetch_all(pool)
            .await?;
    for (summary_resource, name, source_path) in metric_rows {
        summary_metrics
            .entry(summary_resource)
            .or_default()
            .push((name, source_path));
    }

    let commands: Vec<(String, String)> = sqlx::query_as(
        "SELECT command_id, resource FROM command_resource_links WHERE command_kind = 'summarize'",
    )
    .fetch_all(pool)
    .await?;

    for (command_id, resource) in &commands {
        if let Some(dimensions) = summary_dimensions.get(resource) {
            for (name, source_path) in dimensions {
                sqlx::query(
                    "INSERT OR IGNORE INTO command_summary_dimensions \
                     (command_id, summary_resource, name, source_path) VALUES (?, ?, ?, ?)",
                )
                .bind(command_id)
                .bind(resource)
                .bind(name)
                .bind(source_path)
                .execute(pool)
                .await?;
            }
        }
        if let Some(metrics) = summary_metrics.get(resource) {
            for (name, source_path) in metrics {
                sqlx::query(
                    "INSERT OR IGNORE INTO command_summary_metrics \
                     (command_id, summary_resource, name, source_path) VALUES (?, ?, ?, ?)",
                )
                .bind(command_id)
                .bind(resource)
                .bind(name)
                .bind(source_path)
                .execute(pool)
                .await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    const MODEL_SOURCE: &str = r#"
module Server
  class RevenueSummary < Model
    GROUP_BY_ATTRIBUTES = [
      { attribute: "period", label: "Period" },
      { attribute: "region", label: "Region" },
    ].freeze

    METRICS = [
      { attribute: "gross", label: "Gross" },
    ].freeze

    def summary_attributes
      [
        Attribute.new("currency", :string),
      ]
    end

    def metrics
      [
        Metric.new("net", :decimal),
        Metric.new("tax", :decimal),
      ]
    end

    def unrelated
      Attribute.new("ignored", :string)
    end
  end
end
"#;

    #[test]
    fn test_extract_method_block_respects_nesting() {
        let source = "def outer\n  def inner\n  end\n  value\nend\nafter";
        let lines: Vec<&str> = source.lines().collect();
        let block = extract_method_block(&lines, "outer");
        assert!(block.contains("value"));
        assert!(!block.contains("after"));
    }

    #[test]
    fn test_extract_constant_block_bracket_depth() {
        let lines: Vec<&str> = MODEL_SOURCE.lines().collect();
        let block = extract_constant_block(&lines, "GROUP_BY_ATTRIBUTES");
        assert!(block.contains("period"));
        assert!(block.contains("region"));
        assert!(!block.contains("gross"));
    }

    #[test]
    fn test_ruby_scanner_extracts_dimensions_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let rel = "app/models/revenue_summary.rb";
        let abs = dir.path().join(rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(&abs, MODEL_SOURCE).unwrap();

        let scanner = RubyModelScanner::new(dir.path());
        let scan = scanner.scan_file(rel).unwrap().unwrap();
        let dims: Vec<&str> = scan.dimensions.iter().map(String::as_str).collect();
        assert_eq!(dims, vec!["currency", "period", "region"]);
        let metrics: Vec<&str> = scan.metrics.iter().map(String::as_str).collect();
        assert_eq!(metrics, vec!["gross", "net", "tax"]);
    }

    #[test]
    fn test_ruby_scanner_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = RubyModelScanner::new(dir.path());
        assert!(scanner.scan_file("app/models/missing.rb").unwrap().is_none());
    }

    async fn seed_summary(db: &Database, file_path: &str) {
        sqlx::query("INSERT INTO resources (name) VALUES ('invoices'), ('revenue summaries')")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO summary_resource_targets (summary_resource, primary_resource, condition) \
             VALUES ('revenue summaries', 'invoices', NULL)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO summary_sources (summary_resource, repo_name, file_path) \
             VALUES ('revenue summaries', 'server', ?)",
        )
        .bind(file_path)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_build_summary_dimensions_prefers_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let rel = "app/models/revenue_summary.rb";
        let abs = dir.path().join(rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(&abs, MODEL_SOURCE).unwrap();

        let db = Database::in_memory().await.unwrap();
        seed_summary(&db, "app/controllers/revenue_controller.rb").await;
        sqlx::query(
            "INSERT INTO summary_sources (summary_resource, repo_name, file_path) \
             VALUES ('revenue summaries', 'server', ?)",
        )
        .bind(rel)
        .execute(db.pool())
        .await
        .unwrap();

        let scanner = RubyModelScanner::new(dir.path());
        build_summary_dimensions(db.pool(), &scanner).await.unwrap();

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT name, kind, source_path FROM summary_dimensions ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|(_, kind, path)| kind == "group_by" && path == rel));

        let (metric_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM summary_metrics")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(metric_count, 3);
    }

    #[tokio::test]
    async fn test_null_scanner_leaves_tables_empty() {
        let db = Database::in_memory().await.unwrap();
        seed_summary(&db, "app/models/revenue_summary.rb").await;

        build_summary_dimensions(db.pool(), &NullScanner).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM summary_dimensions")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_command_summary_links() {
        let db = Database::in_memory().await.unwrap();
        seed_summary(&db, "app/models/revenue_summary.rb").await;
        sqlx::query(
            "INSERT INTO summary_dimensions (summary_resource, name, kind, source_path) \
             VALUES ('revenue summaries', 'period', 'group_by', 'app/models/revenue_summary.rb')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO summary_metrics (summary_resource, name, source_path) \
             VALUES ('revenue summaries', 'net', 'app/models/revenue_summary.rb')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO commands (id, full_path, description) VALUES \
             ('c1', 'summarize revenue summaries create', 'Create a revenue summary')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO command_resource_links \
             (command_id, resource, verb, command_kind, source, evidence) VALUES \
             ('c1', 'revenue summaries', 'create', 'summarize', 'full_path', NULL)",
        )
        .execute(db.pool())
        .await
        .unwrap();

        build_command_summary_links(db.pool()).await.unwrap();

        let (name,): (String,) =
            sqlx::query_as("SELECT name FROM command_summary_dimensions WHERE command_id = 'c1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(name, "period");
        let (metric,): (String,) =
            sqlx::query_as("SELECT name FROM command_summary_metrics WHERE command_id = 'c1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(metric, "net");
    }
}
