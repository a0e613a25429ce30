//! Command classification
//!
//! Parses each command's full path tokens into a (resource, verb, kind)
//! triple using three pattern grammars, in priority order:
//!
//! 1. `view <resource…> list|show`
//! 2. `do <resource…> <verb>`
//! 3. `summarize <alias…> create`
//!
//! The summarize grammar carries no resource name directly; the resource
//! is sniffed from the command's CLI source files via an embedded API
//! endpoint literal (`"/v1/<resource>"`), falling back to the naive
//! plural of the alias tokens. Each link records how it was derived so
//! downstream consumers can audit the classification.
//!
//! Commands matching no grammar are left unclassified and excluded from
//! all downstream linking; this is never an error.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::Result;

static ENDPOINT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""/v1/([a-z0-9-]+)""#).unwrap_or_else(|_| unreachable!()));

/// The grammar a command path matched, before resource resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    View { resource: String, verb: String },
    Do { resource: String, verb: String },
    Summarize { alias: String },
}

/// Classify a full path against the three grammars. Returns None for
/// paths matching none of them.
pub fn classify_path(full_path: &str) -> Option<PathClass> {
    let tokens: Vec<&str> = full_path.split_whitespace().collect();
    let first = tokens.first()?;

    match *first {
        "view" if tokens.len() >= 3 && matches!(tokens[tokens.len() - 1], "list" | "show") => {
            Some(PathClass::View {
                resource: tokens[1..tokens.len() - 1].join(" "),
                verb: tokens[tokens.len() - 1].to_string(),
            })
        }
        "do" if tokens.len() >= 3 => Some(PathClass::Do {
            resource: tokens[1..tokens.len() - 1].join(" "),
            verb: tokens[tokens.len() - 1].to_string(),
        }),
        "summarize" if tokens.len() >= 3 && tokens[tokens.len() - 1] == "create" => {
            Some(PathClass::Summarize {
                alias: tokens[1..tokens.len() - 1].join(" "),
            })
        }
        _ => None,
    }
}

/// Scan CLI source files for an embedded `/v1/<resource>` endpoint
/// literal. Returns the resource and the evidencing file path.
fn sniff_endpoint(cli_root: &Path, files: &[String]) -> Option<(String, String)> {
    for file_path in files {
        let contents = match std::fs::read_to_string(cli_root.join(file_path)) {
            Ok(contents) => contents,
            Err(_) => continue,
        };
        if let Some(captures) = ENDPOINT_PATTERN.captures(&contents) {
            return Some((captures[1].to_string(), file_path.clone()));
        }
    }
    None
}

/// Rebuild the command_resource_links table from every ingested command.
///
/// Returns the number of links recorded. `cli_root` anchors the relative
/// source paths used for summarize endpoint sniffing; without it, only
/// the alias-plural fallback applies.
pub async fn build_command_resource_links(
    pool: &SqlitePool,
    cli_root: Option<&Path>,
) -> Result<u64> {
    sqlx::query("DELETE FROM command_resource_links").execute(pool).await?;

    let resources: HashSet<String> = sqlx::query_as::<_, (String,)>("SELECT name FROM resources")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(name,)| name)
        .collect();

    let commands: Vec<(String, String)> =
        sqlx::query_as("SELECT id, full_path FROM commands ORDER BY full_path")
            .fetch_all(pool)
            .await?;

    let mut cli_sources: HashMap<String, Vec<String>> = HashMap::new();
    let source_rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT command_id, file_path FROM sources WHERE repo_name = 'cli' ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    for (command_id, file_path) in source_rows {
        cli_sources.entry(command_id).or_default().push(file_path);
    }

    let mut linked = 0u64;
    for (command_id, full_path) in &commands {
        let Some(class) = classify_path(full_path) else {
            debug!(full_path = %full_path, "Command left unclassified");
            continue;
        };

        let (resource, verb, kind, source, evidence) = match class {
            PathClass::View { resource, verb } => {
                if !resources.contains(&resource) {
                    continue;
                }
                (resource, verb, "view", "full_path", None)
            }
            PathClass::Do { resource, verb } => {
                if !resources.contains(&resource) {
                    continue;
                }
                (resource, verb, "do", "full_path", None)
            }
            PathClass::Summarize { alias } => {
                let sniffed = cli_root.and_then(|root| {
                    sniff_endpoint(root, cli_sources.get(command_id).map_or(&[][..], |v| v))
                });
                let (resource, evidence) = match sniffed {
                    Some((resource, path)) => (resource, path),
                    None => {
                        let candidate = format!("{}s", alias);
                        if !resources.contains(&candidate) {
                            continue;
                        }
                        (candidate, "alias_plural".to_string())
                    }
                };
                if !resources.contains(&resource) {
                    continue;
                }
                (resource, "create".to_string(), "summarize", "cli_endpoint", Some(evidence))
            }
        };

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO command_resource_links
            (command_id, resource, verb, command_kind, source, evidence)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(command_id)
        .bind(&resource)
        .bind(&verb)
        .bind(kind)
        .bind(source)
        .bind(&evidence)
        .execute(pool)
        .await?;
        linked += 1;
    }

    info!(commands = commands.len(), linked, "Command classification finished");
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ResourceMap;
    use crate::ingest::apply_resource_map;
    use crate::storage::Database;

    #[test]
    fn test_classify_view() {
        assert_eq!(
            classify_path("view invoices list"),
            Some(PathClass::View {
                resource: "invoices".to_string(),
                verb: "list".to_string()
            })
        );
        assert_eq!(
            classify_path("view customer tenders show"),
            Some(PathClass::View {
                resource: "customer tenders".to_string(),
                verb: "show".to_string()
            })
        );
    }

    #[test]
    fn test_classify_do() {
        assert_eq!(
            classify_path("do invoices archive"),
            Some(PathClass::Do {
                resource: "invoices".to_string(),
                verb: "archive".to_string()
            })
        );
    }

    #[test]
    fn test_classify_summarize() {
        assert_eq!(
            classify_path("summarize invoice create"),
            Some(PathClass::Summarize {
                alias: "invoice".to_string()
            })
        );
        // Only the create verb is a summary grammar
        assert_eq!(classify_path("summarize invoice delete"), None);
    }

    #[test]
    fn test_classify_rejects_other_grammars() {
        assert_eq!(classify_path("help"), None);
        assert_eq!(classify_path("view invoices"), None);
        assert_eq!(classify_path("do invoices"), None);
        assert_eq!(classify_path(""), None);
        assert_eq!(classify_path("frobnicate the widgets"), None);
    }

    async fn setup_with_resources(names: &[&str]) -> Database {
        let db = Database::in_memory().await.unwrap();
        let mut map = ResourceMap::default();
        for name in names {
            map.resources.insert(name.to_string(), Default::default());
        }
        apply_resource_map(db.pool(), &map).await.unwrap();
        db
    }

    async fn insert_command(db: &Database, id: &str, full_path: &str) {
        sqlx::query("INSERT INTO commands (id, full_path, description) VALUES (?, ?, '')")
            .bind(id)
            .bind(full_path)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_build_links_for_known_resources() {
        let db = setup_with_resources(&["invoices"]).await;
        insert_command(&db, "c1", "view invoices list").await;
        insert_command(&db, "c2", "view ghosts list").await;
        insert_command(&db, "c3", "do invoices archive").await;
        insert_command(&db, "c4", "not a grammar at all").await;

        let linked = build_command_resource_links(db.pool(), None).await.unwrap();
        assert_eq!(linked, 2);

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT command_id, resource, command_kind FROM command_resource_links ORDER BY command_id",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                ("c1".to_string(), "invoices".to_string(), "view".to_string()),
                ("c3".to_string(), "invoices".to_string(), "do".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_summarize_endpoint_sniffing() {
        let db = setup_with_resources(&["invoice-summaries"]).await;
        insert_command(&db, "c1", "summarize invoice summary create").await;
        sqlx::query("INSERT INTO sources (command_id, repo_name, file_path) VALUES ('c1', 'cli', 'cmd.go')")
            .execute(db.pool())
            .await
            .unwrap();

        let root = tempfile::tempdir().unwrap();
        std::fs::write(
            root.path().join("cmd.go"),
            "var endpoint = \"/v1/invoice-summaries\"\n",
        )
        .unwrap();

        let linked = build_command_resource_links(db.pool(), Some(root.path())).await.unwrap();
        assert_eq!(linked, 1);

        let (resource, source, evidence): (String, String, String) = sqlx::query_as(
            "SELECT resource, source, evidence FROM command_resource_links WHERE command_id = 'c1'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(resource, "invoice-summaries");
        assert_eq!(source, "cli_endpoint");
        assert_eq!(evidence, "cmd.go");
    }

    #[tokio::test]
    async fn test_summarize_alias_plural_fallback() {
        let db = setup_with_resources(&["invoice summary reports"]).await;
        insert_command(&db, "c1", "summarize invoice summary report create").await;

        let linked = build_command_resource_links(db.pool(), None).await.unwrap();
        assert_eq!(linked, 1);

        let (resource, evidence): (String, String) = sqlx::query_as(
            "SELECT resource, evidence FROM command_resource_links WHERE command_id = 'c1'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(resource, "invoice summary reports");
        assert_eq!(evidence, "alias_plural");
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let db = setup_with_resources(&["invoices"]).await;
        insert_command(&db, "c1", "view invoices list").await;

        build_command_resource_links(db.pool(), None).await.unwrap();
        build_command_resource_links(db.pool(), None).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM command_resource_links")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
