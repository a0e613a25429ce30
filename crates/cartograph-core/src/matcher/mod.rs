//! Flag-to-field inference
//!
//! Derives `command_field_links` rows from every (command, resource) link
//! whose grammar implies a field relation. Deterministic rules run first;
//! flags they cannot place are collected, grouped by (resource, relation)
//! and handed to the fallback resolver. Fallback answers are validated
//! against the actual field set before insertion, so the resolver can
//! never introduce a field the schema does not know.

pub mod cache;
pub mod fallback;

use std::collections::BTreeMap;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::Result;
use crate::matcher::fallback::{FallbackResolver, MappingRequest, ResolveStats};

/// How a flag was matched to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Negation,
    Presence,
    Range,
    RangeStripId,
    StripId,
    Llm,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Negation => "negation",
            MatchKind::Presence => "presence",
            MatchKind::Range => "range",
            MatchKind::RangeStripId => "range_strip_id",
            MatchKind::StripId => "strip_id",
            MatchKind::Llm => "llm",
        }
    }
}

/// A deterministic match of one flag against a field set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    pub field: String,
    pub kind: MatchKind,
    pub modifier: Option<&'static str>,
}

/// Strip leading dashes, lowercase, and fold underscores to dashes
pub fn normalize_flag_name(flag_name: &str) -> String {
    flag_name
        .trim()
        .trim_start_matches('-')
        .to_lowercase()
        .replace('_', "-")
}

/// Match a flag name against a resource's fields using the deterministic
/// rule ladder. Rules are ordered: exact, `not-` negation, `is-`
/// presence, range suffixes (with an `-id`/`-ids` strip retry), then a
/// bare `-id`/`-ids` strip. First hit wins.
pub fn match_flag_to_field(
    flag_name: &str,
    fields: &BTreeMap<String, String>,
) -> Option<FieldMatch> {
    let normalized = normalize_flag_name(flag_name);
    if fields.contains_key(&normalized) {
        return Some(FieldMatch {
            field: normalized,
            kind: MatchKind::Exact,
            modifier: None,
        });
    }

    if let Some(base) = normalized.strip_prefix("not-") {
        if fields.contains_key(base) {
            return Some(FieldMatch {
                field: base.to_string(),
                kind: MatchKind::Negation,
                modifier: Some("not"),
            });
        }
    }

    if let Some(base) = normalized.strip_prefix("is-") {
        if fields.contains_key(base) {
            return Some(FieldMatch {
                field: base.to_string(),
                kind: MatchKind::Presence,
                modifier: Some("is"),
            });
        }
    }

    for (suffix, modifier) in [
        ("-min", "min"),
        ("-max", "max"),
        ("-before", "before"),
        ("-after", "after"),
    ] {
        if let Some(base) = normalized.strip_suffix(suffix) {
            if fields.contains_key(base) {
                return Some(FieldMatch {
                    field: base.to_string(),
                    kind: MatchKind::Range,
                    modifier: Some(modifier),
                });
            }
            for id_suffix in ["-id", "-ids"] {
                if let Some(stripped) = base.strip_suffix(id_suffix) {
                    if fields.contains_key(stripped) {
                        return Some(FieldMatch {
                            field: stripped.to_string(),
                            kind: MatchKind::RangeStripId,
                            modifier: Some(modifier),
                        });
                    }
                }
            }
        }
    }

    for id_suffix in ["-id", "-ids"] {
        if let Some(base) = normalized.strip_suffix(id_suffix) {
            if fields.contains_key(base) {
                return Some(FieldMatch {
                    field: base.to_string(),
                    kind: MatchKind::StripId,
                    modifier: None,
                });
            }
        }
    }

    None
}

/// The field relation a (command kind, verb) pair implies, if any
pub fn relation_for(command_kind: &str, verb: &str) -> Option<&'static str> {
    match command_kind {
        "view" => Some(if verb == "list" {
            "filters_by"
        } else {
            "selects_field"
        }),
        "do" => match verb {
            "create" | "update" => Some("sets_field"),
            _ => None,
        },
        "summarize" => Some("summary_param"),
        _ => None,
    }
}

/// Counters for one field-link build
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldLinkReport {
    pub deterministic: usize,
    pub fallback: usize,
    pub unmatched: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

struct UnmatchedFlag {
    command_id: String,
    resource: String,
    relation: &'static str,
    flag_name: String,
}

/// Rebuild `command_field_links` from scratch.
///
/// When `fallback` is provided, unmatched flags are grouped by
/// (resource, relation), deduplicated, and resolved concurrently; the
/// per-command rows are then filled in from the grouped answers.
pub async fn build_command_field_links(
    pool: &SqlitePool,
    fallback: Option<&mut FallbackResolver>,
) -> Result<FieldLinkReport> {
    sqlx::query("DELETE FROM command_field_links")
        .execute(pool)
        .await?;

    let mut resource_fields: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let field_rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT resource, name, kind FROM resource_fields")
            .fetch_all(pool)
            .await?;
    for (resource, name, kind) in field_rows {
        resource_fields.entry(resource).or_default().insert(name, kind);
    }

    let mut flags_by_command: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    let flag_rows: Vec<(String, String, Option<String>)> =
        sqlx::query_as("SELECT command_id, name, description FROM flags ORDER BY command_id, name")
            .fetch_all(pool)
            .await?;
    for (command_id, name, description) in flag_rows {
        flags_by_command
            .entry(command_id)
            .or_default()
            .push((name, description.unwrap_or_default()));
    }

    let command_links: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT command_id, resource, verb, command_kind FROM command_resource_links \
         ORDER BY command_id, resource",
    )
    .fetch_all(pool)
    .await?;

    let mut report = FieldLinkReport::default();
    let mut unmatched: Vec<UnmatchedFlag> = Vec::new();
    let mut groups: BTreeMap<(String, &'static str), BTreeMap<String, String>> = BTreeMap::new();

    for (command_id, resource, verb, command_kind) in &command_links {
        let Some(relation) = relation_for(command_kind, verb) else {
            continue;
        };
        let Some(fields) = resource_fields.get(resource) else {
            continue;
        };
        let Some(flags) = flags_by_command.get(command_id) else {
            continue;
        };

        for (flag_name, description) in flags {
            match match_flag_to_field(flag_name, fields) {
                Some(matched) => {
                    insert_field_link(
                        pool,
                        command_id,
                        resource,
                        &matched.field,
                        &fields[&matched.field],
                        relation,
                        flag_name,
                        matched.kind,
                        matched.modifier,
                    )
                    .await?;
                    report.deterministic += 1;
                }
                None => {
                    unmatched.push(UnmatchedFlag {
                        command_id: command_id.clone(),
                        resource: resource.clone(),
                        relation,
                        flag_name: flag_name.clone(),
                    });
                    groups
                        .entry((resource.clone(), relation))
                        .or_default()
                        .entry(flag_name.clone())
                        .or_insert_with(|| description.clone());
                }
            }
        }
    }

    report.unmatched = unmatched.len();
    info!(
        deterministic = report.deterministic,
        unmatched = report.unmatched,
        "Deterministic flag matching finished"
    );

    let Some(resolver) = fallback else {
        return Ok(report);
    };
    if groups.is_empty() {
        return Ok(report);
    }

    let requests: Vec<MappingRequest> = groups
        .into_iter()
        .map(|((resource, relation), flags_map)| {
            let fields: Vec<(String, String)> = resource_fields
                .get(&resource)
                .map(|fields| fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            MappingRequest {
                resource,
                relation: relation.to_string(),
                flags: flags_map.into_iter().collect(),
                fields,
                model: String::new(),
            }
        })
        .collect();

    let (mappings, stats) = resolver.resolve_groups(requests).await?;
    let ResolveStats {
        cache_hits,
        cache_misses,
    } = stats;
    report.cache_hits = cache_hits;
    report.cache_misses = cache_misses;

    for entry in &unmatched {
        let Some(mapping) = mappings.get(&(entry.resource.clone(), entry.relation.to_string()))
        else {
            continue;
        };
        let Some(Some(field)) = mapping.get(&entry.flag_name) else {
            continue;
        };
        let Some(fields) = resource_fields.get(&entry.resource) else {
            continue;
        };
        let Some(kind) = fields.get(field) else {
            debug!(
                resource = %entry.resource,
                field = %field,
                "Fallback returned unknown field; ignoring"
            );
            continue;
        };
        insert_field_link(
            pool,
            &entry.command_id,
            &entry.resource,
            field,
            kind,
            entry.relation,
            &entry.flag_name,
            MatchKind::Llm,
            None,
        )
        .await?;
        report.fallback += 1;
    }

    info!(fallback = report.fallback, "Fallback flag matching finished");
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn insert_field_link(
    pool: &SqlitePool,
    command_id: &str,
    resource: &str,
    field: &str,
    field_kind: &str,
    relation: &str,
    flag_name: &str,
    match_kind: MatchKind,
    modifier: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO command_field_links \
         (command_id, resource, field, field_kind, relation, flag_name, match_kind, modifier) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(command_id)
    .bind(resource)
    .bind(field)
    .bind(field_kind)
    .bind(relation)
    .bind(flag_name)
    .bind(match_kind.as_str())
    .bind(modifier)
    .execute(pool)
    .await?;
    Ok(())
}
