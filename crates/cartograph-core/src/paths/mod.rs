//! Multi-hop filter path resolution
//!
//! Flags on `view ... list` commands that the field matcher could not
//! place are resolved against the relationship graph: first as a direct
//! relationship of the command's resource, then as a reachable resource
//! (singular or plural spelling), then as an attribute on any reachable
//! resource. Resolution is breadth-first and bounded by `max_hops`; when
//! several targets sit at the same minimal depth, every one of them is
//! recorded.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;
use crate::matcher::normalize_flag_name;

/// Relationship adjacency: resource -> [(relationship field, target resource)]
pub type RelationshipGraph = BTreeMap<String, Vec<(String, String)>>;

/// Pluralize a resource name: trailing `s` is left alone, consonant + `y`
/// becomes `ies`, everything else gains an `s`.
pub fn pluralize_resource_name(base: &str) -> String {
    if base.ends_with('s') {
        return base.to_string();
    }
    let chars: Vec<char> = base.chars().collect();
    if chars.len() > 1
        && chars[chars.len() - 1] == 'y'
        && !"aeiou".contains(chars[chars.len() - 2])
    {
        let stem: String = chars[..chars.len() - 1].iter().collect();
        return format!("{}ies", stem);
    }
    format!("{}s", base)
}

/// Known resource names a flag base could refer to, singular first
pub fn candidate_resource_names(base: &str, resources: &HashSet<String>) -> Vec<String> {
    let mut candidates = Vec::new();
    if resources.contains(base) {
        candidates.push(base.to_string());
    }
    let plural = pluralize_resource_name(base);
    if resources.contains(&plural) && !candidates.contains(&plural) {
        candidates.push(plural);
    }
    candidates
}

/// Strip a known prefix or suffix modifier from a normalized flag name.
/// Prefixes win over suffixes.
pub fn parse_flag_base_modifier(flag_name: &str) -> (String, Option<&'static str>) {
    let base = normalize_flag_name(flag_name);
    if let Some(rest) = base.strip_prefix("not-") {
        return (rest.to_string(), Some("not"));
    }
    if let Some(rest) = base.strip_prefix("is-") {
        return (rest.to_string(), Some("is"));
    }
    for (suffix, modifier) in [
        ("-min", "min"),
        ("-max", "max"),
        ("-before", "before"),
        ("-after", "after"),
    ] {
        if let Some(rest) = base.strip_suffix(suffix) {
            return (rest.to_string(), Some(modifier));
        }
    }
    (base, None)
}

/// Load the relationship graph from `resource_field_targets`
pub async fn build_relationship_graph(pool: &SqlitePool) -> Result<RelationshipGraph> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT resource, field, target_resource FROM resource_field_targets \
         ORDER BY resource, field, target_resource",
    )
    .fetch_all(pool)
    .await?;

    let mut adjacency = RelationshipGraph::new();
    for (resource, field, target) in rows {
        adjacency.entry(resource).or_default().push((field, target));
    }
    Ok(adjacency)
}

/// Breadth-first shortest paths from `start`, bounded by `max_hops`.
///
/// Returns each reachable resource mapped to the relationship names
/// traversed to reach it; `start` maps to the empty path. The first path
/// found at a given depth wins, so adjacency order decides equal-length
/// ties to the same resource.
pub fn shortest_paths(
    adjacency: &RelationshipGraph,
    start: &str,
    max_hops: usize,
) -> HashMap<String, Vec<String>> {
    let mut paths: HashMap<String, Vec<String>> = HashMap::new();
    paths.insert(start.to_string(), Vec::new());
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(start.to_string());

    while let Some(current) = queue.pop_front() {
        let path = paths[&current].clone();
        if path.len() >= max_hops {
            continue;
        }
        let Some(edges) = adjacency.get(&current) else {
            continue;
        };
        for (rel_name, target) in edges {
            if paths.contains_key(target) {
                continue;
            }
            let mut next = path.clone();
            next.push(rel_name.clone());
            paths.insert(target.clone(), next);
            queue.push_back(target.clone());
        }
    }
    paths
}

/// Rebuild `command_filter_paths` for every unmapped list-command flag
pub async fn build_command_filter_paths(pool: &SqlitePool, max_hops: usize) -> Result<usize> {
    sqlx::query("DELETE FROM command_filter_paths")
        .execute(pool)
        .await?;

    let resources: HashSet<String> = sqlx::query_as::<_, (String,)>("SELECT name FROM resources")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(name,)| name)
        .collect();

    let mut attribute_map: BTreeMap<String, HashSet<String>> = BTreeMap::new();
    let attr_rows: Vec<(String, String)> =
        sqlx::query_as("SELECT resource, name FROM resource_fields WHERE kind = 'attribute'")
            .fetch_all(pool)
            .await?;
    for (resource, name) in attr_rows {
        attribute_map.entry(resource).or_default().insert(name);
    }

    let adjacency = build_relationship_graph(pool).await?;

    let unmapped_flags: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT f.command_id, f.name, crl.resource \
         FROM flags f \
         JOIN command_resource_links crl ON crl.command_id = f.command_id \
         WHERE crl.command_kind = 'view' AND crl.verb = 'list' \
         AND NOT EXISTS ( \
             SELECT 1 FROM command_field_links cfl \
             WHERE cfl.command_id = f.command_id AND cfl.flag_name = f.name \
         ) \
         ORDER BY f.command_id, f.name",
    )
    .fetch_all(pool)
    .await?;

    let mut inserted = 0usize;

    for (command_id, flag_name, resource) in &unmapped_flags {
        let (mut base, modifier) = parse_flag_base_modifier(flag_name);
        if let Some(stripped) = base.strip_suffix("-ids") {
            base = stripped.to_string();
        } else if let Some(stripped) = base.strip_suffix("-id") {
            base = stripped.to_string();
        }

        let edges = adjacency.get(resource).map(Vec::as_slice).unwrap_or(&[]);

        // Stage 1: the base names a direct relationship of this resource
        if edges.iter().any(|(rel, _)| rel == &base) {
            for (rel_name, target) in edges {
                if rel_name != &base {
                    continue;
                }
                insert_filter_path(
                    pool,
                    command_id,
                    resource,
                    flag_name,
                    rel_name,
                    target,
                    None,
                    1,
                    "rel",
                    modifier,
                )
                .await?;
                inserted += 1;
            }
            continue;
        }

        let candidates = candidate_resource_names(&base, &resources);
        let paths = shortest_paths(&adjacency, resource, max_hops);

        // Stage 2: the base names a reachable resource; record every
        // candidate at the minimal depth
        let mut matched_any = false;
        let min_hop = candidates
            .iter()
            .filter(|candidate| *candidate != resource)
            .filter_map(|candidate| paths.get(candidate).map(Vec::len))
            .min();
        if let Some(min_hop) = min_hop {
            for candidate in &candidates {
                let Some(path) = paths.get(candidate) else {
                    continue;
                };
                if path.len() != min_hop {
                    continue;
                }
                insert_filter_path(
                    pool,
                    command_id,
                    resource,
                    flag_name,
                    &path.join("."),
                    candidate,
                    None,
                    min_hop,
                    "rel_resource",
                    modifier,
                )
                .await?;
                inserted += 1;
                matched_any = true;
            }
        }
        if matched_any {
            continue;
        }

        // Stage 3: the base names an attribute on a reachable resource
        let mut attr_matches: Vec<(&String, &[String])> = Vec::new();
        for (target_resource, attrs) in &attribute_map {
            if !attrs.contains(&base) {
                continue;
            }
            let Some(path) = paths.get(target_resource) else {
                continue;
            };
            attr_matches.push((target_resource, path.as_slice()));
        }

        let Some(min_hop) = attr_matches.iter().map(|(_, path)| path.len()).min() else {
            continue;
        };
        for (target_resource, path_parts) in &attr_matches {
            if path_parts.len() != min_hop {
                continue;
            }
            let path = if path_parts.is_empty() {
                base.clone()
            } else {
                format!("{}.{}", path_parts.join("."), base)
            };
            insert_filter_path(
                pool,
                command_id,
                resource,
                flag_name,
                &path,
                target_resource,
                Some(&base),
                min_hop,
                "rel_attr",
                modifier,
            )
            .await?;
            inserted += 1;
        }
    }

    info!(
        flags = unmapped_flags.len(),
        paths = inserted,
        "Filter path resolution finished"
    );
    Ok(inserted)
}

#[allow(clippy::too_many_arguments)]
async fn insert_filter_path(
    pool: &SqlitePool,
    command_id: &str,
    resource: &str,
    flag_name: &str,
    path: &str,
    target_resource: &str,
    target_field: Option<&str>,
    hop_count: usize,
    match_kind: &str,
    modifier: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO command_filter_paths \
         (command_id, resource, flag_name, path, target_resource, target_field, \
          hop_count, match_kind, modifier, source) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'deterministic')",
    )
    .bind(command_id)
    .bind(resource)
    .bind(flag_name)
    .bind(path)
    .bind(target_resource)
    .bind(target_field)
    .bind(hop_count as i64)
    .bind(match_kind)
    .bind(modifier)
    .execute(pool)
    .await?;
    Ok(())
}
