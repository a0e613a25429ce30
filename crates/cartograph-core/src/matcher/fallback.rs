//! Concurrent fallback resolution for unmatched flags
//!
//! Flags the deterministic rules cannot place are grouped by
//! (resource, relation) and handed to an external field mapper behind the
//! [`FieldMapper`] trait. Cache hits short-circuit; misses run on a
//! bounded worker pool. Workers never touch the cache: every completed
//! result flows back to the single coordinating task, which writes it
//! through the cache before it is applied. A failed task degrades to an
//! empty mapping and never aborts the run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::Result;
use crate::matcher::cache::{FlagMapping, MappingCache, cache_key};

/// One grouped mapping request: every still-unmatched flag of a
/// (resource, relation) pair, with the allowed field set
#[derive(Debug, Clone)]
pub struct MappingRequest {
    pub resource: String,
    pub relation: String,
    /// (flag name, description) pairs, sorted and deduplicated
    pub flags: Vec<(String, String)>,
    /// (field name, kind) pairs, sorted
    pub fields: Vec<(String, String)>,
    pub model: String,
}

/// Seam for the external inference call. Implementations must be pure:
/// no shared mutable state, so requests can run concurrently.
#[async_trait]
pub trait FieldMapper: Send + Sync {
    async fn map_flags(&self, request: &MappingRequest) -> Result<FlagMapping>;
}

/// Counters for one resolution pass
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveStats {
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// Coordinates cache lookups and the bounded worker pool
pub struct FallbackResolver {
    mapper: Arc<dyn FieldMapper>,
    cache: MappingCache,
    model: String,
    workers: usize,
}

impl FallbackResolver {
    pub fn new(
        mapper: Arc<dyn FieldMapper>,
        cache: MappingCache,
        model: impl Into<String>,
        workers: usize,
    ) -> Self {
        Self {
            mapper,
            cache,
            model: model.into(),
            workers: workers.max(1),
        }
    }

    /// The model identifier included in cache keys and requests
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve all groups, consulting the cache first and dispatching the
    /// misses to at most `workers` concurrent mapper calls.
    pub async fn resolve_groups(
        &mut self,
        mut groups: Vec<MappingRequest>,
    ) -> Result<(HashMap<(String, String), FlagMapping>, ResolveStats)> {
        let mut mappings: HashMap<(String, String), FlagMapping> = HashMap::new();
        let mut stats = ResolveStats::default();
        let mut pending: Vec<(String, MappingRequest)> = Vec::new();

        for mut group in groups.drain(..) {
            group.model = self.model.clone();
            let key = cache_key(
                &group.resource,
                &group.relation,
                &group.flags,
                &group.fields,
                &group.model,
            );
            if let Some(cached) = self.cache.get(&key) {
                mappings.insert((group.resource.clone(), group.relation.clone()), cached.clone());
                stats.cache_hits += 1;
            } else {
                pending.push((key, group));
                stats.cache_misses += 1;
            }
        }

        info!(
            tasks = pending.len(),
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            workers = self.workers,
            "Fallback flag mapping"
        );

        if pending.is_empty() {
            return Ok((mappings, stats));
        }

        let total = pending.len();
        let mut completed = 0usize;
        let mut queue = pending.into_iter();
        let mut join_set: JoinSet<(String, String, String, FlagMapping)> = JoinSet::new();

        let mut spawn_next = |join_set: &mut JoinSet<(String, String, String, FlagMapping)>| {
            if let Some((key, request)) = queue.next() {
                let mapper = Arc::clone(&self.mapper);
                join_set.spawn(async move {
                    let mapping = match mapper.map_flags(&request).await {
                        Ok(mapping) => mapping,
                        Err(err) => {
                            warn!(
                                resource = %request.resource,
                                relation = %request.relation,
                                error = %err,
                                "Fallback mapping failed; treating as no mapping"
                            );
                            FlagMapping::new()
                        }
                    };
                    (key, request.resource, request.relation, mapping)
                });
            }
        };

        for _ in 0..self.workers {
            spawn_next(&mut join_set);
        }

        while let Some(joined) = join_set.join_next().await {
            let (key, resource, relation, mapping) = match joined {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, "Fallback mapping task panicked; skipping group");
                    spawn_next(&mut join_set);
                    continue;
                }
            };
            completed += 1;
            info!(completed, total, group = %format!("{}:{}", resource, relation), "Fallback mapping completed");
            // Persist before applying so an interruption never repeats
            // finished work.
            self.cache.insert(key, mapping.clone());
            mappings.insert((resource, relation), mapping);
            spawn_next(&mut join_set);
        }

        Ok((mappings, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMapper {
        calls: AtomicUsize,
        result: FlagMapping,
    }

    impl CountingMapper {
        fn new(result: FlagMapping) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result,
            }
        }
    }

    #[async_trait]
    impl FieldMapper for CountingMapper {
        async fn map_flags(&self, _request: &MappingRequest) -> Result<FlagMapping> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct FailingMapper;

    #[async_trait]
    impl FieldMapper for FailingMapper {
        async fn map_flags(&self, _request: &MappingRequest) -> Result<FlagMapping> {
            Err(crate::Error::LlmError("unreachable endpoint".to_string()))
        }
    }

    fn request(resource: &str) -> MappingRequest {
        MappingRequest {
            resource: resource.to_string(),
            relation: "filters_by".to_string(),
            flags: vec![("--mystery".to_string(), "unknown flag".to_string())],
            fields: vec![("status".to_string(), "attribute".to_string())],
            model: String::new(),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_mapper() {
        let mut mapping = FlagMapping::new();
        mapping.insert("--mystery".to_string(), Some("status".to_string()));
        let mapper = Arc::new(CountingMapper::new(mapping.clone()));

        let mut resolver = FallbackResolver::new(
            Arc::clone(&mapper) as Arc<dyn FieldMapper>,
            MappingCache::in_memory(),
            "model-x",
            2,
        );

        let (first, stats) = resolver.resolve_groups(vec![request("invoices")]).await.unwrap();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(first[&("invoices".to_string(), "filters_by".to_string())], mapping);
        assert_eq!(mapper.calls.load(Ordering::SeqCst), 1);

        // Identical request again: served from cache, mapper untouched
        let (second, stats) = resolver.resolve_groups(vec![request("invoices")]).await.unwrap();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 0);
        assert_eq!(second[&("invoices".to_string(), "filters_by".to_string())], mapping);
        assert_eq!(mapper.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty_mapping() {
        let mut resolver = FallbackResolver::new(
            Arc::new(FailingMapper),
            MappingCache::in_memory(),
            "model-x",
            4,
        );
        let (mappings, stats) = resolver
            .resolve_groups(vec![request("invoices"), request("customers")])
            .await
            .unwrap();
        assert_eq!(stats.cache_misses, 2);
        assert!(mappings[&("invoices".to_string(), "filters_by".to_string())].is_empty());
        assert!(mappings[&("customers".to_string(), "filters_by".to_string())].is_empty());
    }

    #[tokio::test]
    async fn test_pool_handles_more_groups_than_workers() {
        let mapper = Arc::new(CountingMapper::new(FlagMapping::new()));
        let mut resolver = FallbackResolver::new(
            Arc::clone(&mapper) as Arc<dyn FieldMapper>,
            MappingCache::in_memory(),
            "model-x",
            2,
        );
        let groups: Vec<MappingRequest> = (0..7).map(|i| request(&format!("r{}", i))).collect();
        let (mappings, _) = resolver.resolve_groups(groups).await.unwrap();
        assert_eq!(mappings.len(), 7);
        assert_eq!(mapper.calls.load(Ordering::SeqCst), 7);
    }
}
