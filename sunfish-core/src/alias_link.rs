//! Alias-Link Update (spec §4.7): once a BFS crawl finishes, every resource
//! that crawl touched may still hold nested `@odata.id`s in the agent's own
//! URI space (links it had no occasion to rewrite while it was being
//! ingested, because its target hadn't been assigned a canonical id yet).
//! This pass walks them again and rewrites anything the alias registry now
//! knows how to translate.
//!
//! No direct counterpart in the reference implementation -- its BFS crawl
//! rewrites links inline as it goes and never revisits a finished object.
//! Grounded on the same `handleNestedObject`-style walker used for ingestion
//! (`redfish_event_handler.py`), applied here as a dedicated second pass via
//! `model::rewrite_nested_odata_ids`.

use crate::alias::AliasRegistry;
use crate::error::CoreResult;
use crate::store::ResourceStore;
use tracing::debug;

/// For every canonical id in `resources_accessed`, rewrites nested
/// `@odata.id` values that are still in `agent_id`'s own URI space to their
/// canonical equivalents, persisting the object if anything changed.
pub async fn update_alias_links(
    store: &dyn ResourceStore,
    alias: &AliasRegistry,
    agent_id: &str,
    resources_accessed: &[String],
) -> CoreResult<usize> {
    let mut updated = 0;

    for canonical_path in resources_accessed {
        if !store.exists(canonical_path).await {
            continue;
        }
        let mut obj = store.read(canonical_path).await?;

        // `rewrite_nested_odata_ids`'s callback cannot await, so the alias
        // lookups happen in an up-front pass that builds a plain map, then a
        // second synchronous pass applies it.
        let mut candidates = Vec::new();
        crate::model::walk_odata_ids(&obj, &mut |id| candidates.push(id.to_string()));
        let mut resolved = std::collections::HashMap::new();
        for id in &candidates {
            if let Some(canonical) = alias.canonical_for(agent_id, id).await {
                if &canonical != id {
                    resolved.insert(id.clone(), canonical);
                }
            }
        }

        if resolved.is_empty() {
            debug!(path = %canonical_path, "alias link update found nothing to rewrite");
            continue;
        }

        let rewrote = crate::model::rewrite_nested_odata_ids(&mut obj, &mut |nested_id| resolved.get(nested_id).cloned());

        if rewrote {
            store.replace(obj).await?;
            updated += 1;
        }
    }

    Ok(updated)
}
