//! Search command - one-shot catalog lookup.

use std::sync::Arc;

use anyhow::Result;
use gamecheck_catalog::{CatalogError, SearchCache, SteamCatalog};
use gamecheck_core::Config;

use crate::ui;

/// Search the catalog through a search cache and print the matches.
pub async fn run_search(config: &Config, query: &str, limit: usize) -> Result<()> {
    tracing::debug!(query, limit, url = %config.catalog.search_url, "Running catalog search");
    let provider = Arc::new(SteamCatalog::new(&config.catalog)?);
    let cache = SearchCache::new(provider, &config.search_cache);

    match cache.search(query, limit).await {
        Ok(results) if results.is_empty() => {
            ui::warning(&format!("No games found for '{query}'"));
        }
        Ok(results) => {
            ui::header(&format!("Results for '{}'", query.trim()));
            for result in results {
                ui::kv(&result.app_id.to_string(), &result.name);
            }
        }
        Err(CatalogError::EmptyQuery) => {
            anyhow::bail!("Search query is empty");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
