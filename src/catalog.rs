use crate::client::{MattermostApi, UpstreamResponse};
use crate::error::{Error, Result};
use crate::search::IndexedEmoji;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const INDEX_TTL: Duration = Duration::from_secs(15 * 60);
pub const PAGE_SIZE: usize = 200;
/// Upper bound on pages fetched per build; a server that keeps returning full pages
/// past this point is not honoring pagination.
pub const MAX_PAGES: usize = 200;

type Snapshot = Arc<[IndexedEmoji]>;

struct CatalogEntry {
    emojis: Snapshot,
    built_at: Instant,
}

/// Per-server emoji index with a fixed time-to-live, keyed by normalized base URL.
pub struct CatalogCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::with_ttl(INDEX_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached index for `base_key` if it is still fresh.
    pub fn cached(&self, base_key: &str) -> Option<Snapshot> {
        let guard = self.entries.read();
        guard
            .get(base_key)
            .filter(|entry| entry.built_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.emojis))
    }

    /// Returns the cached index, or fetches and stores a fresh one when the entry is
    /// missing, stale, or `force_rebuild` is set. A failed fetch leaves the cache as it was.
    pub async fn get_or_build(
        &self,
        api: &dyn MattermostApi,
        base_key: &str,
        force_rebuild: bool,
    ) -> Result<Snapshot> {
        if !force_rebuild {
            if let Some(emojis) = self.cached(base_key) {
                return Ok(emojis);
            }
        }
        let emojis: Snapshot = fetch_catalog(api, PAGE_SIZE).await?.into();
        info!(base = base_key, count = emojis.len(), "emoji index built");
        self.entries.write().insert(
            base_key.to_string(),
            CatalogEntry {
                emojis: Arc::clone(&emojis),
                built_at: Instant::now(),
            },
        );
        Ok(emojis)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[derive(Deserialize)]
struct RawEmoji {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Pulls every page of the emoji listing. Each page tries the name-sorted listing first
/// and falls back to the unsorted one for servers that reject `sort`.
pub async fn fetch_catalog(api: &dyn MattermostApi, per_page: usize) -> Result<Vec<IndexedEmoji>> {
    let per_page = per_page.max(1);
    let mut emojis = Vec::new();
    for page in 0..MAX_PAGES {
        let reply = fetch_page(api, page, per_page).await?;
        let (row_count, rows) = parse_emoji_page(&reply.body)?;
        if row_count == 0 {
            return Ok(emojis);
        }
        emojis.extend(rows);
        if row_count < per_page {
            return Ok(emojis);
        }
    }
    warn!(
        pages = MAX_PAGES,
        count = emojis.len(),
        "emoji listing hit the page cap; index may be incomplete"
    );
    Ok(emojis)
}

async fn fetch_page(
    api: &dyn MattermostApi,
    page: usize,
    per_page: usize,
) -> Result<UpstreamResponse> {
    let sorted = api.emoji_page(page, per_page, true).await?;
    if sorted.is_success() {
        return Ok(sorted);
    }
    let plain = api.emoji_page(page, per_page, false).await?;
    if plain.is_success() {
        return Ok(plain);
    }
    Err(Error::upstream("emoji index", sorted.status, sorted.body))
}

/// Returns the page's raw row count alongside the usable rows. Anything other than a JSON
/// array counts as an empty page; rows without both an id and a name are dropped.
pub fn parse_emoji_page(body: &str) -> Result<(usize, Vec<IndexedEmoji>)> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let serde_json::Value::Array(items) = value else {
        return Ok((0, Vec::new()));
    };
    let row_count = items.len();
    let rows = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawEmoji>(item).ok())
        .filter_map(|raw| match (raw.id, raw.name) {
            (Some(id), Some(name)) if !id.is_empty() && !name.is_empty() => {
                Some(IndexedEmoji::new(id, name))
            }
            _ => None,
        })
        .collect();
    Ok((row_count, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NewReaction;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Serves a fixed catalog page by page and records every listing call.
    struct FakeCatalog {
        names: Vec<String>,
        reject_sorted: bool,
        fail_status: Option<u16>,
        full_pages_forever: bool,
        calls: Mutex<Vec<(usize, bool)>>,
    }

    impl FakeCatalog {
        fn new(names: &[&str]) -> Self {
            Self {
                names: names.iter().map(|n| n.to_string()).collect(),
                reject_sorted: false,
                fail_status: None,
                full_pages_forever: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn listing_calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl MattermostApi for FakeCatalog {
        async fn current_user_id(&self) -> Result<String> {
            Ok("me".into())
        }

        async fn emoji_page(
            &self,
            page: usize,
            per_page: usize,
            sorted: bool,
        ) -> Result<UpstreamResponse> {
            self.calls.lock().push((page, sorted));
            if let Some(status) = self.fail_status {
                return Ok(UpstreamResponse::new(status, "upstream unavailable"));
            }
            if sorted && self.reject_sorted {
                return Ok(UpstreamResponse::new(400, "invalid sort"));
            }
            let rows: Vec<_> = if self.full_pages_forever {
                (0..per_page)
                    .map(|i| json!({"id": format!("{page}-{i}"), "name": format!("e{page}_{i}")}))
                    .collect()
            } else {
                self.names
                    .iter()
                    .enumerate()
                    .skip(page * per_page)
                    .take(per_page)
                    .map(|(idx, name)| json!({"id": idx.to_string(), "name": name}))
                    .collect()
            };
            Ok(UpstreamResponse::new(200, serde_json::to_string(&rows)?))
        }

        async fn add_reaction(&self, _reaction: &NewReaction<'_>) -> Result<UpstreamResponse> {
            Ok(UpstreamResponse::new(201, "{}"))
        }
    }

    #[tokio::test]
    async fn second_build_within_ttl_is_served_from_cache() {
        let api = FakeCatalog::new(&["smile", "smiley", "grin"]);
        let cache = CatalogCache::new();
        let first = cache.get_or_build(&api, "http://mm", false).await.unwrap();
        let second = cache.get_or_build(&api, "http://mm", false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 3);
        assert_eq!(api.listing_calls(), 1);
    }

    #[tokio::test]
    async fn forced_or_stale_builds_refetch() {
        let api = FakeCatalog::new(&["smile"]);
        let cache = CatalogCache::new();
        cache.get_or_build(&api, "http://mm", false).await.unwrap();
        cache.get_or_build(&api, "http://mm", true).await.unwrap();
        assert_eq!(api.listing_calls(), 2);

        let stale = CatalogCache::with_ttl(Duration::ZERO);
        stale.get_or_build(&api, "http://mm", false).await.unwrap();
        stale.get_or_build(&api, "http://mm", false).await.unwrap();
        assert_eq!(api.listing_calls(), 4);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let api = FakeCatalog::new(&["smile"]);
        let cache = CatalogCache::new();
        cache.get_or_build(&api, "http://a", false).await.unwrap();
        cache.get_or_build(&api, "http://b", false).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(api.listing_calls(), 2);
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let names: Vec<String> = (0..450).map(|i| format!("emoji_{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let api = FakeCatalog::new(&refs);
        let emojis = fetch_catalog(&api, PAGE_SIZE).await.unwrap();
        assert_eq!(emojis.len(), 450);
        let pages: Vec<usize> = api.calls.lock().iter().map(|(page, _)| *page).collect();
        assert_eq!(pages, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_ends_on_empty_page() {
        let names: Vec<String> = (0..4).map(|i| format!("e{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let api = FakeCatalog::new(&refs);
        let emojis = fetch_catalog(&api, 2).await.unwrap();
        assert_eq!(emojis.len(), 4);
        assert_eq!(api.listing_calls(), 3);
    }

    #[tokio::test]
    async fn unsorted_fallback_is_used() {
        let mut api = FakeCatalog::new(&["smile", "grin"]);
        api.reject_sorted = true;
        let emojis = fetch_catalog(&api, PAGE_SIZE).await.unwrap();
        assert_eq!(emojis.len(), 2);
        assert_eq!(*api.calls.lock(), vec![(0, true), (0, false)]);
    }

    #[tokio::test]
    async fn failed_build_keeps_previous_entry() {
        let mut api = FakeCatalog::new(&["smile"]);
        let cache = CatalogCache::new();
        let built = cache.get_or_build(&api, "http://mm", false).await.unwrap();

        api.fail_status = Some(503);
        let err = cache.get_or_build(&api, "http://mm", true).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("upstream unavailable"));

        let cached = cache.cached("http://mm").unwrap();
        assert!(Arc::ptr_eq(&built, &cached));
    }

    #[tokio::test]
    async fn page_cap_stops_runaway_listing() {
        let mut api = FakeCatalog::new(&[]);
        api.full_pages_forever = true;
        let emojis = fetch_catalog(&api, 1).await.unwrap();
        assert_eq!(emojis.len(), MAX_PAGES);
        assert_eq!(api.listing_calls(), MAX_PAGES);
    }

    #[test]
    fn malformed_rows_are_dropped() {
        let (count, rows) = parse_emoji_page(r#"[{"id":"1","name":"a"},{"name":"b"},7]"#).unwrap();
        assert_eq!(count, 3);
        assert_eq!(rows, vec![IndexedEmoji::new("1", "a")]);
        assert_eq!(parse_emoji_page(r#"{"message":"nope"}"#).unwrap().0, 0);
    }
}
