//! Mapping precache entries to revisioned cache keys.

use url::Url;

use rustkit_sw::cache::REVISION_SEARCH_PARAM;
use rustkit_sw::Result;

use crate::manifest::PrecacheEntry;

/// The URL an entry is requested from, and the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub cache_key: Url,
    pub url: Url,
}

/// Resolve `entry` against `location` and derive its cache key.
///
/// Entries without a revision use their URL as the key; the URL itself is
/// then expected to be versioned. Otherwise the revision is appended as the
/// `__SW_REVISION__` query parameter, replacing any existing value.
pub fn create_cache_key(entry: &PrecacheEntry, location: &Url) -> Result<CacheKey> {
    let url = location.join(entry.url())?;

    let Some(revision) = entry.revision() else {
        return Ok(CacheKey {
            cache_key: url.clone(),
            url,
        });
    };

    let mut cache_key = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != REVISION_SEARCH_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    cache_key
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(REVISION_SEARCH_PARAM, revision);

    Ok(CacheKey { cache_key, url })
}
