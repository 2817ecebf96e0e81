//! Removal of precaches left behind by older cache naming schemes.

use tracing::info;

use rustkit_sw::{Result, WorkerScope};

/// Marker contained in every precache name.
pub const PRECACHE_NAME_MARKER: &str = "-precache-";

/// Delete caches that look like precaches of this scope but are not
/// `current_precache_name`. Returns the deleted names.
pub async fn delete_outdated_caches(
    scope: &WorkerScope,
    current_precache_name: &str,
    marker: &str,
) -> Result<Vec<String>> {
    let scope_url = scope.scope();
    let outdated: Vec<String> = scope
        .caches()
        .keys()
        .await?
        .into_iter()
        .filter(|name| {
            name.contains(marker) && name.contains(scope_url.as_str()) && name != current_precache_name
        })
        .collect();

    for name in &outdated {
        scope.caches().delete(name).await?;
    }
    Ok(outdated)
}

/// Delete outdated precaches of `scope`; call from the activate event.
pub async fn cleanup_outdated_caches(scope: &WorkerScope) -> Result<Vec<String>> {
    let current = scope.cache_names().precache();
    let deleted = delete_outdated_caches(scope, &current, PRECACHE_NAME_MARKER).await?;
    if !deleted.is_empty() {
        info!(count = deleted.len(), caches = ?deleted, "Cleaned up outdated precaches");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustkit_sw::testing::{test_scope, StubFetcher};
    use rustkit_sw::CacheStorage;

    #[tokio::test]
    async fn test_cleanup_keeps_current_and_foreign_caches() {
        let (scope, caches) = test_scope(StubFetcher::new());
        let current = scope.cache_names().precache();
        assert_eq!(current, "rustkit-precache-https://example.com/");

        for name in [
            current.as_str(),
            "rustkit-precache-v2-https://example.com/",
            "rustkit-precache-https://other.example/",
            "rustkit-runtime-https://example.com/",
        ] {
            caches.open(name).await.unwrap();
        }

        let deleted = cleanup_outdated_caches(&scope).await.unwrap();
        assert_eq!(deleted, vec!["rustkit-precache-v2-https://example.com/"]);
        assert_eq!(
            caches.keys().await.unwrap(),
            vec![
                current,
                "rustkit-precache-https://other.example/".to_string(),
                "rustkit-runtime-https://example.com/".to_string(),
            ]
        );
    }
}
