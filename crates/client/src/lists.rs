//! Reference data (`lists`), read through the local cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{keys, LocalCache};
use crate::remote::{Method, Params, RemoteApi, RemoteError};

pub const ACTION_LISTS: &str = "lists";

/// Projects, task types and users, as opaque records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLists {
    #[serde(default)]
    pub projects: Vec<Value>,
    #[serde(default)]
    pub tasks: Vec<Value>,
    #[serde(default)]
    pub users: Vec<Value>,
}

pub struct ListsProvider {
    remote: Arc<dyn RemoteApi>,
    cache: LocalCache,
}

impl ListsProvider {
    pub fn new(remote: Arc<dyn RemoteApi>, cache: LocalCache) -> Self {
        Self { remote, cache }
    }

    /// Last lists seen, for painting before the network answers.
    pub async fn cached(&self) -> Option<ReferenceLists> {
        self.cache.get_as(&keys::lists()).await
    }

    /// Fetch fresh lists and store them in the cache.
    pub async fn refresh(&self) -> Result<ReferenceLists, RemoteError> {
        let body = self
            .remote
            .call(ACTION_LISTS, Params::new(), Method::Read)
            .await?;
        let lists: ReferenceLists = serde_json::from_value(body)
            .map_err(|e| RemoteError::Parse(format!("lists: {e}")))?;
        self.cache.set_as(&keys::lists(), &lists).await;
        Ok(lists)
    }

    /// Fresh lists, or the cached ones if the fetch fails.
    pub async fn load(&self) -> Result<ReferenceLists, RemoteError> {
        match self.refresh().await {
            Ok(lists) => Ok(lists),
            Err(err) => match self.cached().await {
                Some(lists) => {
                    tracing::debug!(error = %err, "lists fetch failed, using cached copy");
                    Ok(lists)
                }
                None => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRemote;
    use serde_json::json;

    #[tokio::test]
    async fn load_falls_back_to_cache() {
        let remote = Arc::new(ScriptedRemote::new());
        remote
            .ok(
                ACTION_LISTS,
                json!({"ok": true, "projects": [{"projectNumber": "P-1001"}], "tasks": ["Edit"]}),
            )
            .fail(ACTION_LISTS, RemoteError::Timeout(std::time::Duration::from_secs(12)));
        let provider = ListsProvider::new(remote, LocalCache::in_memory());

        let fresh = provider.load().await.unwrap();
        assert_eq!(fresh.projects.len(), 1);
        assert!(fresh.users.is_empty());

        let fallback = provider.load().await.unwrap();
        assert_eq!(fallback, fresh);
    }

    #[tokio::test]
    async fn load_without_cache_surfaces_the_error() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.fail(ACTION_LISTS, RemoteError::Network("down".into()));
        let provider = ListsProvider::new(remote, LocalCache::in_memory());

        assert!(provider.load().await.is_err());
        assert_eq!(provider.cached().await, None);
    }
}
