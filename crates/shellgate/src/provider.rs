//! Model provider selection and credential lookup.

use crate::error::Result;
use crate::model::{ModelProvider, Pearl, ProviderScope};
use crate::store::{ProviderStore, VaultStore};

/// Path appended to a provider's base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Pick the provider serving `crab_id`.
///
/// The first active GLOBAL provider (creation order) wins; otherwise the
/// first active RESTRICTED provider the agent holds a grant for.
pub async fn select_provider<S: ProviderStore + ?Sized>(
    store: &S,
    crab_id: &str,
) -> Result<Option<ModelProvider>> {
    let providers = store.list_providers().await?;

    if let Some(global) = providers
        .iter()
        .find(|p| p.active && p.scope == ProviderScope::Global)
    {
        return Ok(Some(global.clone()));
    }

    for provider in providers
        .iter()
        .filter(|p| p.active && p.scope == ProviderScope::Restricted)
    {
        if store.has_grant(&provider.id, crab_id).await? {
            return Ok(Some(provider.clone()));
        }
    }
    Ok(None)
}

/// Upstream chat-completions URL for a provider.
#[must_use]
pub fn completions_url(provider: &ModelProvider) -> String {
    format!(
        "{}{}",
        provider.base_url.trim_end_matches('/'),
        CHAT_COMPLETIONS_PATH
    )
}

/// Credential for a provider's `pearl_service`.
///
/// The calling agent's own credential is preferred. Otherwise any agent's
/// credential for the same service is used, which lets an operator park a
/// shared key on a dedicated agent. `None` means the provider is called
/// without authentication.
pub async fn provider_credential<S: VaultStore + ?Sized>(
    store: &S,
    provider: &ModelProvider,
    crab_id: &str,
) -> Result<Option<Pearl>> {
    let Some(service) = provider.pearl_service.as_deref() else {
        return Ok(None);
    };
    if let Some(own) = store.find_pearl(crab_id, service).await? {
        return Ok(Some(own));
    }
    store.find_any_pearl(service).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{NewProvider, PearlUpsert, ProviderPatch, ProviderProtocol};
    use crate::store::MemoryStore;
    use crate::vault::SealedSecret;

    async fn add(store: &MemoryStore, name: &str, scope: ProviderScope) -> ModelProvider {
        store
            .create_provider(NewProvider {
                name: name.to_string(),
                base_url: format!("http://{}.test/", name),
                protocol: ProviderProtocol::Openai,
                pearl_service: Some("llm".to_string()),
                scope,
            })
            .await
            .unwrap()
    }

    async fn store_pearl(store: &MemoryStore, crab_id: &str) -> Pearl {
        store
            .upsert_pearl(PearlUpsert {
                crab_id: crab_id.to_string(),
                service: "llm".to_string(),
                label: None,
                sealed: SealedSecret {
                    ciphertext: vec![1],
                    iv: vec![0; 16],
                    auth_tag: vec![0; 16],
                },
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_none_configured() {
        let store = MemoryStore::new();
        assert!(select_provider(&store, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_global_preferred_over_granted_restricted() {
        let store = MemoryStore::new();
        let restricted = add(&store, "private", ProviderScope::Restricted).await;
        store.grant_provider(&restricted.id, "c1").await.unwrap();
        let global = add(&store, "shared", ProviderScope::Global).await;

        let chosen = select_provider(&store, "c1").await.unwrap().unwrap();
        assert_eq!(chosen.id, global.id);
    }

    #[tokio::test]
    async fn test_restricted_needs_grant() {
        let store = MemoryStore::new();
        let restricted = add(&store, "private", ProviderScope::Restricted).await;
        assert!(select_provider(&store, "c1").await.unwrap().is_none());

        store.grant_provider(&restricted.id, "c1").await.unwrap();
        let chosen = select_provider(&store, "c1").await.unwrap().unwrap();
        assert_eq!(chosen.id, restricted.id);
        assert!(select_provider(&store, "c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_skipped() {
        let store = MemoryStore::new();
        let first = add(&store, "first", ProviderScope::Global).await;
        let second = add(&store, "second", ProviderScope::Global).await;
        store
            .update_provider(
                &first.id,
                ProviderPatch {
                    active: Some(false),
                    ..ProviderPatch::default()
                },
            )
            .await
            .unwrap();
        let chosen = select_provider(&store, "c1").await.unwrap().unwrap();
        assert_eq!(chosen.id, second.id);
    }

    #[tokio::test]
    async fn test_completions_url_strips_trailing_slash() {
        let store = MemoryStore::new();
        let provider = add(&store, "ollama", ProviderScope::Global).await;
        assert_eq!(
            completions_url(&provider),
            "http://ollama.test/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_credential_prefers_own_then_any() {
        let store = MemoryStore::new();
        let provider = add(&store, "p", ProviderScope::Global).await;
        assert!(provider_credential(&store, &provider, "c1").await.unwrap().is_none());

        let shared = store_pearl(&store, "system").await;
        let found = provider_credential(&store, &provider, "c1").await.unwrap().unwrap();
        assert_eq!(found.id, shared.id);

        let own = store_pearl(&store, "c1").await;
        let found = provider_credential(&store, &provider, "c1").await.unwrap().unwrap();
        assert_eq!(found.id, own.id);
    }
}
