//! Configuration provider trait.

use serde::{Serialize, de::DeserializeOwned};

use super::{ConfigError, ConfigResult};

/// Source of raw string values addressed by dotted keys such as
/// `run.max_tool_iterations`.
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Shown in logs and in `ConfigBuilder` listings.
    fn name(&self) -> &str;

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str) -> ConfigResult<()>;

    async fn delete(&self, key: &str) -> ConfigResult<bool>;

    /// Keys starting with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>>;
}

/// Typed access on top of raw values. Values are stored as JSON.
pub trait ConfigProviderExt: ConfigProvider {
    fn get<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            let Some(raw) = self.get_raw(key).await? else {
                return Ok(None);
            };
            serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
    }

    /// String value, accepting both JSON-quoted and bare text.
    fn get_string(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<String>>> + Send
    where
        Self: Sync,
    {
        async move {
            Ok(self
                .get_raw(key)
                .await?
                .map(|raw| serde_json::from_str::<String>(&raw).unwrap_or(raw)))
        }
    }

    /// Typed value, or `default` when the key is absent.
    fn get_or<T: DeserializeOwned + Send>(
        &self,
        key: &str,
        default: T,
    ) -> impl std::future::Future<Output = ConfigResult<T>> + Send
    where
        Self: Sync,
    {
        async move { Ok(self.get(key).await?.unwrap_or(default)) }
    }

    /// Typed value that must be present.
    fn require<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<T>> + Send
    where
        Self: Sync,
    {
        async move {
            self.get(key).await?.ok_or_else(|| ConfigError::NotFound {
                key: key.to_string(),
            })
        }
    }

    fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> impl std::future::Future<Output = ConfigResult<()>> + Send
    where
        Self: Sync,
    {
        async move {
            let raw = serde_json::to_string(value)?;
            self.set_raw(key, &raw).await
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;

    #[tokio::test]
    async fn test_typed_access() {
        let provider = MemoryConfigProvider::with_values([
            ("run.max_llm_calls", "7"),
            ("run.default_model", "\"gemini\""),
            ("run.streaming_mode", "sse"),
        ]);

        assert_eq!(provider.get::<usize>("run.max_llm_calls").await.unwrap(), Some(7));
        assert_eq!(provider.get_or("run.max_graph_steps", 64usize).await.unwrap(), 64);
        assert_eq!(
            provider.get_string("run.default_model").await.unwrap().as_deref(),
            Some("gemini")
        );
        assert_eq!(
            provider.get_string("run.streaming_mode").await.unwrap().as_deref(),
            Some("sse")
        );
        assert!(matches!(
            provider.get::<usize>("run.streaming_mode").await,
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            provider.require::<usize>("run.parallel_buffer").await,
            Err(ConfigError::NotFound { ref key }) if key == "run.parallel_buffer"
        ));
    }

    #[tokio::test]
    async fn test_set_serializes_json() {
        let provider = MemoryConfigProvider::new();
        provider.set("run.max_tool_iterations", &3usize).await.unwrap();
        assert_eq!(
            provider.get_raw("run.max_tool_iterations").await.unwrap().as_deref(),
            Some("3")
        );
    }
}
