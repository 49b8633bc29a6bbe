//! Layered configuration: earlier providers take priority.

use std::collections::BTreeSet;

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// Reads from the first layer that has a key.
///
/// Writes and deletes skip read-only layers (such as the environment), so a
/// composite of `env` over `file` persists changes to the file.
#[derive(Default)]
pub struct CompositeConfigProvider {
    layers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer below the existing ones.
    pub fn add_provider(&mut self, provider: Box<dyn ConfigProvider>) {
        self.layers.push(provider);
    }

    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.add_provider(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Value for `key` together with the name of the layer that supplied it.
    pub async fn resolve(&self, key: &str) -> ConfigResult<Option<(String, &str)>> {
        for layer in &self.layers {
            if let Some(value) = layer.get_raw(key).await? {
                return Ok(Some((value, layer.name())));
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl ConfigProvider for CompositeConfigProvider {
    fn name(&self) -> &str {
        "composite"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.resolve(key).await?.map(|(value, layer)| {
            tracing::trace!(key, layer, "Config value resolved");
            value
        }))
    }

    async fn set_raw(&self, key: &str, value: &str) -> ConfigResult<()> {
        for layer in &self.layers {
            match layer.set_raw(key, value).await {
                Err(ConfigError::ReadOnly { .. }) => continue,
                result => return result,
            }
        }
        Err(ConfigError::ReadOnly {
            provider: self.name().to_string(),
        })
    }

    async fn delete(&self, key: &str) -> ConfigResult<bool> {
        let mut deleted = false;
        for layer in &self.layers {
            match layer.delete(key).await {
                Ok(removed) => deleted |= removed,
                Err(ConfigError::ReadOnly { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let mut keys = BTreeSet::new();
        for layer in &self.layers {
            keys.extend(layer.list_keys(prefix).await?);
        }
        Ok(keys.into_iter().collect())
    }
}

impl std::fmt::Debug for CompositeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeConfigProvider")
            .field("layers", &self.provider_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvConfigProvider, MemoryConfigProvider};

    #[tokio::test]
    async fn test_first_layer_wins() {
        let high = MemoryConfigProvider::from_data(
            "overrides",
            [("run.max_llm_calls".to_string(), "5".to_string())].into(),
        );
        let low = MemoryConfigProvider::with_values([
            ("run.max_llm_calls", "50"),
            ("run.max_graph_steps", "8"),
        ]);
        let composite = CompositeConfigProvider::new()
            .provider(Box::new(high))
            .provider(Box::new(low));

        assert_eq!(
            composite.resolve("run.max_llm_calls").await.unwrap(),
            Some(("5".to_string(), "overrides"))
        );
        assert_eq!(
            composite.get_raw("run.max_graph_steps").await.unwrap(),
            Some("8".to_string())
        );
        assert_eq!(
            composite.list_keys("run.").await.unwrap(),
            vec!["run.max_graph_steps", "run.max_llm_calls"]
        );
    }

    #[tokio::test]
    async fn test_writes_skip_read_only_layers() {
        let composite = CompositeConfigProvider::new()
            .provider(Box::new(EnvConfigProvider::prefixed("AGENT_RUNTIME_COMPOSITE_TEST_")))
            .provider(Box::new(MemoryConfigProvider::new()));

        composite.set_raw("run.parallel_buffer", "4").await.unwrap();
        assert_eq!(
            composite.resolve("run.parallel_buffer").await.unwrap(),
            Some(("4".to_string(), "memory"))
        );
        assert!(composite.delete("run.parallel_buffer").await.unwrap());
        assert!(!composite.delete("run.parallel_buffer").await.unwrap());
    }

    #[tokio::test]
    async fn test_all_read_only_rejects_writes() {
        let composite = CompositeConfigProvider::new()
            .provider(Box::new(EnvConfigProvider::prefixed("AGENT_RUNTIME_COMPOSITE_RO_")));
        assert!(matches!(
            composite.set_raw("run.max_llm_calls", "1").await,
            Err(ConfigError::ReadOnly { ref provider }) if provider == "composite"
        ));
    }
}
