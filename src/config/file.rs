//! JSON file configuration provider.
//!
//! Dotted keys address nested objects: `run.max_llm_calls` reads
//! `{"run": {"max_llm_calls": 20}}`. A flat `{"run.max_llm_calls": 20}`
//! entry takes precedence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

pub struct FileConfigProvider {
    path: PathBuf,
    data: Arc<RwLock<Option<Map<String, Value>>>>,
    auto_reload: bool,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Arc::new(RwLock::new(None)),
            auto_reload: false,
        }
    }

    /// Re-read the file on every access.
    pub fn auto_reload(path: impl Into<PathBuf>) -> Self {
        Self {
            auto_reload: true,
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> ConfigResult<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_loaded(&self) -> ConfigResult<()> {
        let mut data = self.data.write().await;
        if data.is_none() || self.auto_reload {
            *data = Some(self.load().await?);
        }
        Ok(())
    }

    async fn save(&self, data: &Map<String, Value>) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(data)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn reload(&self) -> ConfigResult<()> {
        *self.data.write().await = Some(self.load().await?);
        Ok(())
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(flat) = map.get(key) {
        return Some(flat);
    }
    let mut parts = key.split('.');
    let mut current = map.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn insert_path(map: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

fn remove_path(map: &mut Map<String, Value>, key: &str) -> bool {
    match key.split_once('.') {
        None => map.remove(key).is_some(),
        Some((head, rest)) => match map.get_mut(head) {
            Some(Value::Object(child)) => remove_path(child, rest),
            _ => false,
        },
    }
}

fn collect_keys(map: &Map<String, Value>, base: &str, out: &mut Vec<String>) {
    for (k, v) in map {
        let full = if base.is_empty() {
            k.clone()
        } else {
            format!("{base}.{k}")
        };
        match v {
            Value::Object(child) => collect_keys(child, &full, out),
            _ => out.push(full),
        }
    }
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        self.ensure_loaded().await?;
        let data = self.data.read().await;
        Ok(data
            .as_ref()
            .and_then(|map| lookup(map, key))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }))
    }

    async fn set_raw(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.ensure_loaded().await?;
        let mut data = self.data.write().await;
        let map = data.get_or_insert_with(Map::new);
        let json_value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        insert_path(map, key, json_value);
        self.save(map).await
    }

    async fn delete(&self, key: &str) -> ConfigResult<bool> {
        self.ensure_loaded().await?;
        let mut data = self.data.write().await;
        let Some(map) = data.as_mut() else {
            return Ok(false);
        };
        let existed = remove_path(map, key);
        if existed {
            self.save(map).await?;
        }
        Ok(existed)
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        self.ensure_loaded().await?;
        let data = self.data.read().await;
        let mut keys = Vec::new();
        if let Some(map) = data.as_ref() {
            collect_keys(map, "", &mut keys);
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .field("auto_reload", &self.auto_reload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_provider_nested_read() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("runtime.json");
        let config = serde_json::json!({
            "run": { "max_llm_calls": 25, "streaming_mode": "sse" }
        });
        tokio::fs::write(&config_path, config.to_string())
            .await
            .unwrap();

        let provider = FileConfigProvider::new(&config_path);
        assert_eq!(
            provider.get_raw("run.max_llm_calls").await.unwrap(),
            Some("25".to_string())
        );
        assert_eq!(
            provider.get_raw("run.streaming_mode").await.unwrap(),
            Some("sse".to_string())
        );
        assert_eq!(provider.get_raw("run.missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_provider_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FileConfigProvider::new(temp_dir.path().join("absent.json"));
        assert_eq!(provider.get_raw("run.default_model").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_provider_write_nested() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/runtime.json");
        let provider = FileConfigProvider::new(&config_path);

        provider.set_raw("run.max_graph_steps", "12").await.unwrap();
        provider.set_raw("run.default_model", "gemini").await.unwrap();
        assert!(config_path.exists());

        let reread = FileConfigProvider::new(&config_path);
        assert_eq!(
            reread.get_raw("run.max_graph_steps").await.unwrap(),
            Some("12".to_string())
        );
        assert_eq!(
            reread.list_keys("run.").await.unwrap(),
            vec!["run.default_model", "run.max_graph_steps"]
        );
    }

    #[tokio::test]
    async fn test_file_provider_delete() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FileConfigProvider::new(temp_dir.path().join("delete.json"));

        provider.set_raw("run.max_llm_calls", "3").await.unwrap();
        assert!(provider.delete("run.max_llm_calls").await.unwrap());
        assert!(!provider.delete("run.max_llm_calls").await.unwrap());
        assert_eq!(provider.get_raw("run.max_llm_calls").await.unwrap(), None);
    }
}
