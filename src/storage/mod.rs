//! 持久化层
//!
//! 控制器把持久化看作不透明的键值服务：按键读取和写入整个 JSON 值。
//!
//! - [`FileStorage`]: 每个键一个 JSON 文件，先写临时文件再重命名
//! - [`MemoryStorage`]: 内存实现，用于测试和嵌入场景
//! - [`ConfigStore`]: 控制器配置对象（实例记录、虚拟设备信息等）

pub mod config_store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::utils::{CoreError, Result};

pub use config_store::{ConfigStore, PersistedConfig, VdevInfo, CONFIG_KEY};

/// 键值持久化服务
///
/// 每次写入都替换整个值。实现必须是线程安全的。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 读取键对应的值，不存在时返回 `None`
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    /// 写入键对应的值
    async fn save(&self, key: &str, value: &Value) -> Result<()>;

    /// 删除键，键不存在时不报错
    async fn remove(&self, key: &str) -> Result<()>;
}

/// 基于文件系统的存储
///
/// 键 `notifications` 对应 `<data_dir>/notifications.json`，
/// 已带 `.json` 后缀的键（如 `config.json`）直接作为文件名。
#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    /// 创建文件存储，目录在首次写入时创建
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// 数据目录
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(CoreError::persistence(key, "非法的存储键"));
        }
        let file_name = if key.ends_with(".json") {
            key.to_string()
        } else {
            format!("{}.json", key)
        };
        Ok(self.data_dir.join(file_name))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "存储键不存在");
                return Ok(None);
            }
            Err(e) => return Err(CoreError::persistence(key, e)),
        };

        let value = serde_json::from_str(&content).map_err(|e| CoreError::persistence(key, e))?;
        Ok(Some(value))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp_path = path.with_extension("json.tmp");
        let content =
            serde_json::to_vec_pretty(value).map_err(|e| CoreError::persistence(key, e))?;

        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| CoreError::persistence(key, e))?;
        tokio::fs::write(&tmp_path, &content)
            .await
            .map_err(|e| CoreError::persistence(key, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| CoreError::persistence(key, e))?;

        debug!(key = %key, bytes = content.len(), "已写入存储");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::persistence(key, e)),
        }
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, Value>>,
    fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置后所有写入都返回持久化错误
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// 读取当前值的副本
    pub async fn snapshot(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CoreError::persistence(key, "存储不可用"));
        }
        self.values
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_storage_save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("data"));

        assert!(storage.load("notifications").await.unwrap().is_none());

        storage
            .save("notifications", &json!([{"id": 1}]))
            .await
            .unwrap();
        assert!(dir.path().join("data/notifications.json").exists());
        assert!(!dir.path().join("data/notifications.json.tmp").exists());

        let loaded = storage.load("notifications").await.unwrap();
        assert_eq!(loaded, Some(json!([{"id": 1}])));
    }

    #[tokio::test]
    async fn test_file_storage_json_key_kept_verbatim() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.save("config.json", &json!({})).await.unwrap();
        assert!(dir.path().join("config.json").exists());

        storage.remove("config.json").await.unwrap();
        assert!(!dir.path().join("config.json").exists());
        storage.remove("config.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_rejects_path_keys() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());

        let result = storage.save("../escape", &json!(1)).await;
        assert!(matches!(result, Err(CoreError::Persistence { .. })));
    }

    #[tokio::test]
    async fn test_file_storage_corrupt_content() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("notifications.json"), "{not json")
            .await
            .unwrap();
        let storage = FileStorage::new(dir.path());

        let result = storage.load("notifications").await;
        assert!(matches!(result, Err(CoreError::Persistence { .. })));
    }

    #[tokio::test]
    async fn test_memory_storage_fail_switch() {
        let storage = MemoryStorage::new();
        storage.save("k", &json!(1)).await.unwrap();

        storage.set_fail_saves(true);
        let err = storage.save("k", &json!(2)).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(storage.snapshot("k").await, Some(json!(1)));

        storage.set_fail_saves(false);
        storage.save("k", &json!(2)).await.unwrap();
        assert_eq!(storage.load("k").await.unwrap(), Some(json!(2)));
    }
}
